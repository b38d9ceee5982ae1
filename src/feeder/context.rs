use std::collections::HashMap;

/// State scoped to one import run: the run seed and the student lookup table.
/// Created at run start and dropped at run end.
#[derive(Debug)]
pub struct RunContext {
    seed: i64,
    students: HashMap<String, String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_seed(rand::random::<i64>())
    }

    pub fn with_seed(seed: i64) -> Self {
        Self {
            seed,
            students: HashMap::new(),
        }
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }

    /// Last write wins: two students with the same key resolve to the later one.
    pub fn record_student(&mut self, key: String, external_id: String) {
        self.students.insert(key, external_id);
    }

    pub fn resolve_child(&self, key: &str) -> Option<&str> {
        self.students.get(key).map(String::as_str)
    }

    pub fn known_students(&self) -> usize {
        self.students.len()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

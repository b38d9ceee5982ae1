use thiserror::Error;

/// Failures surfaced by an import run. `code()` is the wire code reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("structure error with directory {dir}: {message}")]
    Structure { dir: String, message: String },

    #[error("import root must contain exactly one structure directory: {message}")]
    ListFiles { message: String },

    #[error("no importable column in {file}")]
    InvalidColumns { file: String },

    #[error("unreadable csv {file}: {message}")]
    Csv { file: String, message: String },

    #[error("file {file} failed: {message}")]
    File { file: String, message: String },

    #[error("child columns of different lengths in {file} line {line}")]
    InvalidChildMapping { file: String, line: usize },

    #[error("externalId owned by an authoritative feed: {}", .0.join(", "))]
    UnmodifiableExternalIds(Vec<String>),

    #[error("backing store failure: {0}")]
    Store(String),
}

impl FeedError {
    pub fn code(&self) -> String {
        match self {
            FeedError::Structure { .. } => "structure.error".to_string(),
            FeedError::ListFiles { .. } => "error.list.files".to_string(),
            FeedError::InvalidColumns { .. } => "invalid.columns".to_string(),
            FeedError::Csv { .. } => "csv.exception".to_string(),
            FeedError::File { .. } => "file.error".to_string(),
            FeedError::InvalidChildMapping { .. } => "invalid.child.mapping".to_string(),
            FeedError::UnmodifiableExternalIds(ids) => format!(
                "unmodifiable.externalId-{}",
                serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
            ),
            FeedError::Store(_) => "store.error".to_string(),
        }
    }

    /// File the error is attached to, when it has one.
    pub fn file(&self) -> Option<&str> {
        match self {
            FeedError::InvalidColumns { file }
            | FeedError::Csv { file, .. }
            | FeedError::File { file, .. }
            | FeedError::InvalidChildMapping { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn store(e: anyhow::Error) -> Self {
        FeedError::Store(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmodifiable_code_embeds_json_list() {
        let e = FeedError::UnmodifiableExternalIds(vec!["A1".into(), "B\"2".into()]);
        assert_eq!(e.code(), r#"unmodifiable.externalId-["A1","B\"2"]"#);
    }

    #[test]
    fn file_level_codes() {
        let e = FeedError::File {
            file: "Student.csv".into(),
            message: "flush".into(),
        };
        assert_eq!(e.code(), "file.error");
        assert_eq!(e.file(), Some("Student.csv"));
        assert_eq!(FeedError::ListFiles { message: String::new() }.code(), "error.list.files");
    }
}

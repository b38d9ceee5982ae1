use crate::feeder::profile::Profile;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    List(Vec<String>),
}

/// One CSV row as canonical fields. Built per row, handed to the store, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonRecord {
    #[serde(flatten)]
    fields: BTreeMap<String, FieldValue>,
}

impl PersonRecord {
    pub fn new(structure_id: &str, profile: Profile) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            "structures".to_string(),
            FieldValue::List(vec![structure_id.to_string()]),
        );
        fields.insert(
            "profiles".to_string(),
            FieldValue::List(vec![profile.name().to_string()]),
        );
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Text fields as a one-element list, lists as-is.
    pub fn values(&self, name: &str) -> Option<Vec<String>> {
        match self.fields.get(name)? {
            FieldValue::Text(s) => Some(vec![s.clone()]),
            FieldValue::List(v) => Some(v.clone()),
            FieldValue::Flag(_) => None,
        }
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.fields
            .insert(name.to_string(), FieldValue::Text(value.into()));
    }

    pub fn set_flag(&mut self, name: &str, value: bool) {
        self.fields.insert(name.to_string(), FieldValue::Flag(value));
    }

    pub fn push_list(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.get_mut(name) {
            Some(FieldValue::List(v)) => v.push(value),
            _ => {
                self.fields
                    .insert(name.to_string(), FieldValue::List(vec![value]));
            }
        }
    }

    /// Stores a scalar; a second value turns it into a list, further values append.
    pub fn push_promote(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let next = match self.fields.remove(name) {
            None => FieldValue::Text(value),
            Some(FieldValue::Text(prev)) => FieldValue::List(vec![prev, value]),
            Some(FieldValue::List(mut v)) => {
                v.push(value);
                FieldValue::List(v)
            }
            Some(FieldValue::Flag(prev)) => FieldValue::List(vec![prev.to_string(), value]),
        };
        self.fields.insert(name.to_string(), next);
    }

    pub fn external_id(&self) -> Option<&str> {
        self.text("externalId")
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

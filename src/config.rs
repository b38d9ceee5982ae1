use crate::db;
use crate::feeder::columns::ColumnsMapping;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};

pub const KEY_COLUMNS_MAPPING: &str = "feeder.columnsMapping";
pub const KEY_AUTHORITATIVE_SOURCES: &str = "feeder.authoritativeSources";
pub const KEY_SOURCE: &str = "feeder.source";

pub const DEFAULT_AUTHORITATIVE_SOURCES: &[&str] = &["AAF", "AAF1D"];
pub const DEFAULT_SOURCE: &str = "CSV";

/// Persisted feeder configuration of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeederSettings {
    pub columns_mapping: ColumnsMapping,
    pub authoritative_sources: Vec<String>,
    pub source: String,
}

impl Default for FeederSettings {
    fn default() -> Self {
        Self {
            columns_mapping: ColumnsMapping::new(),
            authoritative_sources: DEFAULT_AUTHORITATIVE_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

impl FeederSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut s = Self::default();
        if let Some(v) = db::settings_get_json(conn, KEY_COLUMNS_MAPPING)? {
            s.columns_mapping = serde_json::from_value(v)?;
        }
        if let Some(v) = db::settings_get_json(conn, KEY_AUTHORITATIVE_SOURCES)? {
            s.authoritative_sources = serde_json::from_value(v)?;
        }
        if let Some(v) = db::settings_get_json(conn, KEY_SOURCE)? {
            s.source = serde_json::from_value(v)?;
        }
        Ok(s)
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(
            conn,
            KEY_COLUMNS_MAPPING,
            &serde_json::to_value(&self.columns_mapping)?,
        )?;
        db::settings_set_json(
            conn,
            KEY_AUTHORITATIVE_SOURCES,
            &serde_json::to_value(&self.authoritative_sources)?,
        )?;
        db::settings_set_json(conn, KEY_SOURCE, &Value::String(self.source.clone()))?;
        Ok(())
    }

    /// Applies a partial update; unknown or mistyped fields are rejected.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        for (k, v) in patch {
            match k.as_str() {
                "columnsMapping" => {
                    self.columns_mapping = serde_json::from_value(v.clone()).map_err(|_| {
                        "columnsMapping must map profile -> header -> field".to_string()
                    })?;
                }
                "authoritativeSources" => {
                    let list: Vec<String> = serde_json::from_value(v.clone())
                        .map_err(|_| "authoritativeSources must be a list of strings".to_string())?;
                    self.authoritative_sources = list
                        .into_iter()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "source" => {
                    let s = v
                        .as_str()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| "source must be a non-empty string".to_string())?;
                    if s.len() > 32 {
                        return Err("source length must be <= 32".into());
                    }
                    self.source = s.to_string();
                }
                _ => return Err(format!("unknown feeder setting: {}", k)),
            }
        }
        Ok(())
    }

    /// Persisted mapping with the request's mapping laid over it, profile by profile.
    pub fn columns_mapping_with(&self, request: Option<&ColumnsMapping>) -> ColumnsMapping {
        let mut merged = self.columns_mapping.clone();
        if let Some(request) = request {
            for (profile, cols) in request {
                let entry = merged.entry(profile.clone()).or_default();
                for (raw, canonical) in cols {
                    entry.insert(raw.clone(), canonical.clone());
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn defaults_protect_aaf_sources() {
        let s = FeederSettings::default();
        assert_eq!(s.authoritative_sources, vec!["AAF", "AAF1D"]);
        assert_eq!(s.source, "CSV");
    }

    #[test]
    fn patch_rejects_unknown_and_mistyped_fields() {
        let mut s = FeederSettings::default();
        let bad = json!({ "colour": "blue" });
        assert!(s.merge_patch(bad.as_object().expect("obj")).is_err());
        let bad = json!({ "source": 12 });
        assert!(s.merge_patch(bad.as_object().expect("obj")).is_err());
        let good = json!({ "source": " SIS ", "authoritativeSources": ["AAF", " "] });
        s.merge_patch(good.as_object().expect("obj")).expect("merge");
        assert_eq!(s.source, "SIS");
        assert_eq!(s.authoritative_sources, vec!["AAF"]);
    }

    #[test]
    fn request_mapping_wins_over_persisted() {
        let mut s = FeederSettings::default();
        s.columns_mapping.insert(
            "Student".into(),
            HashMap::from([
                ("Code".to_string(), "externalId".to_string()),
                ("Div".to_string(), "classes".to_string()),
            ]),
        );
        let req = HashMap::from([(
            "Student".to_string(),
            HashMap::from([("Code".to_string(), "ignore".to_string())]),
        )]);
        let merged = s.columns_mapping_with(Some(&req));
        assert_eq!(merged["Student"]["Code"], "ignore");
        assert_eq!(merged["Student"]["Div"], "classes");
    }
}

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub code: String,
    pub params: Vec<String>,
}

/// Per-profile counts and per-row/per-file errors of one run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<String>,
    pub profiles: BTreeMap<String, usize>,
    pub errors: Vec<ReportEntry>,
}

impl ImportReport {
    pub fn add_profile(&mut self, name: &str) {
        self.profiles.entry(name.to_string()).or_insert(0);
    }

    pub fn count_row(&mut self, profile: &str) {
        *self.profiles.entry(profile.to_string()).or_insert(0) += 1;
    }

    pub fn add_error_with_params(&mut self, code: &str, params: &[&str]) {
        self.errors.push(ReportEntry {
            code: code.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors_with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a ReportEntry> {
        self.errors.iter().filter(move |e| e.code == code)
    }
}

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DESCRIPTOR_FILE: &str = "structure.json";

/// What the import root says about the structure being imported.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureDescriptor {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub override_class: Option<String>,
}

impl StructureDescriptor {
    /// Reads `structure.json` when present, else derives from `<externalId>_<name>`.
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        let mut d = if descriptor_path.is_file() {
            let text = std::fs::read_to_string(&descriptor_path).with_context(|| {
                format!("failed to read {}", descriptor_path.to_string_lossy())
            })?;
            serde_json::from_str::<StructureDescriptor>(&text).with_context(|| {
                format!("invalid descriptor {}", descriptor_path.to_string_lossy())
            })?
        } else {
            let dir_name = dir
                .file_name()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow!("structure directory has no usable name"))?;
            match dir_name.split_once('_') {
                Some((id, name)) => StructureDescriptor {
                    external_id: id.to_string(),
                    name: name.to_string(),
                    override_class: None,
                },
                None => StructureDescriptor {
                    external_id: dir_name.to_string(),
                    name: dir_name.to_string(),
                    override_class: None,
                },
            }
        };

        d.external_id = d.external_id.trim().to_string();
        if d.external_id.is_empty() || d.external_id.contains('$') {
            return Err(anyhow!("invalid structure external id {:?}", d.external_id));
        }
        if d.name.trim().is_empty() {
            d.name = d.external_id.clone();
        }
        d.override_class = d
            .override_class
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Ok(d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Class,
    FunctionalGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnit {
    pub kind: UnitKind,
    pub external_id: String,
    pub name: String,
}

/// The structure being imported and its registry of classes and functional groups.
#[derive(Debug, Clone)]
pub struct Structure {
    external_id: String,
    name: String,
    override_class: Option<String>,
    classes: BTreeMap<String, String>,
    groups: BTreeMap<String, String>,
    pending: Vec<NewUnit>,
}

impl Structure {
    pub fn new(external_id: &str, name: &str) -> Self {
        Self {
            external_id: external_id.to_string(),
            name: name.to_string(),
            override_class: None,
            classes: BTreeMap::new(),
            groups: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn override_class(&self) -> Option<&str> {
        self.override_class.as_deref()
    }

    pub fn set_override_class(&mut self, class: Option<String>) {
        self.override_class = class.filter(|c| !c.trim().is_empty());
    }

    /// `structureId$local`
    pub fn namespaced(&self, local: &str) -> String {
        format!("{}${}", self.external_id, local)
    }

    pub fn is_namespaced(&self, value: &str) -> bool {
        value
            .strip_prefix(self.external_id.as_str())
            .map(|rest| rest.starts_with('$'))
            .unwrap_or(false)
    }

    pub fn namespace(&self, value: &str) -> String {
        if self.is_namespaced(value) {
            value.to_string()
        } else {
            self.namespaced(value)
        }
    }

    /// Registers a class already present in the backing store.
    pub fn load_class(&mut self, external_id: String, name: String) {
        self.classes.insert(external_id, name);
    }

    pub fn load_group(&mut self, external_id: String, name: String) {
        self.groups.insert(external_id, name);
    }

    pub fn create_class_if_absent(&mut self, external_id: &str, name: &str) -> bool {
        Self::create_if_absent(
            &mut self.classes,
            &mut self.pending,
            UnitKind::Class,
            external_id,
            name,
        )
    }

    pub fn create_functional_group_if_absent(&mut self, external_id: &str, name: &str) -> bool {
        Self::create_if_absent(
            &mut self.groups,
            &mut self.pending,
            UnitKind::FunctionalGroup,
            external_id,
            name,
        )
    }

    fn create_if_absent(
        registry: &mut BTreeMap<String, String>,
        pending: &mut Vec<NewUnit>,
        kind: UnitKind,
        external_id: &str,
        name: &str,
    ) -> bool {
        if registry.contains_key(external_id) {
            return false;
        }
        registry.insert(external_id.to_string(), name.to_string());
        pending.push(NewUnit {
            kind,
            external_id: external_id.to_string(),
            name: name.to_string(),
        });
        true
    }

    /// Units created since the last call, in creation order.
    pub fn take_pending(&mut self) -> Vec<NewUnit> {
        std::mem::take(&mut self.pending)
    }

    pub fn classes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.classes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &str)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

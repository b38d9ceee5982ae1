use crate::feeder::profile::{FieldKind, Profile};
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Caller overrides: profile name -> raw header -> canonical field.
pub type ColumnsMapping = HashMap<String, HashMap<String, String>>;

pub const IGNORE: &str = "ignore";

const DEFAULT_COLUMNS: &[(&str, &str)] = &[
    ("id", "externalId"),
    ("externalid", "externalId"),
    ("identifiant", "externalId"),
    ("nom", "lastName"),
    ("lastname", "lastName"),
    ("nomdefamille", "lastName"),
    ("nomdusage", "surname"),
    ("surname", "surname"),
    ("prenom", "firstName"),
    ("firstname", "firstName"),
    ("datedenaissance", "birthDate"),
    ("birthdate", "birthDate"),
    ("email", "email"),
    ("mail", "email"),
    ("courriel", "email"),
    ("civilite", "title"),
    ("title", "title"),
    ("telephone", "homePhone"),
    ("telephonedomicile", "homePhone"),
    ("homephone", "homePhone"),
    ("telephonetravail", "workPhone"),
    ("workphone", "workPhone"),
    ("mobile", "mobile"),
    ("portable", "mobile"),
    ("telephoneportable", "mobile"),
    ("adresse", "address"),
    ("address", "address"),
    ("codepostal", "zipCode"),
    ("cp", "zipCode"),
    ("zipcode", "zipCode"),
    ("ville", "city"),
    ("commune", "city"),
    ("city", "city"),
    ("pays", "country"),
    ("country", "country"),
    ("login", "login"),
    ("classe", "classes"),
    ("classes", "classes"),
    ("groupe", "groups"),
    ("groupes", "groups"),
    ("groups", "groups"),
    ("fonction", "functions"),
    ("functions", "functions"),
    ("matiere", "subjectTaught"),
    ("matieres", "subjectTaught"),
    ("subjecttaught", "subjectTaught"),
    ("niveau", "level"),
    ("level", "level"),
    ("boursier", "scholarshipHolder"),
    ("lienparente", "relativeType"),
    ("identifiantenfant", "childExternalId"),
    ("childexternalid", "childExternalId"),
    ("nomenfant", "childLastName"),
    ("childlastname", "childLastName"),
    ("prenomenfant", "childFirstName"),
    ("childfirstname", "childFirstName"),
    ("classeenfant", "childClasses"),
    ("childclasses", "childClasses"),
    ("loginenfant", "childUsername"),
    ("childusername", "childUsername"),
    ("ignorer", IGNORE),
    ("ignore", IGNORE),
];

/// Lowercase, accent-free, alphanumeric-only form of a header cell.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub kind: FieldKind,
}

/// Canonical columns of one file, positionally aligned with its header.
/// `None` marks a column to ignore.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    columns: Vec<Option<Column>>,
}

impl ColumnPlan {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx).and_then(|c| c.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnResolver {
    overrides: HashMap<String, HashMap<String, String>>,
}

impl ColumnResolver {
    pub fn new(mapping: &ColumnsMapping) -> Self {
        let overrides = mapping
            .iter()
            .map(|(profile, cols)| {
                let cols = cols
                    .iter()
                    .map(|(raw, canonical)| (normalize_header(raw), canonical.trim().to_string()))
                    .collect();
                (profile.clone(), cols)
            })
            .collect();
        Self { overrides }
    }

    fn lookup(&self, profile: &str, cell: &str) -> Option<String> {
        let key = normalize_header(cell);
        if key.is_empty() {
            return None;
        }
        if let Some(v) = self.overrides.get(profile).and_then(|m| m.get(&key)) {
            return Some(v.clone());
        }
        DEFAULT_COLUMNS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }

    /// Canonical name for each header cell; unresolved or ignored cells yield "".
    pub fn resolve(&self, header: &[String], profile: &str) -> Vec<String> {
        header
            .iter()
            .map(|cell| match self.lookup(profile, cell) {
                Some(name) if name != IGNORE => name,
                _ => String::new(),
            })
            .collect()
    }

    /// Resolves a header once per file, pairing each column with its declared kind.
    /// Fails when nothing in the header resolves.
    pub fn plan(&self, header: &[String], profile: Profile) -> Option<ColumnPlan> {
        let names = self.resolve(header, profile.name());
        if names.iter().all(|n| n.is_empty()) {
            return None;
        }
        let columns = names
            .into_iter()
            .map(|name| {
                if name.is_empty() {
                    None
                } else {
                    let kind = profile.field_kind(&name);
                    Some(Column { name, kind })
                }
            })
            .collect();
        Some(ColumnPlan { columns })
    }
}

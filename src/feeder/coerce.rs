use crate::feeder::columns::Column;
use crate::feeder::profile::FieldKind;
use crate::feeder::record::PersonRecord;
use crate::feeder::structure::Structure;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const NAMESPACED_LISTS: &[&str] = &["classes", "subjectTaught", "functions", "groups"];

fn french_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]{2})/([0-9]{2})/([0-9]{4})$").expect("valid date regex"))
}

/// `(structureId, classOrGroupExternalId, discriminant)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub structure_id: String,
    pub external_id: String,
    pub discriminant: String,
}

#[derive(Debug, Clone, Default)]
pub struct Memberships {
    pub classes: Vec<Membership>,
    pub groups: Vec<Membership>,
}

/// `DD/MM/YYYY` becomes `YYYY-MM-DD`; anything else is kept verbatim.
pub fn reformat_birth_date(v: &str) -> String {
    match french_date().captures(v) {
        Some(c) => format!("{}-{}-{}", &c[3], &c[2], &c[1]),
        None => v.to_string(),
    }
}

/// Applies one cell to the row's record and memberships.
pub fn coerce_field(
    record: &mut PersonRecord,
    memberships: &mut Memberships,
    column: &Column,
    raw: &str,
    structure: &mut Structure,
    field_of_study: &HashMap<String, String>,
) {
    let name = column.name.as_str();
    let v = raw.trim();
    if v.is_empty() && !name.starts_with("child") {
        return;
    }
    if name == "classes" && structure.override_class().is_some() {
        return;
    }

    match column.kind {
        FieldKind::Text => {
            if name == "birthDate" {
                record.set_text(name, reformat_birth_date(v));
            } else {
                record.set_text(name, v);
            }
        }
        FieldKind::TextList => {
            if NAMESPACED_LISTS.contains(&name) {
                record.push_list(name, structure.namespace(v));
            } else {
                record.push_list(name, v);
            }
        }
        FieldKind::Flag => record.set_flag(name, v.eq_ignore_ascii_case("true")),
        FieldKind::Untyped => {
            if name == "childClasses" && !v.is_empty() {
                record.push_promote(name, structure.namespace(v));
            } else {
                record.push_promote(name, v);
            }
        }
    }

    if name == "classes" || name == "groups" {
        let membership = parse_membership(v, structure, field_of_study);
        let local = membership
            .external_id
            .strip_prefix(&format!("{}$", structure.external_id()))
            .unwrap_or(&membership.external_id)
            .to_string();
        if name == "classes" {
            structure.create_class_if_absent(&membership.external_id, &local);
            memberships.classes.push(membership);
        } else {
            structure.create_functional_group_if_absent(&membership.external_id, &local);
            memberships.groups.push(membership);
        }
    }
}

/// Splits `local$discriminant`, substituting a field of study for a non-numeric discriminant.
fn parse_membership(
    v: &str,
    structure: &Structure,
    field_of_study: &HashMap<String, String>,
) -> Membership {
    let prefix = format!("{}$", structure.external_id());
    let local = v.strip_prefix(&prefix).unwrap_or(v);
    let mut parts: Vec<&str> = local.split('$').collect();
    while parts.len() > 1 && parts.last().map(|p| p.is_empty()).unwrap_or(false) {
        parts.pop();
    }
    let discriminant = if parts.len() == 2 {
        let d = parts[1];
        if !d.chars().all(|c| c.is_ascii_digit()) {
            field_of_study
                .get(d)
                .cloned()
                .unwrap_or_else(|| d.to_string())
        } else {
            d.to_string()
        }
    } else {
        String::new()
    };
    Membership {
        structure_id: structure.external_id().to_string(),
        external_id: structure.namespaced(parts[0]),
        discriminant,
    }
}

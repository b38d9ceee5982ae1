use crate::feeder::record::PersonRecord;
use sha1::{Digest, Sha1};

/// Identity-bearing fields, in hashing order.
const IDENTITY_FIELDS: &[&str] = &[
    "surname",
    "lastName",
    "firstName",
    "email",
    "title",
    "homePhone",
    "mobile",
];

pub fn sha1_hex(input: &str) -> String {
    let mut h = Sha1::new();
    h.update(input.as_bytes());
    format!("{:x}", h.finalize())
}

/// Digest of structure id, identity fields, discriminant and seed.
pub fn identity_key(record: &PersonRecord, discriminant: &str, structure_id: &str, seed: i64) -> String {
    let mut mapping = String::from(structure_id);
    for field in IDENTITY_FIELDS {
        mapping.push_str(record.text(field).unwrap_or(""));
    }
    mapping.push_str(discriminant);
    mapping.push_str(&seed.to_string());
    sha1_hex(&mapping)
}

/// Sets `externalId` from the identity key unless the row already has one.
pub fn derive_external_id(record: &mut PersonRecord, discriminant: &str, structure_id: &str, seed: i64) {
    if record.external_id().is_some() {
        return;
    }
    let key = identity_key(record, discriminant, structure_id, seed);
    record.set_text("externalId", key);
}

/// A relative's description of one child.
#[derive(Debug, Clone, Copy)]
pub struct ChildRef<'a> {
    pub username: Option<&'a str>,
    pub last_name: &'a str,
    pub first_name: &'a str,
    pub class: &'a str,
}

/// Lookup key comparable with the identity key of a student row hashed with
/// the run seed and its single class as discriminant.
pub fn mapping_key(structure_id: &str, child: &ChildRef<'_>, seed: i64) -> String {
    let mut mapping = String::from(structure_id);
    if let Some(username) = child.username {
        mapping.push_str(username.trim());
    }
    mapping.push_str(child.last_name.trim());
    mapping.push_str(child.first_name.trim());
    mapping.push_str(child.class.trim());
    mapping.push_str(&seed.to_string());
    sha1_hex(&mapping)
}

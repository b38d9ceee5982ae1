mod sqlite;

pub use sqlite::SqliteStore;

use crate::feeder::coerce::Membership;
use crate::feeder::record::PersonRecord;
use crate::feeder::structure::{Structure, StructureDescriptor};
use std::collections::HashMap;

/// Backing identity graph used by the feeder.
///
/// Upserts and registry writes are buffered; they reach the graph on `flush`,
/// which applies everything pending atomically. `persist` is the final flush of a run.
pub trait IdentityStore {
    /// Creates the five profiles and the default functions when missing.
    fn ensure_profiles(&mut self) -> anyhow::Result<()>;

    /// Field-of-study label -> external id.
    fn field_of_study(&self) -> anyhow::Result<HashMap<String, String>>;

    /// Creates or updates the structure and loads its existing classes and groups.
    fn upsert_structure(&mut self, descriptor: &StructureDescriptor) -> anyhow::Result<Structure>;

    fn create_class(&mut self, structure_id: &str, external_id: &str, name: &str);
    fn create_functional_group(&mut self, structure_id: &str, external_id: &str, name: &str);

    fn upsert_student(&mut self, record: &PersonRecord, classes: &[Membership], groups: &[Membership]);
    fn upsert_teacher(&mut self, record: &PersonRecord, classes: &[Membership], groups: &[Membership]);
    fn upsert_personnel(&mut self, record: &PersonRecord, classes: &[Membership], groups: &[Membership]);
    fn upsert_guest(&mut self, record: &PersonRecord, classes: &[Membership]);
    fn upsert_relative(&mut self, record: &PersonRecord, children: &[String]);

    /// Subset of `external_ids` owned by a non-deleted user from one of `sources`.
    fn query_authoritative_ids(
        &self,
        external_ids: &[String],
        sources: &[String],
    ) -> anyhow::Result<Vec<String>>;

    /// Links teachers of the structure to the subjects they teach.
    fn link_teacher_subjects(&mut self, structure_id: &str);
    /// Attaches relatives of the structure to their children's classes.
    fn link_relatives_to_classes(&mut self, structure_id: &str);

    fn flush(&mut self) -> anyhow::Result<()>;

    /// Clears the soft-delete marks of users upserted during this run.
    fn restore_pre_deleted_users(&mut self);
    fn tag_groups_with_structure_name(&mut self, structure_id: &str);

    fn persist(&mut self) -> anyhow::Result<()> {
        self.flush()
    }
}

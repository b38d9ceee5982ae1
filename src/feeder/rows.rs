use crate::feeder::coerce::{coerce_field, Membership, Memberships};
use crate::feeder::columns::{ColumnPlan, ColumnResolver};
use crate::feeder::context::RunContext;
use crate::feeder::csv_source::{is_empty_row, CsvTable};
use crate::feeder::error::FeedError;
use crate::feeder::hasher::{derive_external_id, identity_key, mapping_key, ChildRef};
use crate::feeder::profile::Profile;
use crate::feeder::record::{FieldValue, PersonRecord};
use crate::feeder::report::ImportReport;
use crate::feeder::structure::{Structure, UnitKind};
use crate::store::IdentityStore;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Relative exports may end with an organisation block; its header stops the scan.
fn is_relative_trailer(row: &[String]) -> bool {
    let cell = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
    (cell(0) == "Intitulé" && cell(1) == "Adresse Organisme")
        || (cell(0).is_empty() && cell(1) == "Intitulé" && cell(2) == "Adresse Organisme")
}

/// Builds one record per data row and dispatches it to the store.
pub struct RowImporter<'a, S: IdentityStore + ?Sized> {
    pub store: &'a mut S,
    pub structure: &'a mut Structure,
    pub ctx: &'a mut RunContext,
    pub field_of_study: &'a HashMap<String, String>,
    pub resolver: &'a ColumnResolver,
}

impl<'a, S: IdentityStore + ?Sized> RowImporter<'a, S> {
    /// Imports every data row of `table`. Row-level failures go to the report;
    /// an unusable header fails the whole file.
    pub fn import_table(
        &mut self,
        profile: Profile,
        file_name: &str,
        table: &CsvTable,
        report: &mut ImportReport,
    ) -> Result<usize, FeedError> {
        report.add_profile(profile.name());
        let plan = table
            .header()
            .and_then(|h| self.resolver.plan(h, profile))
            .ok_or_else(|| FeedError::InvalidColumns {
                file: file_name.to_string(),
            })?;

        let mut imported = 0usize;
        for (line, row) in table.data_rows() {
            if is_empty_row(row) {
                continue;
            }
            if profile == Profile::Relative && is_relative_trailer(row) {
                debug!(file = file_name, line, "relative trailer reached");
                break;
            }
            match self.import_row(profile, &plan, row, line, file_name) {
                Ok(()) => {
                    imported += 1;
                    report.count_row(profile.name());
                }
                Err(e) => {
                    warn!(file = file_name, line, error = %e, "row skipped");
                    report.add_error_with_params(&e.code(), &[file_name, line.to_string().as_str()]);
                }
            }
        }

        match profile {
            Profile::Teacher => self.store.link_teacher_subjects(self.structure.external_id()),
            Profile::Relative => self
                .store
                .link_relatives_to_classes(self.structure.external_id()),
            _ => {}
        }
        Ok(imported)
    }

    fn import_row(
        &mut self,
        profile: Profile,
        plan: &ColumnPlan,
        row: &[String],
        line: usize,
        file_name: &str,
    ) -> Result<(), FeedError> {
        let structure_id = self.structure.external_id().to_string();
        let mut record = PersonRecord::new(&structure_id, profile);
        let mut memberships = Memberships::default();

        if let Some(class) = self.structure.override_class() {
            memberships.classes.push(Membership {
                structure_id: structure_id.clone(),
                external_id: class.to_string(),
                discriminant: String::new(),
            });
        }

        let width = row.len().min(plan.len());
        for (idx, raw) in row.iter().take(width).enumerate() {
            let Some(column) = plan.get(idx) else {
                continue;
            };
            coerce_field(
                &mut record,
                &mut memberships,
                column,
                raw,
                self.structure,
                self.field_of_study,
            );
        }

        let (discriminant, seed) = self.discriminant(profile, &record, line);
        derive_external_id(&mut record, &discriminant, &structure_id, seed);
        if profile == Profile::Student {
            self.record_student(&record, &discriminant, seed);
        }

        // Units registered by this row reach the store even if the row is skipped below.
        for unit in self.structure.take_pending() {
            match unit.kind {
                UnitKind::Class => {
                    self.store
                        .create_class(&structure_id, &unit.external_id, &unit.name)
                }
                UnitKind::FunctionalGroup => {
                    self.store
                        .create_functional_group(&structure_id, &unit.external_id, &unit.name)
                }
            }
        }

        let children = if profile == Profile::Relative {
            Some(self.resolve_children(&record, line, file_name)?)
        } else {
            None
        };

        let Memberships { classes, groups } = memberships;
        match profile {
            Profile::Teacher => self.store.upsert_teacher(&record, &classes, &groups),
            Profile::Personnel => self.store.upsert_personnel(&record, &classes, &groups),
            Profile::Student => self.store.upsert_student(&record, &classes, &groups),
            Profile::Relative => self
                .store
                .upsert_relative(&record, &children.unwrap_or_default()),
            Profile::Guest => self.store.upsert_guest(&record, &classes),
        }
        Ok(())
    }

    /// Indexes a student for relative lookups. A student with a login is also
    /// reachable through the username-bearing key relatives of several children use.
    fn record_student(&mut self, record: &PersonRecord, discriminant: &str, seed: i64) {
        let Some(id) = record.external_id().map(str::to_string) else {
            return;
        };
        let structure_id = self.structure.external_id();
        let key = identity_key(record, discriminant, structure_id, seed);
        self.ctx.record_student(key, id.clone());

        let login = record.text("login").map(str::trim).filter(|l| !l.is_empty());
        if let Some(login) = login {
            if seed == self.ctx.seed() {
                let child = ChildRef {
                    username: Some(login),
                    last_name: record.text("lastName").unwrap_or(""),
                    first_name: record.text("firstName").unwrap_or(""),
                    class: discriminant,
                };
                self.ctx.record_student(mapping_key(structure_id, &child, seed), id);
            }
        }
    }

    /// A student with exactly one class hashes with that class and the run seed, so
    /// relatives can find it. Every other row hashes with its line index and the clock.
    /// Under an override class the student carries no `classes` value of its own;
    /// the override class stands in so those students stay linkable.
    fn discriminant(&self, profile: Profile, record: &PersonRecord, line: usize) -> (String, i64) {
        if profile == Profile::Student {
            let single_class = match (self.structure.override_class(), record.get("classes")) {
                (Some(class), _) => Some(class.to_string()),
                (None, Some(FieldValue::List(v))) if v.len() == 1 => Some(v[0].clone()),
                (None, Some(FieldValue::Text(s))) => Some(s.clone()),
                _ => None,
            };
            if let Some(class) = single_class {
                return (class, self.ctx.seed());
            }
        }
        (line.to_string(), chrono::Utc::now().timestamp_millis())
    }

    fn resolve_children(
        &self,
        record: &PersonRecord,
        line: usize,
        file_name: &str,
    ) -> Result<Vec<String>, FeedError> {
        if record.contains("childExternalId") {
            return Ok(record
                .values("childExternalId")
                .unwrap_or_default()
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect());
        }
        if !record.contains("childLastName") && !record.contains("childUsername") {
            return Ok(Vec::new());
        }

        let last_names = record.values("childLastName").unwrap_or_default();
        let first_names = record.values("childFirstName").unwrap_or_default();
        let classes = match self.structure.override_class() {
            Some(class) => vec![class.to_string(); first_names.len()],
            None => record.values("childClasses").unwrap_or_default(),
        };
        let usernames = record.values("childUsername");

        let n = last_names.len();
        let aligned = first_names.len() == n
            && classes.len() == n
            && usernames.as_ref().map(|u| u.len() == n).unwrap_or(true);
        if !aligned {
            return Err(FeedError::InvalidChildMapping {
                file: file_name.to_string(),
                line,
            });
        }

        let structure_id = self.structure.external_id();
        let seed = self.ctx.seed();
        let mut links = Vec::new();
        for j in 0..n {
            // The username segment only takes part when several children are described.
            let username = match &usernames {
                Some(u) if n > 1 => Some(u[j].as_str()),
                _ => None,
            };
            let child = ChildRef {
                username,
                last_name: &last_names[j],
                first_name: &first_names[j],
                class: &classes[j],
            };
            let key = mapping_key(structure_id, &child, seed);
            if let Some(id) = self.ctx.resolve_child(&key) {
                links.push(id.to_string());
            }
        }
        Ok(links)
    }
}

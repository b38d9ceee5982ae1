use super::IdentityStore;
use crate::feeder::coerce::Membership;
use crate::feeder::profile::Profile;
use crate::feeder::record::PersonRecord;
use crate::feeder::structure::{Structure, StructureDescriptor, UnitKind};
use anyhow::{anyhow, Context};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_FUNCTIONS: &[(&str, &str)] = &[
    ("SUPER_ADMIN", "SuperAdmin"),
    ("ADMIN_LOCAL", "AdminLocal"),
    ("CLASS_ADMIN", "ClassAdmin"),
];

// SQLite's default bound-parameter limit is 999.
const QUERY_CHUNK: usize = 500;

#[derive(Debug)]
struct UserOp {
    profile: Profile,
    record: PersonRecord,
    classes: Vec<Membership>,
    groups: Vec<Membership>,
    children: Vec<String>,
}

#[derive(Debug)]
enum PendingOp {
    Unit {
        kind: UnitKind,
        structure_id: String,
        external_id: String,
        name: String,
    },
    User(Box<UserOp>),
    TeacherSubjects { structure_id: String },
    RelativeClasses { structure_id: String },
    RestorePreDeleted { external_ids: Vec<String> },
    TagGroups { structure_id: String },
}

/// Identity graph stored in the workspace database.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
    source: String,
    pending: Vec<PendingOp>,
    seen: BTreeSet<String>,
}

fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection, source: &str) -> Self {
        Self {
            conn,
            source: source.to_string(),
            pending: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    fn push_user(
        &mut self,
        profile: Profile,
        record: &PersonRecord,
        classes: &[Membership],
        groups: &[Membership],
        children: &[String],
    ) {
        if let Some(id) = record.external_id() {
            self.seen.insert(id.to_string());
        }
        self.pending.push(PendingOp::User(Box::new(UserOp {
            profile,
            record: record.clone(),
            classes: classes.to_vec(),
            groups: groups.to_vec(),
            children: children.to_vec(),
        })));
    }

    fn apply(&self, tx: &Transaction<'_>, op: &PendingOp) -> anyhow::Result<()> {
        match op {
            PendingOp::Unit {
                kind,
                structure_id,
                external_id,
                name,
            } => {
                let sql = match kind {
                    UnitKind::Class => {
                        "INSERT OR IGNORE INTO classes(external_id, structure_id, name) VALUES(?, ?, ?)"
                    }
                    UnitKind::FunctionalGroup => {
                        "INSERT OR IGNORE INTO functional_groups(external_id, structure_id, name) VALUES(?, ?, ?)"
                    }
                };
                tx.execute(sql, (external_id, structure_id, name))?;
            }
            PendingOp::User(user) => self.apply_user(tx, user)?,
            PendingOp::TeacherSubjects { structure_id } => {
                apply_teacher_subjects(tx, structure_id)?
            }
            PendingOp::RelativeClasses { structure_id } => {
                let n = tx.execute(
                    "INSERT OR IGNORE INTO user_classes(user_external_id, class_external_id, structure_id, discriminant, inherited)
                     SELECT rl.relative_external_id, uc.class_external_id, uc.structure_id, '', 1
                     FROM relative_links rl
                     JOIN user_classes uc ON uc.user_external_id = rl.student_external_id AND uc.inherited = 0
                     WHERE uc.structure_id = ?",
                    [structure_id],
                )?;
                debug!(structure = %structure_id, links = n, "relatives attached to classes");
            }
            PendingOp::RestorePreDeleted { external_ids } => {
                let mut restored = 0usize;
                let mut stmt = tx.prepare(
                    "UPDATE users SET delete_date = NULL, disappearance_date = NULL
                     WHERE external_id = ? AND (delete_date IS NOT NULL OR disappearance_date IS NOT NULL)",
                )?;
                for id in external_ids {
                    restored += stmt.execute([id])?;
                }
                if restored > 0 {
                    info!(restored, "restored soft-deleted users");
                }
            }
            PendingOp::TagGroups { structure_id } => {
                for table in ["functional_groups", "classes"] {
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET structure_name = (SELECT name FROM structures WHERE external_id = ?1)
                             WHERE structure_id = ?1"
                        ),
                        [structure_id],
                    )?;
                }
            }
        }
        Ok(())
    }

    fn apply_user(&self, tx: &Transaction<'_>, user: &UserOp) -> anyhow::Result<()> {
        let external_id = user
            .record
            .external_id()
            .ok_or_else(|| anyhow!("user record without externalId"))?;
        let now = now_string();
        let incoming = match user.record.to_json() {
            Value::Object(m) => m,
            _ => Map::new(),
        };

        let existing: Option<String> = tx
            .query_row(
                "SELECT properties FROM users WHERE external_id = ?",
                [external_id],
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(raw) => {
                let mut merged = serde_json::from_str::<Value>(&raw)
                    .ok()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default();
                for (k, v) in incoming {
                    merged.insert(k, v);
                }
                tx.execute(
                    "UPDATE users SET profile = ?, source = ?, properties = ?, modified_at = ?
                     WHERE external_id = ?",
                    (
                        user.profile.name(),
                        &self.source,
                        Value::Object(merged).to_string(),
                        &now,
                        external_id,
                    ),
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO users(id, external_id, profile, source, properties, created_at, modified_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        external_id,
                        user.profile.name(),
                        &self.source,
                        Value::Object(incoming).to_string(),
                        &now,
                        &now,
                    ),
                )?;
            }
        }

        for structure_id in user.record.values("structures").unwrap_or_default() {
            tx.execute(
                "INSERT OR IGNORE INTO user_structures(user_external_id, structure_id) VALUES(?, ?)",
                (external_id, &structure_id),
            )?;
        }
        for m in &user.classes {
            tx.execute(
                "INSERT OR IGNORE INTO user_classes(user_external_id, class_external_id, structure_id, discriminant, inherited)
                 VALUES(?, ?, ?, ?, 0)",
                (external_id, &m.external_id, &m.structure_id, &m.discriminant),
            )
            .with_context(|| format!("class {} for {}", m.external_id, external_id))?;
        }
        for m in &user.groups {
            tx.execute(
                "INSERT OR IGNORE INTO user_groups(user_external_id, group_external_id, structure_id, discriminant)
                 VALUES(?, ?, ?, ?)",
                (external_id, &m.external_id, &m.structure_id, &m.discriminant),
            )
            .with_context(|| format!("group {} for {}", m.external_id, external_id))?;
        }
        for child in &user.children {
            tx.execute(
                "INSERT OR IGNORE INTO relative_links(relative_external_id, student_external_id) VALUES(?, ?)",
                (external_id, child),
            )?;
        }
        Ok(())
    }
}

fn apply_teacher_subjects(tx: &Transaction<'_>, structure_id: &str) -> anyhow::Result<()> {
    let teachers = {
        let mut stmt = tx.prepare(
            "SELECT u.external_id, u.properties
             FROM users u
             JOIN user_structures us ON us.user_external_id = u.external_id
             WHERE us.structure_id = ? AND u.profile = 'Teacher'",
        )?;
        let rows = stmt
            .query_map([structure_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let prefix = format!("{}$", structure_id);
    for (teacher_id, raw) in teachers {
        let props: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
        let subjects = props
            .get("subjectTaught")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for subject in subjects.iter().filter_map(|v| v.as_str()) {
            let Some(code) = subject.strip_prefix(&prefix) else {
                continue;
            };
            tx.execute(
                "INSERT OR IGNORE INTO subjects(external_id, structure_id, code, label) VALUES(?, ?, ?, ?)",
                (subject, structure_id, code, code),
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO teacher_subjects(user_external_id, subject_external_id) VALUES(?, ?)",
                (&teacher_id, subject),
            )?;
        }
    }
    Ok(())
}

impl IdentityStore for SqliteStore<'_> {
    fn ensure_profiles(&mut self) -> anyhow::Result<()> {
        for p in Profile::ALL {
            self.conn.execute(
                "INSERT OR IGNORE INTO profiles(external_id, name) VALUES(?, ?)",
                (p.external_id(), p.name()),
            )?;
        }
        for (id, name) in DEFAULT_FUNCTIONS {
            self.conn.execute(
                "INSERT OR IGNORE INTO functions(external_id, name) VALUES(?, ?)",
                (id, name),
            )?;
        }
        Ok(())
    }

    fn field_of_study(&self) -> anyhow::Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, external_id FROM field_of_study")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    fn upsert_structure(&mut self, descriptor: &StructureDescriptor) -> anyhow::Result<Structure> {
        let now = now_string();
        let sid = descriptor.external_id.as_str();
        self.conn
            .execute(
                "INSERT INTO structures(external_id, name, override_class, created_at, modified_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(external_id) DO UPDATE SET
                   name = excluded.name,
                   override_class = excluded.override_class,
                   modified_at = excluded.modified_at",
                (sid, &descriptor.name, &descriptor.override_class, &now, &now),
            )
            .with_context(|| format!("failed to upsert structure {}", sid))?;

        let mut structure = Structure::new(sid, &descriptor.name);
        structure.set_override_class(descriptor.override_class.clone());

        let mut stmt = self
            .conn
            .prepare("SELECT external_id, name FROM classes WHERE structure_id = ?")?;
        for row in stmt.query_map([sid], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))? {
            let (id, name) = row?;
            structure.load_class(id, name);
        }
        let mut stmt = self
            .conn
            .prepare("SELECT external_id, name FROM functional_groups WHERE structure_id = ?")?;
        for row in stmt.query_map([sid], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))? {
            let (id, name) = row?;
            structure.load_group(id, name);
        }

        if let Some(class) = descriptor.override_class.as_deref() {
            let local = class.strip_prefix(&format!("{}$", sid)).unwrap_or(class);
            self.conn.execute(
                "INSERT OR IGNORE INTO classes(external_id, structure_id, name) VALUES(?, ?, ?)",
                (class, sid, local),
            )?;
            structure.load_class(class.to_string(), local.to_string());
        }
        Ok(structure)
    }

    fn create_class(&mut self, structure_id: &str, external_id: &str, name: &str) {
        self.pending.push(PendingOp::Unit {
            kind: UnitKind::Class,
            structure_id: structure_id.to_string(),
            external_id: external_id.to_string(),
            name: name.to_string(),
        });
    }

    fn create_functional_group(&mut self, structure_id: &str, external_id: &str, name: &str) {
        self.pending.push(PendingOp::Unit {
            kind: UnitKind::FunctionalGroup,
            structure_id: structure_id.to_string(),
            external_id: external_id.to_string(),
            name: name.to_string(),
        });
    }

    fn upsert_student(&mut self, record: &PersonRecord, classes: &[Membership], groups: &[Membership]) {
        self.push_user(Profile::Student, record, classes, groups, &[]);
    }

    fn upsert_teacher(&mut self, record: &PersonRecord, classes: &[Membership], groups: &[Membership]) {
        self.push_user(Profile::Teacher, record, classes, groups, &[]);
    }

    fn upsert_personnel(&mut self, record: &PersonRecord, classes: &[Membership], groups: &[Membership]) {
        self.push_user(Profile::Personnel, record, classes, groups, &[]);
    }

    fn upsert_guest(&mut self, record: &PersonRecord, classes: &[Membership]) {
        self.push_user(Profile::Guest, record, classes, &[], &[]);
    }

    fn upsert_relative(&mut self, record: &PersonRecord, children: &[String]) {
        self.push_user(Profile::Relative, record, &[], &[], children);
    }

    fn query_authoritative_ids(
        &self,
        external_ids: &[String],
        sources: &[String],
    ) -> anyhow::Result<Vec<String>> {
        if external_ids.is_empty() || sources.is_empty() {
            return Ok(Vec::new());
        }
        let source_marks = vec!["?"; sources.len()].join(", ");
        let mut found = BTreeSet::new();
        for chunk in external_ids.chunks(QUERY_CHUNK) {
            let id_marks = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT external_id FROM users
                 WHERE external_id IN ({id_marks})
                   AND source IN ({source_marks})
                   AND delete_date IS NULL
                   AND disappearance_date IS NULL"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let params = chunk.iter().chain(sources.iter());
            let ids = stmt
                .query_map(params_from_iter(params), |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(ids);
        }
        Ok(found.into_iter().collect())
    }

    fn link_teacher_subjects(&mut self, structure_id: &str) {
        self.pending.push(PendingOp::TeacherSubjects {
            structure_id: structure_id.to_string(),
        });
    }

    fn link_relatives_to_classes(&mut self, structure_id: &str) {
        self.pending.push(PendingOp::RelativeClasses {
            structure_id: structure_id.to_string(),
        });
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.pending);
        let tx = self.conn.unchecked_transaction()?;
        for op in &ops {
            self.apply(&tx, op)?;
        }
        tx.commit()?;
        debug!(ops = ops.len(), "flushed pending operations");
        Ok(())
    }

    fn restore_pre_deleted_users(&mut self) {
        self.pending.push(PendingOp::RestorePreDeleted {
            external_ids: self.seen.iter().cloned().collect(),
        });
    }

    fn tag_groups_with_structure_name(&mut self, structure_id: &str) {
        self.pending.push(PendingOp::TagGroups {
            structure_id: structure_id.to_string(),
        });
    }
}

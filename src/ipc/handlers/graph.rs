use crate::feeder::profile::Profile;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn str_list(conn: &Connection, sql: &str, key: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([key], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn units_json(conn: &Connection, table: &str, structure_id: &str) -> rusqlite::Result<Vec<Value>> {
    let sql = format!(
        "SELECT external_id, name, structure_name FROM {table}
         WHERE structure_id = ? ORDER BY external_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([structure_id], |r| {
            Ok(json!({
                "externalId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "structureName": r.get::<_, Option<String>>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_structures_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "structures": [] }));
    };

    // Correlated subqueries keep each count independent of the others.
    let mut stmt = match conn.prepare(
        "SELECT
           s.external_id,
           s.name,
           s.override_class,
           (SELECT COUNT(*) FROM classes c WHERE c.structure_id = s.external_id) AS class_count,
           (SELECT COUNT(*) FROM functional_groups g WHERE g.structure_id = s.external_id) AS group_count,
           (SELECT COUNT(*) FROM user_structures us WHERE us.structure_id = s.external_id) AS user_count
         FROM structures s
         ORDER BY s.external_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "externalId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "overrideClass": r.get::<_, Option<String>>(2)?,
                "classCount": r.get::<_, i64>(3)?,
                "groupCount": r.get::<_, i64>(4)?,
                "userCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(structures) => ok(&req.id, json!({ "structures": structures })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_structures_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(external_id) = req.params.get("externalId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing externalId", None);
    };

    let row: Option<(String, Option<String>)> = match conn
        .query_row(
            "SELECT name, override_class FROM structures WHERE external_id = ?",
            [external_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((name, override_class)) = row else {
        return err(&req.id, "not_found", "structure not found", None);
    };

    let details = units_json(conn, "classes", external_id).and_then(|classes| {
        let groups = units_json(conn, "functional_groups", external_id)?;
        let subjects = str_list(
            conn,
            "SELECT external_id FROM subjects WHERE structure_id = ? ORDER BY external_id",
            external_id,
        )?;
        Ok((classes, groups, subjects))
    });
    match details {
        Ok((classes, groups, subjects)) => ok(
            &req.id,
            json!({
                "externalId": external_id,
                "name": name,
                "overrideClass": override_class,
                "classes": classes,
                "groups": groups,
                "subjects": subjects,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };
    let structure_id = req.params.get("structureId").and_then(|v| v.as_str());
    let profile = match req.params.get("profile").and_then(|v| v.as_str()) {
        Some(p) => match Profile::parse(p) {
            Some(p) => Some(p.name()),
            None => return err(&req.id, "bad_params", "unknown profile", None),
        },
        None => None,
    };

    let mut stmt = match conn.prepare(
        "SELECT u.external_id, u.profile, u.source, u.properties, u.delete_date
         FROM users u
         WHERE (?1 IS NULL OR EXISTS (
                 SELECT 1 FROM user_structures us
                 WHERE us.user_external_id = u.external_id AND us.structure_id = ?1))
           AND (?2 IS NULL OR u.profile = ?2)
         ORDER BY u.external_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((structure_id, profile), |r| {
            let props: Value =
                serde_json::from_str(&r.get::<_, String>(3)?).unwrap_or(Value::Null);
            Ok(json!({
                "externalId": r.get::<_, String>(0)?,
                "profile": r.get::<_, String>(1)?,
                "source": r.get::<_, String>(2)?,
                "lastName": props.get("lastName").cloned().unwrap_or(Value::Null),
                "firstName": props.get("firstName").cloned().unwrap_or(Value::Null),
                "deleted": r.get::<_, Option<String>>(4)?.is_some(),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn memberships_json(conn: &Connection, sql: &str, user_id: &str) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([user_id], |r| {
            Ok(json!({
                "externalId": r.get::<_, String>(0)?,
                "discriminant": r.get::<_, String>(1)?,
                "inherited": r.get::<_, i64>(2)? != 0,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_users_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(external_id) = req.params.get("externalId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing externalId", None);
    };

    type UserRow = (String, String, String, Option<String>, Option<String>);
    let row: Option<UserRow> = match conn
        .query_row(
            "SELECT profile, source, properties, delete_date, disappearance_date
             FROM users WHERE external_id = ?",
            [external_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((profile, source, properties, delete_date, disappearance_date)) = row else {
        return err(&req.id, "not_found", "user not found", None);
    };
    let properties: Value = serde_json::from_str(&properties).unwrap_or(Value::Null);

    let links = (|| -> rusqlite::Result<Value> {
        let structures = str_list(
            conn,
            "SELECT structure_id FROM user_structures WHERE user_external_id = ? ORDER BY structure_id",
            external_id,
        )?;
        let classes = memberships_json(
            conn,
            "SELECT class_external_id, discriminant, inherited FROM user_classes
             WHERE user_external_id = ? ORDER BY class_external_id, discriminant",
            external_id,
        )?;
        let groups = memberships_json(
            conn,
            "SELECT group_external_id, discriminant, 0 FROM user_groups
             WHERE user_external_id = ? ORDER BY group_external_id, discriminant",
            external_id,
        )?;
        let children = str_list(
            conn,
            "SELECT student_external_id FROM relative_links
             WHERE relative_external_id = ? ORDER BY student_external_id",
            external_id,
        )?;
        let relatives = str_list(
            conn,
            "SELECT relative_external_id FROM relative_links
             WHERE student_external_id = ? ORDER BY relative_external_id",
            external_id,
        )?;
        let subjects = str_list(
            conn,
            "SELECT subject_external_id FROM teacher_subjects
             WHERE user_external_id = ? ORDER BY subject_external_id",
            external_id,
        )?;
        Ok(json!({
            "structures": structures,
            "classes": classes,
            "groups": groups,
            "children": children,
            "relatives": relatives,
            "subjects": subjects,
        }))
    })();
    let links = match links {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut result = json!({
        "externalId": external_id,
        "profile": profile,
        "source": source,
        "properties": properties,
        "deleteDate": delete_date,
        "disappearanceDate": disappearance_date,
    });
    if let (Some(obj), Value::Object(links)) = (result.as_object_mut(), links) {
        obj.extend(links);
    }
    ok(&req.id, result)
}

fn handle_users_mark_deleted(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(ids) = req.params.get("externalIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "externalIds must be an array", None);
    };
    let ids: Vec<&str> = ids.iter().filter_map(|v| v.as_str()).collect();

    let now = chrono::Utc::now().to_rfc3339();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let mut updated = 0usize;
    for id in ids {
        match tx.execute(
            "UPDATE users SET delete_date = ? WHERE external_id = ? AND delete_date IS NULL",
            (&now, id),
        ) {
            Ok(n) => updated += n,
            Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "updated": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "structures.list" => Some(handle_structures_list(state, req)),
        "structures.get" => Some(handle_structures_get(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.get" => Some(handle_users_get(state, req)),
        "users.markDeleted" => Some(handle_users_mark_deleted(state, req)),
        _ => None,
    }
}

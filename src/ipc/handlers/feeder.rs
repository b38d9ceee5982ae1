use crate::config::FeederSettings;
use crate::feeder::columns::ColumnsMapping;
use crate::feeder::{CsvFeeder, ImportOptions};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, None)
    }
}

fn get_required_path(params: &Value) -> Result<PathBuf, HandlerErr> {
    params
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing path".into(),
        })
}

fn get_columns_mapping(params: &Value) -> Result<Option<ColumnsMapping>, HandlerErr> {
    match params.get("columnsMapping") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|_| HandlerErr {
                code: "bad_params",
                message: "columnsMapping must map profile -> header -> field".into(),
            }),
    }
}

fn load_settings(conn: &Connection) -> Result<FeederSettings, HandlerErr> {
    FeederSettings::load(conn).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: format!("{e:#}"),
    })
}

fn import_options(settings: &FeederSettings, params: &Value) -> Result<ImportOptions, HandlerErr> {
    let request_mapping = get_columns_mapping(params)?;
    let override_class = params
        .get("overrideClass")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(ImportOptions {
        columns_mapping: settings.columns_mapping_with(request_mapping.as_ref()),
        override_class,
        authoritative_sources: settings.authoritative_sources.clone(),
    })
}

fn handle_import_csv(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let prepared = get_required_path(&req.params).and_then(|path| {
        let settings = load_settings(conn)?;
        let options = import_options(&settings, &req.params)?;
        Ok((path, settings, options))
    });
    let (path, settings, options) = match prepared {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut store = SqliteStore::new(conn, &settings.source);
    let outcome = CsvFeeder::new(options).launch(&mut store, &path);
    let report = serde_json::to_value(&outcome.report).unwrap_or(Value::Null);
    match outcome.result {
        Ok(()) => ok(&req.id, json!({ "status": "ok", "report": report })),
        Err(e) => err(
            &req.id,
            &e.code(),
            e.to_string(),
            Some(json!({ "file": e.file(), "report": report })),
        ),
    }
}

fn handle_check_external_ids(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let prepared = get_required_path(&req.params).and_then(|path| {
        let settings = load_settings(conn)?;
        let options = import_options(&settings, &req.params)?;
        Ok((path, settings, options))
    });
    let (path, settings, options) = match prepared {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let store = SqliteStore::new(conn, &settings.source);
    match CsvFeeder::new(options).check(&store, &path) {
        Ok(()) => ok(&req.id, json!({ "status": "ok" })),
        Err(e) => err(&req.id, &e.code(), e.to_string(), None),
    }
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match load_settings(conn) {
        Ok(s) => ok(&req.id, json!({ "settings": s })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_settings(conn) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    if let Err(msg) = current.merge_patch(patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = current.save(conn) {
        return err(&req.id, "db_update_failed", format!("{e:#}"), None);
    }
    ok(&req.id, json!({ "settings": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "feeder.importCsv" => Some(handle_import_csv(state, req)),
        "feeder.checkExternalIds" => Some(handle_check_external_ids(state, req)),
        "feeder.settings.get" => Some(handle_settings_get(state, req)),
        "feeder.settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}

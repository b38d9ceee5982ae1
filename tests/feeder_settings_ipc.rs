mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{
    request, request_err, request_ok, select_workspace, spawn_sidecar, temp_dir, write_structure,
};

#[test]
fn router_smoke_and_workspace_requirement() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(health["workspacePath"], serde_json::Value::Null);

    let e = request_err(&mut stdin, &mut reader, "x", "feeder.unknown", json!({}));
    assert_eq!(e["code"], "not_implemented");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "nows",
        "feeder.importCsv",
        json!({ "path": "/nowhere" }),
    );
    assert_eq!(e["code"], "no_workspace");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    std::io::BufRead::read_line(&mut reader, &mut line).expect("read");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(v["error"]["code"], "bad_json");

    let workspace = temp_dir("feederd-smoke-ws");
    select_workspace(&mut stdin, &mut reader, &workspace);
    assert!(workspace.join("feeder.sqlite3").is_file());
    let e = request_err(&mut stdin, &mut reader, "np", "feeder.importCsv", json!({}));
    assert_eq!(e["code"], "bad_params");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "ng",
        "users.get",
        json!({ "externalId": "nobody" }),
    );
    assert_eq!(e["code"], "not_found");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "bp",
        "users.list",
        json!({ "profile": "Alumni" }),
    );
    assert_eq!(e["code"], "bad_params");
}

#[test]
fn settings_defaults_update_and_validation() {
    let workspace = temp_dir("feederd-settings-ws");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let got = request_ok(&mut stdin, &mut reader, "g1", "feeder.settings.get", json!({}));
    assert_eq!(
        got["settings"],
        json!({ "columnsMapping": {}, "authoritativeSources": ["AAF", "AAF1D"], "source": "CSV" })
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "bad",
        "feeder.settings.update",
        json!({ "patch": { "source": "" } }),
    );
    assert_eq!(e["code"], "bad_params");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "bad2",
        "feeder.settings.update",
        json!({ "patch": { "colour": "blue" } }),
    );
    assert_eq!(e["code"], "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "feeder.settings.update",
        json!({ "patch": { "source": "ENT-CSV" } }),
    );
    let got = request_ok(&mut stdin, &mut reader, "g2", "feeder.settings.get", json!({}));
    assert_eq!(got["settings"]["source"], "ENT-CSV");
    assert_eq!(got["settings"]["authoritativeSources"], json!(["AAF", "AAF1D"]));
}

#[test]
fn persisted_and_request_column_mappings_apply() {
    let workspace = temp_dir("feederd-mapping-ws");
    let root = temp_dir("feederd-mapping-root");
    write_structure(
        &root,
        "S1",
        &[(
            "Student.csv",
            "Code élève;Nom;Prénom;Div.;Remarque\nE9;Martin;Léa;4B;calme\n",
        )],
    );
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "map",
        "feeder.settings.update",
        json!({ "patch": {
            "columnsMapping": { "Student": { "Code élève": "externalId", "Div.": "classes" } },
            "source": "TABLEUR"
        } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "feeder.importCsv",
        json!({
            "path": root.to_string_lossy(),
            "columnsMapping": { "Student": { "Remarque": "ignore" } }
        }),
    );

    let e9 = request_ok(
        &mut stdin,
        &mut reader,
        "e9",
        "users.get",
        json!({ "externalId": "E9" }),
    );
    assert_eq!(e9["source"], "TABLEUR");
    assert_eq!(e9["properties"]["classes"], json!(["S1$4B"]));
    assert_eq!(e9["properties"]["lastName"], "Martin");
    assert!(e9["properties"].get("Remarque").is_none());

    // The request mapping is not persisted.
    let got = request_ok(&mut stdin, &mut reader, "g", "feeder.settings.get", json!({}));
    assert!(got["settings"]["columnsMapping"]["Student"].get("Remarque").is_none());

    let bad = request(
        &mut stdin,
        &mut reader,
        "badmap",
        "feeder.importCsv",
        json!({ "path": root.to_string_lossy(), "columnsMapping": ["nope"] }),
    );
    assert_eq!(bad["error"]["code"], "bad_params");
}

mod test_support;

use serde_json::json;
use test_support::{
    external_id, find_by_first_name, request_ok, select_workspace, spawn_sidecar, temp_dir,
    users_of, write_structure,
};

#[test]
fn override_class_replaces_class_columns() {
    let workspace = temp_dir("feederd-override-ws");
    let root = temp_dir("feederd-override-root");
    write_structure(
        &root,
        "S1_Ecole",
        &[
            ("Student.csv", "Nom;Prénom;Classe\nMartin;Léa;6A\nDurand;Tom;5B\n"),
            (
                "Relative.csv",
                "Nom;Prénom;Nom enfant;Prénom enfant\nMartin;Paul;Martin;Léa\n",
            ),
        ],
    );
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "feeder.importCsv",
        json!({ "path": root.to_string_lossy(), "overrideClass": "S1$CP" }),
    );

    let structure = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "structures.get",
        json!({ "externalId": "S1" }),
    );
    assert_eq!(structure["overrideClass"], "S1$CP");
    assert_eq!(
        structure["classes"],
        json!([{ "externalId": "S1$CP", "name": "CP", "structureName": "Ecole" }])
    );

    let students = users_of(&mut stdin, &mut reader, json!({ "profile": "Student" }));
    assert_eq!(students.len(), 2);
    let lea_id = external_id(find_by_first_name(&students, "Léa"));
    for s in &students {
        let user = request_ok(
            &mut stdin,
            &mut reader,
            "u",
            "users.get",
            json!({ "externalId": s["externalId"] }),
        );
        assert_eq!(
            user["classes"],
            json!([{ "externalId": "S1$CP", "discriminant": "", "inherited": false }])
        );
        assert!(user["properties"].get("classes").is_none());
    }

    let relatives = users_of(&mut stdin, &mut reader, json!({ "profile": "Relative" }));
    let paul = request_ok(
        &mut stdin,
        &mut reader,
        "paul",
        "users.get",
        json!({ "externalId": relatives[0]["externalId"] }),
    );
    assert_eq!(paul["children"], json!([lea_id]));
}

#[test]
fn mismatched_child_columns_skip_only_that_row() {
    let workspace = temp_dir("feederd-childmap-ws");
    let root = temp_dir("feederd-childmap-root");
    write_structure(
        &root,
        "S1",
        &[
            ("Student.csv", "Nom;Prénom;Classe\nMartin;Léa;6A\n"),
            (
                "Relative.csv",
                "Nom;Prénom;Nom enfant;Prénom enfant;Classe enfant;Nom enfant;Prénom enfant;Nom enfant\n\
                 Martin;Paul;Martin;Léa;6A;Martin;Zoé;Martin\n\
                 Martin;Julie;Martin;Léa;6A;;;\n",
            ),
        ],
    );
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "feeder.importCsv",
        json!({ "path": root.to_string_lossy() }),
    );
    assert_eq!(
        res["report"]["errors"],
        json!([
            { "code": "invalid.child.mapping", "params": ["Relative.csv", "1"] },
            { "code": "invalid.child.mapping", "params": ["Relative.csv", "2"] }
        ])
    );
    assert_eq!(res["report"]["profiles"], json!({ "Relative": 0, "Student": 1 }));
    assert!(users_of(&mut stdin, &mut reader, json!({ "profile": "Relative" })).is_empty());
}

#[test]
fn relative_trailer_block_ends_the_file() {
    let workspace = temp_dir("feederd-trailer-ws");
    let root = temp_dir("feederd-trailer-root");
    write_structure(
        &root,
        "S1",
        &[(
            "Relative.csv",
            "Id;Nom;Prénom\nR1;Martin;Paul\n;;\nIntitulé;Adresse Organisme;Téléphone\nMairie;1 place;0102\n",
        )],
    );
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "feeder.importCsv",
        json!({ "path": root.to_string_lossy() }),
    );
    assert_eq!(res["report"]["profiles"], json!({ "Relative": 1 }));
    assert_eq!(res["report"]["errors"], json!([]));
}

#[test]
fn reimport_restores_soft_deleted_users() {
    let workspace = temp_dir("feederd-restore-ws");
    let root = temp_dir("feederd-restore-root");
    write_structure(
        &root,
        "S1",
        &[("Personnel.csv", "Id;Nom;Prénom;Fonction\nP1;Gardien;Jean;ENTRETIEN\nP2;Secr;Anne;SECRETARIAT\n")],
    );
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "imp1",
        "feeder.importCsv",
        json!({ "path": root.to_string_lossy() }),
    );
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "users.markDeleted",
        json!({ "externalIds": ["P1", "P2", "missing"] }),
    );
    assert_eq!(marked["updated"], 2);
    let p1 = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "users.get",
        json!({ "externalId": "P1" }),
    );
    assert!(p1["deleteDate"].is_string());

    // Only P1 reappears.
    std::fs::write(
        root.join("S1").join("Personnel.csv"),
        "Id;Nom;Prénom;Fonction\nP1;Gardien;Jean;ENTRETIEN\n",
    )
    .expect("rewrite file");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "imp2",
        "feeder.importCsv",
        json!({ "path": root.to_string_lossy() }),
    );
    let users = users_of(&mut stdin, &mut reader, json!({ "structureId": "S1" }));
    let deleted: Vec<(&str, bool)> = users
        .iter()
        .map(|u| {
            (
                u["externalId"].as_str().unwrap_or(""),
                u["deleted"].as_bool().unwrap_or(false),
            )
        })
        .collect();
    assert_eq!(deleted, vec![("P1", false), ("P2", true)]);

    let p1 = request_ok(
        &mut stdin,
        &mut reader,
        "p1b",
        "users.get",
        json!({ "externalId": "P1" }),
    );
    assert_eq!(p1["properties"]["functions"], json!(["S1$ENTRETIEN"]));
}

#[test]
fn relative_links_several_children_named_by_login() {
    let workspace = temp_dir("feederd-login-ws");
    let root = temp_dir("feederd-login-root");
    write_structure(
        &root,
        "S1",
        &[
            (
                "Student.csv",
                "Login;Nom;Prénom;Classe\nlea.martin;Martin;Léa;6A\ntom.martin;Martin;Tom;6A\n",
            ),
            (
                "Relative.csv",
                "Nom;Prénom;Login enfant;Nom enfant;Prénom enfant;Classe enfant;Login enfant;Nom enfant;Prénom enfant;Classe enfant\n\
                 Martin;Paul;lea.martin;Martin;Léa;6A;tom.martin;Martin;Tom;6A\n",
            ),
        ],
    );
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "feeder.importCsv",
        json!({ "path": root.to_string_lossy() }),
    );
    assert_eq!(res["report"]["errors"], json!([]));

    let students = users_of(&mut stdin, &mut reader, json!({ "profile": "Student" }));
    let lea_id = external_id(find_by_first_name(&students, "Léa"));
    let tom_id = external_id(find_by_first_name(&students, "Tom"));
    let relatives = users_of(&mut stdin, &mut reader, json!({ "profile": "Relative" }));
    let paul = request_ok(
        &mut stdin,
        &mut reader,
        "paul",
        "users.get",
        json!({ "externalId": relatives[0]["externalId"] }),
    );
    let mut children: Vec<String> = paul["children"]
        .as_array()
        .expect("children")
        .iter()
        .filter_map(|c| c.as_str().map(str::to_string))
        .collect();
    children.sort();
    let mut expected = vec![lea_id, tom_id];
    expected.sort();
    assert_eq!(children, expected);
}

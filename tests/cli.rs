mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, messages, of_type};
use mail_csv_tap::{checkpoint::State, schema::Catalog};
use predicates::str::contains;
use serde_json::json;

const JAN_2: i64 = 1_609_545_600_000;
const JAN_3: i64 = 1_609_632_000_000;

fn people_table() -> serde_json::Value {
    json!({ "name": "people", "pattern": "people.*\\.csv$", "key_properties": ["id"], "format": "csv" })
}

fn seed_mailbox(workspace: &TestWorkspace) {
    workspace.write(
        "files/people-1.csv",
        "id,First Name,Last Name\n1,Michael,Bluth\n3,Tobias,Fünke\n",
    );
    workspace.write("files/people-2.csv", "id,First Name,Last Name\n4,Lindsay,Bluth\n");
    let manifest = json!({
        "messages": [
            {
                "id": "b", "internal_date": JAN_3,
                "attachments": [ { "name": "people-2.csv", "path": "files/people-2.csv" } ]
            },
            {
                "id": "a", "internal_date": JAN_2, "subject": "Weekly export",
                "attachments": [
                    { "name": "people-1.csv", "path": "files/people-1.csv" },
                    { "name": "notes.txt", "path": "files/notes.txt" }
                ]
            }
        ]
    });
    workspace.write("mailbox.json", &manifest.to_string());
}

fn tap() -> Command {
    Command::cargo_bin("mail-csv-tap").expect("binary exists")
}

#[test]
fn sync_emits_messages_and_writes_state() {
    let workspace = TestWorkspace::new();
    seed_mailbox(&workspace);
    let config = workspace.write_config(json!([people_table()]));
    let state_path = workspace.path().join("state.json");

    let output = tap()
        .args(["sync", "-c", config.to_str().unwrap()])
        .arg("--state-output")
        .arg(&state_path)
        .output()
        .expect("run sync");
    assert!(output.status.success());

    let messages = messages(&output.stdout);
    assert_eq!(of_type(&messages, "SCHEMA").len(), 1);
    let records = of_type(&messages, "RECORD");
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["record"]["first_name"], "Michael");
    assert_eq!(records[2]["record"]["_email_source_file"], "people-2.csv");
    assert_eq!(records[2]["record"]["_email_source_address"], common::ACCOUNT);
    assert_eq!(of_type(&messages, "STATE").len(), 2);

    let state = State::load(&state_path).expect("state written");
    assert_eq!(
        state.bookmark("people").map(|ts| ts.timestamp_millis()),
        Some(JAN_3)
    );
}

#[test]
fn sync_resumes_from_state() {
    let workspace = TestWorkspace::new();
    seed_mailbox(&workspace);
    let config = workspace.write_config(json!([people_table()]));
    let state = workspace.write(
        "state.json",
        r#"{"people":{"modified_since":"2021-01-02T00:00:00Z"}}"#,
    );

    let output = tap()
        .args(["sync", "-c", config.to_str().unwrap(), "-s", state.to_str().unwrap()])
        .output()
        .expect("run sync");
    assert!(output.status.success());
    let messages = messages(&output.stdout);
    let records = of_type(&messages, "RECORD");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["record"]["first_name"], "Lindsay");
}

#[test]
fn discover_writes_a_catalog_that_sync_accepts() {
    let workspace = TestWorkspace::new();
    seed_mailbox(&workspace);
    let config = workspace.write_config(json!([people_table()]));
    let catalog_path = workspace.path().join("catalog.json");

    tap()
        .args(["discover", "-c", config.to_str().unwrap(), "-o"])
        .arg(&catalog_path)
        .assert()
        .success();

    let catalog: Catalog =
        serde_json::from_str(&fs::read_to_string(&catalog_path).unwrap()).expect("catalog json");
    let entry = catalog.find("people").expect("people stream");
    assert_eq!(entry.key_properties, Some(vec!["id".to_string()]));
    assert_eq!(entry.schema["properties"]["id"]["type"], json!(["integer"]));

    let output = tap()
        .args(["sync", "-c", config.to_str().unwrap(), "--catalog"])
        .arg(&catalog_path)
        .output()
        .expect("run sync");
    assert!(output.status.success());
    let messages = messages(&output.stdout);
    assert_eq!(messages[0]["schema"], entry.schema);
    assert_eq!(of_type(&messages, "RECORD").len(), 3);
}

#[test]
fn yaml_config_is_accepted() {
    let workspace = TestWorkspace::new();
    seed_mailbox(&workspace);
    let config = workspace.write(
        "tap.yml",
        "email_address: reports@example.com\n\
         start_date: 2020-01-01T00:00:00Z\n\
         mailbox: mailbox.json\n\
         tables:\n  - name: people\n    pattern: 'people.*\\.csv$'\n    key_properties: [id]\n    format: csv\n",
    );
    tap()
        .args(["sync", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("\"type\":\"RECORD\""));
}

#[test]
fn failing_table_sets_exit_status_but_others_still_sync() {
    let workspace = TestWorkspace::new();
    seed_mailbox(&workspace);
    let config = workspace.write_config(json!([
        { "name": "broken", "pattern": "people", "key_properties": ["id"], "format": "parquet" },
        people_table()
    ]));
    tap()
        .args(["sync", "-c", config.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(contains("\"stream\":\"people\""))
        .stderr(contains("Sync failed for table(s): broken"));
}

#[test]
fn missing_config_reports_an_error() {
    let workspace = TestWorkspace::new();
    let missing = workspace.path().join("nope.json");
    tap()
        .args(["sync", "-c", missing.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("error: Opening config file"));
}

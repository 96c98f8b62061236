use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

#[test]
fn compile_prints_rule_summary() -> Result<(), Box<dyn std::error::Error>> {
    #[allow(deprecated)]
    let assert = Command::cargo_bin("twin")?
        .args(["compile", "insert into room select sensor.temp as temp, hvac.mode as mode"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let value: Value = serde_json::from_str(&stdout)?;
    assert_eq!(value["target"], "room");
    assert_eq!(value["sources"], serde_json::json!(["sensor", "hvac"]));
    assert_eq!(value["tentacles"]["sensor"], serde_json::json!(["temp"]));
    Ok(())
}

#[test]
fn compile_rejects_bad_rule() -> Result<(), Box<dyn std::error::Error>> {
    #[allow(deprecated)]
    Command::cargo_bin("twin")?
        .args(["compile", "insert into"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("compile"));
    Ok(())
}

#[test]
fn run_propagates_to_target() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("mappers.yaml"),
        r#"
- id: m1
  entity_id: device123
  tql: insert into device123 select device234.temp as temp
"#,
    )?;
    fs::write(
        dir.path().join("messages.jsonl"),
        r#"{"entity_id": "device234", "owner": "admin", "type": "DEVICE", "properties": {"temp": 50}}

{"entity_id": "device234", "operator": "merge", "properties": {"meta": {"site": "b1"}}}
"#,
    )?;
    fs::write(
        dir.path().join("twin.yml"),
        r#"
actor:
  mailbox_capacity: 4
pool:
  size: 8
"#,
    )?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("twin")?
        .current_dir(dir.path())
        .env_remove("TWIN_CONFIG")
        .args([
            "run",
            "--config",
            "twin.yml",
            "--mappers",
            "mappers.yaml",
            "--input",
            "messages.jsonl",
        ])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    let value: Value = serde_json::from_str(&stdout)?;
    let entities = value.as_array().expect("json array");
    assert_eq!(entities.len(), 2);

    let target = &entities[0];
    assert_eq!(target["id"], "device123");
    assert_eq!(target["properties"]["temp"], 50);

    let source = &entities[1];
    assert_eq!(source["id"], "device234");
    assert_eq!(source["owner"], "admin");
    assert_eq!(source["type"], "DEVICE");
    assert_eq!(source["properties"]["meta"]["site"], "b1");
    assert_eq!(source["version"], 2);
    Ok(())
}

#[test]
fn run_reports_bad_input_line() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("mappers.yaml"), "[]\n")?;
    fs::write(
        dir.path().join("messages.jsonl"),
        "{\"entity_id\": \"e1\", \"properties\": {}}\n{\"entity_id\": \"e1\", \"operator\": \"bogus\"}\n",
    )?;

    #[allow(deprecated)]
    Command::cargo_bin("twin")?
        .current_dir(dir.path())
        .env_remove("TWIN_CONFIG")
        .args(["run", "--mappers", "mappers.yaml", "--input", "messages.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("messages.jsonl:2"));
    Ok(())
}

/// Integration test: runs the built `schemaform` binary against schema and
/// value files written to a temporary directory.
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn write(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn run(args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_schemaform"))
        .args(args)
        .output()
        .expect("run schemaform");
    eprintln!("{}", String::from_utf8_lossy(&output.stderr));
    output
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout must be JSON")
}

fn person_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "minLength": 2},
            "address": {
                "type": "object",
                "properties": {"city": {"type": "string"}}
            }
        }
    })
}

#[test]
fn test_normalize_merges_required_names() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write(dir.path(), "schema.json", &person_schema());

    let output = run(&[
        "normalize",
        schema.to_str().unwrap(),
        "--required",
        "name,address.city",
    ]);
    assert!(output.status.success());
    let normalized = stdout_json(&output);
    assert_eq!(normalized["required"], json!(["name"]));
    assert_eq!(normalized["properties"]["address"]["required"], json!(["city"]));
}

#[test]
fn test_validate_reports_errors_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write(dir.path(), "schema.json", &person_schema());
    let value = write(dir.path(), "value.json", &json!({"name": "x", "address": {}}));

    let output = run(&[
        "validate",
        schema.to_str().unwrap(),
        value.to_str().unwrap(),
        "--required",
        "address.city",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let errors = stdout_json(&output);
    let paths: Vec<&str> = errors
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["dataPath"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["name", "address.city"]);
}

#[test]
fn test_validate_with_options_file() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write(dir.path(), "schema.json", &person_schema());
    let options = write(dir.path(), "options.json", &json!({"required": ["name"]}));
    let value = write(dir.path(), "value.json", &json!({}));

    let output = run(&[
        "validate",
        schema.to_str().unwrap(),
        value.to_str().unwrap(),
        "--options",
        options.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout_json(&output)[0]["keyword"], json!("required"));
}

#[test]
fn test_validate_valid_value() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write(dir.path(), "schema.json", &person_schema());
    let value = write(dir.path(), "value.json", &json!({"name": "ok"}));

    let output = run(&["validate", schema.to_str().unwrap(), value.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), json!([]));
}

#[test]
fn test_invalid_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write(dir.path(), "schema.json", &json!({"type": "widget"}));

    let output = run(&["normalize", schema.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid schema"));
}

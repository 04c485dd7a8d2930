// CLI integration tests: each command against a real file in a temp dir.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_csvtable");
    Command::new(exe)
}

fn run(path: &Path, args: &[&str]) -> Output {
    cmd()
        .arg(path.to_str().unwrap())
        .args(args)
        .output()
        .expect("run csvtable")
}

fn parse_json(output: &[u8]) -> Value {
    let text = std::str::from_utf8(output).expect("utf8");
    serde_json::from_str(text.trim()).expect("valid json")
}

// stderr may carry log lines when RUST_LOG is set; the error is always last.
fn error_json(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().rev().find(|line| !line.trim().is_empty()).expect("error line");
    serde_json::from_str(line).expect("valid json")
}

fn json_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

fn people(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "ID,Name,Age\n1,Ann,25\n2,Bob,35\n").expect("write");
    path
}

#[test]
fn info_reports_columns_and_rows() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);
    let out = run(&path, &["--index", "ID", "info"]);
    assert!(out.status.success());
    let info = parse_json(&out.stdout);
    assert_eq!(info["rows"], 2);
    assert_eq!(info["columns"], serde_json::json!(["ID", "Name", "Age"]));
    assert_eq!(info["index"], "ID");
}

#[test]
fn query_with_where_and_columns() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);
    let out = run(&path, &["query", "--where", ".Age > 30", "--columns", "Name,ID"]);
    assert!(out.status.success());
    let rows = json_lines(&out.stdout);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].to_string(), r#"{"Name":"Bob","ID":2}"#);
}

#[test]
fn add_update_delete_flow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);

    let add = run(&path, &["add", "ID=3", "Name=Cy", "Age=41"]);
    assert!(add.status.success());
    assert_eq!(parse_json(&add.stdout)["rows"], 3);

    let update = run(
        &path,
        &["update", "--where", ".Age > 30", "--compute", "Age=.Age + 1"],
    );
    assert!(update.status.success());
    assert_eq!(parse_json(&update.stdout)["updated"], 2);

    let delete = run(&path, &["delete", "--where", ".ID == 1"]);
    assert!(delete.status.success());
    assert_eq!(parse_json(&delete.stdout)["deleted"], 1);

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "ID,Name,Age\n2,Bob,36\n3,Cy,42\n"
    );
}

#[test]
fn update_unknown_column_fails_without_extend() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);

    let out = run(&path, &["update", "--where", ".ID == 1", "--set", "Status=vip"]);
    assert_eq!(out.status.code(), Some(6));
    let err = error_json(&out.stderr);
    assert_eq!(err["error"]["kind"], "UnknownColumn");
    assert_eq!(err["error"]["column"], "Status");
    assert!(err["error"]["hint"].is_string());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "ID,Name,Age\n1,Ann,25\n2,Bob,35\n"
    );

    let out = run(
        &path,
        &["update", "--where", ".ID == 1", "--set", "Status=vip", "--extend"],
    );
    assert!(out.status.success());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "ID,Name,Age,Status\n1,Ann,25,vip\n2,Bob,35,\n"
    );
}

#[test]
fn missing_file_is_not_found_unless_create() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("new.csv");

    let out = run(&path, &["info"]);
    assert_eq!(out.status.code(), Some(3));
    let err = error_json(&out.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");

    let out = run(&path, &["--create", "add", "Name=Ann", "Age=30"]);
    assert!(out.status.success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "Name,Age\nAnn,30\n");
}

#[test]
fn bad_expression_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);
    let out = run(&path, &["query", "--where", ".Age >"]);
    assert_eq!(out.status.code(), Some(2));
    let err = error_json(&out.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}

#[test]
fn strict_add_rejects_new_columns() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);
    let out = run(&path, &["add", "--strict", "ID=3", "Email=cy@example.com"]);
    assert_eq!(out.status.code(), Some(5));
    let err = error_json(&out.stderr);
    assert_eq!(err["error"]["kind"], "SchemaMismatch");
}

#[test]
fn add_json_row() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);
    let add = run(&path, &["add", "--json", r#"{"ID": 3, "Name": "Cy"}"#]);
    assert!(add.status.success());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "ID,Name,Age\n1,Ann,25\n2,Bob,35\n3,Cy,\n"
    );

    let bad = run(&path, &["add", "--json", "[1, 2]"]);
    assert_eq!(bad.status.code(), Some(2));
    assert_eq!(error_json(&bad.stderr)["error"]["kind"], "Usage");
}

#[test]
fn division_by_zero_leaves_file_untouched() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = people(&temp);
    let out = run(&path, &["update", "--where", ".ID == 1", "--compute", "Age=.Age / 0"]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "ID,Name,Age\n1,Ann,25\n2,Bob,35\n"
    );
}

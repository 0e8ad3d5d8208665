//! Smoke tests -- verify the binary runs and the rule checker works.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("packetwarden")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Lightweight network intrusion detection",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("packetwarden")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("packetwarden"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("packetwarden")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_check_rules_accepts_valid_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("rules.toml");
    std::fs::write(
        &path,
        r#"
[[rules]]
id = "ssh-syn"
severity = "LOW"
description = "SYN to ssh"

[rules.predicate]
kind = "dst_port"
lo = 22
hi = 22
"#,
    )
    .unwrap();

    Command::cargo_bin("packetwarden")
        .unwrap()
        .arg("check-rules")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("1 rules ok"));
}

#[test]
fn test_check_rules_rejects_invalid_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("rules.toml");
    std::fs::write(
        &path,
        r#"
[[rules]]
id = "bad-range"
severity = "LOW"
description = "inverted range"

[rules.predicate]
kind = "dst_port"
lo = 100
hi = 10
"#,
    )
    .unwrap();

    Command::cargo_bin("packetwarden")
        .unwrap()
        .arg("check-rules")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicates::str::contains("bad-range"));
}

#[test]
fn test_check_rules_missing_file_fails() {
    Command::cargo_bin("packetwarden")
        .unwrap()
        .args(["check-rules", "/nonexistent/rules.toml"])
        .assert()
        .failure();
}

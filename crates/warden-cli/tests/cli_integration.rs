//! CLI integration tests for the `warden` subcommands.
//!
//! Uses `assert_cmd` to spawn the `warden` binary and verify exit codes and
//! stdout content, the way `tenor-cli/tests/cli_integration.rs` does.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn warden() -> Command {
    Command::cargo_bin("warden").expect("binary exists")
}

fn write_config_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.json"),
        r#"{"pdpId":"pdp-1","configurationId":"cfg-1","algorithm":"deny-overrides","variables":{}}"#,
    )
    .unwrap();
    fs::write(dir.path().join("p.warden"), "policy \"p\" permit").unwrap();
    dir
}

#[test]
fn help_exits_0_with_description() {
    warden().arg("--help").assert().success().stdout(predicate::str::contains("ABAC PDP toolchain"));
}

#[test]
fn parse_prints_the_ast_as_json() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("p.warden");
    fs::write(&file, "policy \"p\" permit").unwrap();

    warden().arg("parse").arg(&file).assert().success().stdout(predicate::str::contains("\"Policy\""));
}

#[test]
fn check_compiles_a_configuration_directory() {
    let dir = write_config_dir();
    warden().arg("check").arg(dir.path()).assert().success().stdout(predicate::str::contains("pdp-1"));
}

#[test]
fn check_reports_a_compile_error_for_an_unknown_algorithm() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.json"),
        r#"{"pdpId":"pdp-1","configurationId":"cfg-1","algorithm":"made-up","variables":{}}"#,
    )
    .unwrap();
    warden().arg("check").arg(dir.path()).assert().failure();
}

#[test]
fn decide_prints_the_first_decision() {
    let dir = write_config_dir();
    let subscription = dir.path().join("subscription.json");
    fs::write(&subscription, "{}").unwrap();

    warden()
        .arg("decide")
        .arg(dir.path())
        .arg("--subscription")
        .arg(&subscription)
        .assert()
        .success()
        .stdout(predicate::str::contains("PERMIT"));
}

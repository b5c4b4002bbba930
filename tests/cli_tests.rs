//! CLI integration tests for the `smax-postgresd` binary.
//!
//! These spawn the compiled binary via `assert_cmd` and check exit codes and
//! output text. No database or source store is required: these only cover
//! argument parsing and config-file error handling, not daemon execution.
//!
//! ```bash
//! cargo test --test cli_tests
//! ```

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

#[allow(deprecated)]
fn smax_postgresd() -> Command {
    Command::cargo_bin("smax-postgresd").unwrap()
}

#[test]
fn help_lists_all_flags() {
    smax_postgresd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--bootstrap"))
        .stdout(predicate::str::contains("--admin-user"))
        .stdout(predicate::str::contains("--password"))
        .stdout(predicate::str::contains("--debug"));
}

#[test]
fn version_flag_prints_version() {
    smax_postgresd().arg("--version").assert().success();
}

#[test]
fn short_version_flag_is_v_not_capital_v() {
    smax_postgresd().arg("-v").assert().success();
}

#[test]
fn missing_config_file_is_a_clear_error() {
    smax_postgresd()
        .arg("--config")
        .arg("/nonexistent/smax-postgress.cfg")
        .assert()
        .failure()
        .stderr(predicate::str::contains("smax-postgress.cfg").or(predicate::str::contains("config")));
}

#[test]
fn bootstrap_without_password_fails_with_clear_message() {
    let mut cfg = tempfile::NamedTempFile::new().unwrap();
    writeln!(cfg, "sql_db smax_test\nsql_user smax_test\n").unwrap();

    smax_postgresd()
        .arg("--config")
        .arg(cfg.path())
        .arg("--bootstrap")
        .assert()
        .failure()
        .stderr(predicate::str::contains("password"));
}

#[test]
fn malformed_config_both_intervals_disabled_fails() {
    let mut cfg = tempfile::NamedTempFile::new().unwrap();
    writeln!(cfg, "update_interval none\nsnapshot_interval none\n").unwrap();

    smax_postgresd()
        .arg("--config")
        .arg(cfg.path())
        .assert()
        .failure();
}

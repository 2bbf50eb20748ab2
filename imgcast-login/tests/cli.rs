//! CLI behaviour that needs no browser

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_explains_login_flow() {
    Command::cargo_bin("imgcast-login")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("press Enter"))
        .stdout(predicate::str::contains("--timeout"));
}

#[test]
fn test_unreachable_webdriver_fails_with_hint() {
    let temp = tempfile::TempDir::new().unwrap();

    Command::cargo_bin("imgcast-login")
        .unwrap()
        .env("IMGCAST_CONFIG", temp.path().join("absent.toml"))
        .args(["--webdriver-url", "http://127.0.0.1:9"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("WebDriver server"));

    assert!(!temp.path().join("session.json").exists());
}

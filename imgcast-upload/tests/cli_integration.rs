//! CLI behaviour that needs no browser

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "\\\\")
}

/// Temp dir with a config pointing ledger and session inside it
fn setup_test_env(with_session: bool) -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let session_path = data_dir.join("session.json");
    if with_session {
        fs::write(&session_path, r#"{"cookies": [], "origins": []}"#).unwrap();
    }

    let config_path = temp_dir.path().join("config.toml");
    let config_content = format!(
        r#"
[ledger]
path = "{}"

[session]
path = "{}"

[webdriver]
url = "http://127.0.0.1:9"
"#,
        escape_path_for_toml(&data_dir.join("uploads.db")),
        escape_path_for_toml(&session_path),
    );
    fs::write(&config_path, config_content).unwrap();

    (temp_dir, config_path.to_string_lossy().to_string())
}

fn cmd(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("imgcast-upload").unwrap();
    cmd.env("IMGCAST_CONFIG", config_path)
        .env_remove("RUST_LOG")
        .env_remove("IMGCAST_LOG_FORMAT");
    cmd
}

#[test]
fn test_help_documents_flags_and_exit_codes() {
    Command::cargo_bin("imgcast-upload")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--post-size"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--skip-dedupe"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_missing_dir_argument_is_usage_error() {
    let (_temp, config) = setup_test_env(true);
    cmd(&config).assert().code(2);
}

#[test]
fn test_nonexistent_directory_exits_2() {
    let (temp, config) = setup_test_env(true);
    let missing = temp.path().join("nope");

    cmd(&config)
        .arg(&missing)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Directory does not exist"));
}

#[test]
fn test_file_instead_of_directory_exits_2() {
    let (temp, config) = setup_test_env(true);
    let file = temp.path().join("image.png");
    fs::write(&file, b"png").unwrap();

    cmd(&config)
        .arg(&file)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Not a directory"));
}

#[test]
fn test_missing_session_exits_2_and_names_login() {
    let (temp, config) = setup_test_env(false);
    let images = temp.path().join("images");
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("a.png"), b"a").unwrap();

    cmd(&config)
        .arg(&images)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("imgcast-login"));

    // Nothing was recorded
    assert!(!temp.path().join("data/uploads.db").exists());
}

#[test]
fn test_empty_directory_has_nothing_to_do() {
    let (temp, config) = setup_test_env(true);
    let images = temp.path().join("images");
    fs::create_dir_all(images.join("notes")).unwrap();
    fs::write(images.join("notes/readme.txt"), b"not an image").unwrap();

    cmd(&config)
        .arg(&images)
        .assert()
        .success()
        .stdout(predicate::str::contains("No new images to upload"));
}

#[test]
fn test_invalid_post_size_exits_1() {
    let (temp, config) = setup_test_env(true);
    let images = temp.path().join("images");
    fs::create_dir_all(&images).unwrap();

    cmd(&config)
        .arg(&images)
        .args(["--post-size", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("upload.post_size"));
}

#[test]
fn test_invalid_pause_is_rejected_by_parser() {
    let (temp, config) = setup_test_env(true);

    cmd(&config)
        .arg(temp.path())
        .args(["--pause", "8-4"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("below minimum"));
}

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// `umami` isolated from the developer's home directory and environment
fn umami(temp: &assert_fs::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("umami").unwrap();
    cmd.current_dir(temp.path())
        .env("HOME", temp.path())
        .env_remove("UMAMI_WEBSITE_ID")
        .env_remove("UMAMI_HOST_URL")
        .env_remove("UMAMI_DEBUG")
        .env_remove("UMAMI_TELEMETRY_DISABLED")
        .env_remove("DO_NOT_TRACK");
    cmd
}

#[test]
fn test_status_without_config() {
    let temp = assert_fs::TempDir::new().unwrap();

    umami(&temp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized: false"))
        .stdout(predicate::str::contains("host:        (not set)"));
}

#[test]
fn test_status_json_reads_project_config() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child(".umami/config.toml")
        .write_str(
            r#"
[umami]
website_id = "site-1"
host_url = "https://stats.example.com/"
"#,
        )
        .unwrap();

    let output = umami(&temp)
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let status: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(status["initialized"], true);
    assert_eq!(status["website_id"], "site-1");
    assert_eq!(status["host_url"], "https://stats.example.com");
    assert!(status["anonymous_id"].as_str().unwrap().starts_with("anon_"));
}

#[test]
fn test_anonymous_id_persists_across_runs() {
    let temp = assert_fs::TempDir::new().unwrap();

    let read_id = || {
        let output = umami(&temp)
            .args(["status", "--json"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let status: serde_json::Value = serde_json::from_slice(&output).unwrap();
        status["anonymous_id"].as_str().unwrap().to_string()
    };

    let first = read_id();
    assert_eq!(first, read_id());
    temp.child(".umami/telemetry").assert(predicate::path::is_dir());
}

#[test]
fn test_track_requires_initialization() {
    let temp = assert_fs::TempDir::new().unwrap();

    umami(&temp)
        .args(["track", "--name", "signup"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("UMAMI_WEBSITE_ID"));
}

#[test]
fn test_track_in_debug_mode() {
    let temp = assert_fs::TempDir::new().unwrap();

    umami(&temp)
        .env("UMAMI_WEBSITE_ID", "site-1")
        .env("UMAMI_HOST_URL", "http://127.0.0.1:9")
        .env("UMAMI_DEBUG", "1")
        .args(["track", "--name", "signup", "--data", "plan=pro", "--data", "seats=3"])
        .assert()
        .success();
}

#[test]
fn test_track_rejects_malformed_data() {
    let temp = assert_fs::TempDir::new().unwrap();

    umami(&temp)
        .env("UMAMI_WEBSITE_ID", "site-1")
        .env("UMAMI_HOST_URL", "http://127.0.0.1:9")
        .args(["track", "--data", "no-separator"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected KEY=VALUE"));
}

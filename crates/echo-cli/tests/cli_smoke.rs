use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn echo(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("olympus-echo").unwrap();
    cmd.current_dir(dir.path()).env("ECHO_LOG", "warn");
    cmd
}

#[test]
fn test_init_then_validate() {
    let dir = TempDir::new().unwrap();
    echo(&dir)
        .arg("init")
        .assert()
        .success()
        .stderr(contains("created echo.yaml"));
    assert!(dir.path().join("echo.yaml").exists());

    echo(&dir)
        .args(["validate", "--strict"])
        .assert()
        .success()
        .stderr(contains("2 test cases"));
}

#[test]
fn test_validate_rejects_zero_step_case() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("echo.yaml"),
        r#"
configVersion: 1
agents:
  - id: bot
    name: bot
    type: http
datasets:
  - id: broken
    name: broken
    target_agent_id: bot
    test_cases:
      - id: empty
        steps: []
"#,
    )
    .unwrap();

    echo(&dir)
        .arg("validate")
        .assert()
        .code(2)
        .stderr(contains("broken/empty"))
        .stderr(contains("no steps"));
}

#[test]
fn test_strict_mode_rejects_unknown_keys() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("echo.yaml"),
        "configVersion: 1\nsettings:\n  turn_dealy_ms: 5\n",
    )
    .unwrap();

    echo(&dir)
        .args(["validate", "--strict"])
        .assert()
        .code(2)
        .stderr(contains("turn_dealy_ms"));
    echo(&dir).arg("validate").assert().success();
}

#[test]
fn test_simulated_run_passes_and_lands_in_history() {
    let dir = TempDir::new().unwrap();
    echo(&dir).arg("init").assert().success();

    echo(&dir)
        .args(["run", "--simulate", "--out", "out/run.json"])
        .assert()
        .success()
        .stderr(contains("2 passed, 0 failed"));

    let raw = fs::read_to_string(dir.path().join("out/run.json")).unwrap();
    let exp: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(exp["status"], "completed");
    assert_eq!(exp["results"]["menu"]["transcript"][2]["content"], "[dtmf 2]");

    echo(&dir)
        .arg("history")
        .assert()
        .success()
        .stderr(contains("completed"));
    echo(&dir)
        .args(["datasets", "list"])
        .assert()
        .success()
        .stdout(contains("demo"));
}

#[test]
fn test_unreachable_http_agent_fails_run() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("echo.yaml"),
        r#"
configVersion: 1
settings:
  default_timeout_seconds: 5
agents:
  - id: bot
    name: bot
    type: http
    config:
      url: http://127.0.0.1:9/chat
datasets:
  - id: smoke
    name: smoke
    target_agent_id: bot
    test_cases:
      - id: hello
        steps:
          - action: speak
            text: hello
        conditions:
          - type: response_contains
            expected: hello
"#,
    )
    .unwrap();

    echo(&dir)
        .arg("run")
        .assert()
        .code(1)
        .stderr(contains("agent unreachable"));
}

#[test]
fn test_unknown_dataset_is_config_error() {
    let dir = TempDir::new().unwrap();
    echo(&dir).arg("init").assert().success();
    echo(&dir)
        .args(["run", "--simulate", "--dataset", "nope"])
        .assert()
        .code(2);
}

#[test]
fn test_remote_requires_backend_url() {
    let dir = TempDir::new().unwrap();
    echo(&dir)
        .env_remove("ECHO_BACKEND_URL")
        .args(["remote", "suites", "--user-id", "u1"])
        .assert()
        .code(2)
        .stderr(contains("ECHO_BACKEND_URL"));
}

#[test]
fn test_remote_create_and_run_suite() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/test-suites")
        .match_query(mockito::Matcher::UrlEncoded("user_id".into(), "u1".into()))
        .with_status(201)
        .with_body(r#"{"id": "s42"}"#)
        .create();
    server
        .mock("POST", "/test-suites/s42/run")
        .with_status(202)
        .create();
    server
        .mock("GET", "/test-suites/s42")
        .with_status(200)
        .with_body(r#"{"id": "s42", "name": "billing", "suite_status": "completed"}"#)
        .create();

    echo(&dir)
        .env("ECHO_BACKEND_URL", server.url())
        .args(["remote", "create", "--name", "billing", "--user-id", "u1"])
        .assert()
        .success()
        .stdout(contains("s42"));

    echo(&dir)
        .env("ECHO_BACKEND_URL", server.url())
        .env("ECHO_USER_ID", "u1")
        .args(["remote", "run", "--suite", "s42"])
        .assert()
        .success()
        .stderr(contains("suite s42: completed after 1 polls"));
}

#[test]
fn test_remote_backend_error_is_remote_failure() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    server.mock("GET", "/runs").with_status(500).create();

    echo(&dir)
        .env("ECHO_BACKEND_URL", server.url())
        .args(["remote", "runs", "--user-id", "u1"])
        .assert()
        .code(3)
        .stderr(contains("list runs failed"));
}

use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a minimal valid config (no bridge)
fn minimal_config(port: u16, db_dir: &TempDir) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"
"#,
        port,
        db_dir.path().join("relister.db").display()
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &std::path::Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_relister"))
        .env("RELISTER_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Run the binary to completion against a config file
async fn run_to_exit(config_path: &std::path::Path) -> std::process::Output {
    timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_relister"))
            .env("RELISTER_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command")
}

#[tokio::test]
async fn test_health_endpoint() {
    let port = get_available_port();
    let db_dir = TempDir::new().unwrap();
    let temp_file = write_config(&minimal_config(port, &db_dir));

    let mut server = spawn_server(temp_file.path()).await;

    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_returns_sanitized() {
    let port = get_available_port();
    let db_dir = TempDir::new().unwrap();
    // Port 1 is never listened on; the bridge is only contacted when a batch runs
    let config = format!(
        r#"{}
[bridge]
url = "http://127.0.0.1:1"
api_key = "super-secret"
"#,
        minimal_config(port, &db_dir)
    );
    let temp_file = write_config(&config);

    let mut server = spawn_server(temp_file.path()).await;

    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/config", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let text = response.text().await.expect("Failed to read body");
    assert!(!text.contains("super-secret"));

    let json: serde_json::Value = serde_json::from_str(&text).expect("Failed to parse JSON");
    assert_eq!(json["server"]["port"], port);
    assert_eq!(json["bridge"]["api_key_configured"], true);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_batches_unavailable_without_bridge() {
    let port = get_available_port();
    let db_dir = TempDir::new().unwrap();
    let temp_file = write_config(&minimal_config(port, &db_dir));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/batches/current", port))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 503);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = run_to_exit(std::path::Path::new("/nonexistent/config.toml")).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_config_exits_with_error() {
    let temp_file = write_config(
        r#"
[server]
port = 8080

[orchestrator]
max_concurrency = 0
"#,
    );

    let result = run_to_exit(temp_file.path()).await;
    assert!(!result.status.success());
}

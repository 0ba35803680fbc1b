//! Spawns the real binary and exercises the HTTP surface end to end.

use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::sleep;

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a minimal valid config
fn minimal_config(port: u16, data_dir: &std::path::Path) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"

[snapshots]
dir = "{}"

[pipeline.admission]
cooldown_secs = 0
"#,
        port,
        data_dir.join("helmwatch.db").display(),
        data_dir.join("snapshots").display(),
    )
}

/// Spawn the server and return a handle
fn spawn_server(config_path: &std::path::Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_helmwatch"))
        .env("HELMWATCH_CONFIG", config_path)
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
            .get(format!("http://127.0.0.1:{}/healthz", port))
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

#[tokio::test]
async fn test_server_startup_and_pipeline_flow() {
    let port = get_available_port();
    let data_dir = TempDir::new().unwrap();
    let config_content = minimal_config(port, data_dir.path());

    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let mut server = spawn_server(temp_file.path());
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    // Health
    let response = client.get(format!("{}/healthz", base)).send().await.unwrap();
    assert_eq!(response.status(), 200);

    // Idle until started
    let status: serde_json::Value = client
        .get(format!("{}/api/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "idle");

    // Start and submit
    let response = client
        .post(format!("{}/api/pipeline/start", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .post(format!("{}/api/violations", base))
        .json(&serde_json::json!({
            "device_id": "cam1",
            "person_count": 1,
            "violation_count": 1,
            "severity": "critical",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    let report_id = body["report_id"].as_str().unwrap().to_string();

    // Report is persisted and eventually completed
    let mut completed = false;
    for _ in 0..100 {
        let report: serde_json::Value = client
            .get(format!("{}/api/reports/{}", base, report_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if report["status"] == "completed" {
            completed = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(completed, "report never completed");

    // Metrics expose the pipeline counters
    let metrics = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("helmwatch_pipeline_detecting 1"));

    server.kill().await.ok();
}

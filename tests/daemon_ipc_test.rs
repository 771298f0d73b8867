//! Daemon protocol tests over a real IPC socket.
//!
//! These start the daemon in-process against an isolated cache directory
//! and exercise the length-prefixed request/response protocol without
//! any language server installed.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use serial_test::serial;

use common::TestWorkspace;
use leta::config::Config;
use leta::daemon::Daemon;
use leta::daemon::ipc;
use leta::daemon::protocol::{Format, Request, Response};
use leta::ops::OpOutput;

struct RunningDaemon {
    endpoint: String,
    handle: tokio::task::JoinHandle<()>,
    _cache: tempfile::TempDir,
}

async fn start_daemon() -> RunningDaemon {
    let cache = tempfile::TempDir::new().unwrap();
    unsafe { std::env::set_var("LETA_CACHE_DIR", cache.path()) };

    let daemon = Arc::new(Daemon::new(Config::default()).unwrap());
    let handle = tokio::spawn(async move {
        daemon.run().await.expect("daemon loop failed");
    });

    // Wait for the endpoint file to appear.
    let endpoint = loop {
        if let Some(info) = ipc::read_endpoint() {
            break info.endpoint;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    RunningDaemon {
        endpoint,
        handle,
        _cache: cache,
    }
}

async fn round_trip(endpoint: &str, request: &Request) -> Response {
    let mut stream = ipc::connect(endpoint).await.unwrap();
    ipc::write_message(&mut stream, request).await.unwrap();
    ipc::read_message(&mut stream).await.unwrap().unwrap()
}

fn expect_ok(response: Response) -> OpOutput {
    match response {
        Response::Ok { ok } => ok,
        Response::Error { error } => panic!("unexpected error: {}: {}", error.kind, error.detail),
    }
}

async fn shutdown(daemon: RunningDaemon) {
    let request = Request::new("shutdown", Value::Null, Format::Plain);
    let _ = round_trip(&daemon.endpoint, &request).await;
    tokio::time::timeout(Duration::from_secs(10), daemon.handle)
        .await
        .expect("daemon did not exit")
        .unwrap();
    // Endpoint file is removed on clean shutdown.
    assert!(ipc::read_endpoint().is_none());
    unsafe { std::env::remove_var("LETA_CACHE_DIR") };
}

#[tokio::test]
#[serial]
async fn test_ping_round_trip() {
    let daemon = start_daemon().await;
    let output = expect_ok(
        round_trip(
            &daemon.endpoint,
            &Request::new("ping", Value::Null, Format::Plain),
        )
        .await,
    );
    let OpOutput::Message { text } = output else {
        panic!("expected message");
    };
    assert_eq!(text, "pong");
    shutdown(daemon).await;
}

#[tokio::test]
#[serial]
async fn test_workspace_lifecycle_and_files() {
    let daemon = start_daemon().await;
    let workspace = TestWorkspace::new(
        "//- /src/app.ts\nexport const one = 1;\n//- /README.md\nhello\n",
    );

    let add = Request::new(
        "workspace-add",
        json!({"root": workspace.root()}),
        Format::Plain,
    );
    expect_ok(round_trip(&daemon.endpoint, &add).await);

    let files = Request::new("files", json!({}), Format::Plain);
    let output = expect_ok(round_trip(&daemon.endpoint, &files).await);
    let OpOutput::FileList { files } = output else {
        panic!("expected file list");
    };
    assert!(files.contains(&"src/app.ts".to_string()));
    assert!(files.contains(&"README.md".to_string()));

    // Path filter narrows the listing.
    let filtered = Request::new("files", json!({"path": "src"}), Format::Plain);
    let output = expect_ok(round_trip(&daemon.endpoint, &filtered).await);
    let OpOutput::FileList { files } = output else {
        panic!("expected file list");
    };
    assert_eq!(files, vec!["src/app.ts".to_string()]);

    let remove = Request::new(
        "workspace-remove",
        json!({"root": workspace.root()}),
        Format::Plain,
    );
    expect_ok(round_trip(&daemon.endpoint, &remove).await);

    shutdown(daemon).await;
}

#[tokio::test]
#[serial]
async fn test_unknown_op_and_bad_params() {
    let daemon = start_daemon().await;

    let unknown = round_trip(
        &daemon.endpoint,
        &Request::new("teleport", Value::Null, Format::Plain),
    )
    .await;
    let Response::Error { error } = unknown else {
        panic!("expected error");
    };
    assert_eq!(error.kind, "UsageError");

    let bad_params = round_trip(
        &daemon.endpoint,
        &Request::new("grep", json!({"no_pattern": true}), Format::Plain),
    )
    .await;
    let Response::Error { error } = bad_params else {
        panic!("expected error");
    };
    assert_eq!(error.kind, "UsageError");

    shutdown(daemon).await;
}

#[tokio::test]
#[serial]
async fn test_symbol_op_without_workspace_is_not_found() {
    let daemon = start_daemon().await;
    let response = round_trip(
        &daemon.endpoint,
        &Request::new("show", json!({"symbol": "anything"}), Format::Plain),
    )
    .await;
    let Response::Error { error } = response else {
        panic!("expected error");
    };
    assert_eq!(error.kind, "NotFound");
    shutdown(daemon).await;
}

#[tokio::test]
#[serial]
async fn test_config_dump_and_info() {
    let daemon = start_daemon().await;

    let output = expect_ok(
        round_trip(
            &daemon.endpoint,
            &Request::new("config", Value::Null, Format::Plain),
        )
        .await,
    );
    let OpOutput::ConfigDump { text } = output else {
        panic!("expected config dump");
    };
    assert!(text.contains("[daemon]"));
    assert!(text.contains("request_timeout_secs"));

    let output = expect_ok(
        round_trip(
            &daemon.endpoint,
            &Request::new("info", Value::Null, Format::Plain),
        )
        .await,
    );
    let OpOutput::DaemonInfo { pid, requests, .. } = output else {
        panic!("expected daemon info");
    };
    assert_eq!(pid, std::process::id());
    assert!(requests >= 1);

    shutdown(daemon).await;
}

#[tokio::test]
#[serial]
async fn test_grep_on_workspace_without_servers_reports_warnings_not_failure() {
    let daemon = start_daemon().await;
    // The fixture has an unknown-language file only, so grep has nothing
    // to analyze and must return an empty result, not an error.
    let workspace = TestWorkspace::new("//- /notes.txt\nUserHandler\n");

    expect_ok(
        round_trip(
            &daemon.endpoint,
            &Request::new(
                "workspace-add",
                json!({"root": workspace.root()}),
                Format::Plain,
            ),
        )
        .await,
    );

    let output = expect_ok(
        round_trip(
            &daemon.endpoint,
            &Request::new("grep", json!({"pattern": "Handler$"}), Format::Plain),
        )
        .await,
    );
    let OpOutput::Grep { items, .. } = output else {
        panic!("expected grep output");
    };
    assert!(items.is_empty());

    shutdown(daemon).await;
}

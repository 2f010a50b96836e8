mod common;
use common::{credential_json, MockTransport};

use hostops::app::App;
use hostops::config::HostConcurrency;
use hostops::managers::ops::OpsSettings;
use hostops::mcp::server::McpServer;
use hostops::services::classifier::OutcomeClassifier;
use hostops::services::job::JobService;
use hostops::services::logger::Logger;
use hostops::stores::memory_job_store::MemoryJobStore;
use serde_json::{json, Value};
use std::sync::Arc;

fn server(transport: Arc<MockTransport>) -> McpServer {
    let logger = Logger::capturing("test");
    let jobs = Arc::new(JobService::with_stores(
        logger.clone(),
        MemoryJobStore::new(10, 60_000, "memory"),
        None,
        HostConcurrency::Exclusive,
    ));
    let app = App::assemble(
        logger,
        transport,
        Arc::new(OutcomeClassifier::default()),
        jobs,
        OpsSettings {
            artifact_dir: "/tmp".to_string(),
            poll_max_log_bytes: 8192,
            poll_interval_ms: 1,
            call_budget_ms: 1_000,
        },
    )
    .unwrap();
    McpServer::new(Arc::new(app))
}

async fn call(server: &McpServer, request: Value) -> Value {
    let response = server
        .handle_line(&request.to_string())
        .await
        .expect("request with id must be answered");
    serde_json::to_value(response).unwrap()
}

#[tokio::test]
async fn initialize_and_list_tools() {
    let server = server(MockTransport::replying(0, ""));
    let init = call(&server, json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "hostops");

    let list = call(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["hostops_ops", "hostops_jobs"]);
    assert!(list["result"]["tools"][0]["inputSchema"]["properties"]["credential"].is_object());
}

#[tokio::test]
async fn tools_call_wraps_result_as_text_content() {
    let server = server(MockTransport::replying(0, "example.com\n"));
    let response = call(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "hostops_ops",
                "arguments": {"action": "launch", "action_kind": "list-sites", "credential": credential_json()}
            }
        }),
    )
    .await;
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let body: Value = serde_json::from_str(text).unwrap();
    assert_eq!(body["sites"], json!(["example.com"]));
    assert_eq!(response["result"]["structuredContent"], body);
}

#[tokio::test]
async fn tool_errors_become_json_rpc_errors() {
    let server = server(MockTransport::replying(0, ""));
    let response = call(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "hostops_jobs", "arguments": {"action": "job_get", "job_id": "missing"}}
        }),
    )
    .await;
    assert_eq!(response["error"]["code"], -32600);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("HostopsError\ntool: hostops_jobs"));
    assert_eq!(response["error"]["data"]["code"], "NOT_FOUND");

    let response = call(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "hostops_ops", "arguments": {"action": "poll", "logfile": "x"}}
        }),
    )
    .await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn protocol_errors_and_notifications() {
    let server = server(MockTransport::replying(0, ""));

    let parse = serde_json::to_value(server.handle_line("{not json").await.unwrap()).unwrap();
    assert_eq!(parse["error"]["code"], -32700);
    assert_eq!(parse["id"], Value::Null);

    let invalid = call(&server, json!({"jsonrpc": "2.0", "id": 6})).await;
    assert_eq!(invalid["error"]["code"], -32600);

    let unknown = call(&server, json!({"jsonrpc": "2.0", "id": 7, "method": "resources/list"})).await;
    assert_eq!(unknown["error"]["code"], -32601);

    let missing_name = call(&server, json!({"jsonrpc": "2.0", "id": 8, "method": "tools/call", "params": {}})).await;
    assert_eq!(missing_name["error"]["code"], -32602);

    assert!(server
        .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await
        .is_none());
}

#[tokio::test]
async fn serve_answers_each_line() {
    let server = server(MockTransport::replying(0, ""));
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        "\n\n",
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n",
    );
    let mut output = Vec::new();
    server.serve(input.as_bytes(), &mut output).await.unwrap();
    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["id"], 2);
}

#[tokio::test]
async fn schema_violations_never_reach_the_host() {
    let transport = MockTransport::replying(0, "");
    let server = server(transport.clone());
    let response = call(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "tools/call",
            "params": {
                "name": "hostops_ops",
                "arguments": {
                    "action": "execute",
                    "command": "uptime",
                    "credential": {"host": "203.0.113.7", "username": "root", "password": "x", "port": 99999}
                }
            }
        }),
    )
    .await;
    assert_eq!(response["error"]["code"], -32602);
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("/credential/port"));
    assert!(transport.commands().is_empty());
}

mod common;
use common::{completed, credential_json, poll_reply, MockTransport};

use hostops::app::App;
use hostops::config::HostConcurrency;
use hostops::errors::ToolError;
use hostops::managers::ops::OpsSettings;
use hostops::services::classifier::OutcomeClassifier;
use hostops::services::job::JobService;
use hostops::services::logger::Logger;
use hostops::services::transport::ExecuteOutcome;
use hostops::stores::memory_job_store::MemoryJobStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn app(transport: Arc<MockTransport>) -> App {
    let logger = Logger::capturing("test");
    let jobs = Arc::new(JobService::with_stores(
        logger.clone(),
        MemoryJobStore::new(50, 60_000, "memory"),
        None,
        HostConcurrency::Exclusive,
    ));
    App::assemble(
        logger,
        transport,
        Arc::new(OutcomeClassifier::default()),
        jobs,
        OpsSettings {
            artifact_dir: "/tmp".to_string(),
            poll_max_log_bytes: 8192,
            poll_interval_ms: 1,
            call_budget_ms: 2_000,
        },
    )
    .unwrap()
}

async fn ops(app: &App, mut args: Value) -> Result<Value, ToolError> {
    args["credential"] = credential_json();
    app.tool_executor.execute("hostops_ops", args).await
}

/// Answers the launch wrapper with a PID and everything else from `poll`.
fn host<F>(poll: F) -> Arc<MockTransport>
where
    F: Fn(&str) -> ExecuteOutcome + Send + Sync + 'static,
{
    MockTransport::new(move |command| {
        if command.contains("nohup bash -c") {
            Ok(completed(0, "4242\n", ""))
        } else {
            Ok(poll(command))
        }
    })
}

#[tokio::test]
async fn launch_then_poll_records_the_outcome() {
    let transport = host(|_| {
        poll_reply(
            "Site created\nAborting SSL certificate issuance\n__HOSTOPS_EXIT__=1",
            "finished",
        )
    });
    let app = app(transport.clone());

    let launched = ops(
        &app,
        json!({
            "action": "launch",
            "action_kind": "create-site",
            "params": {"domain": "example.com", "user": "admin", "pass": "s3cret!", "email": "a@example.com"}
        }),
    )
    .await
    .unwrap();
    assert_eq!(launched["mode"], "detached");
    assert_eq!(launched["pid"], 4242);
    let job_id = launched["job_id"].as_str().unwrap().to_string();

    let polled = ops(&app, json!({"action": "poll", "job_id": job_id}))
        .await
        .unwrap();
    assert_eq!(polled["status"], "finished");
    assert_eq!(polled["exit_code"], 1);
    assert_eq!(polled["outcome"]["status"], "completed_with_warning");
    assert_eq!(polled["action_kind"], "create-site");

    let job = app
        .tool_executor
        .execute("hostops_jobs", json!({"action": "job_get", "job_id": job_id}))
        .await
        .unwrap();
    assert_eq!(job["job"]["state"], "finished");
    assert_eq!(job["job"]["outcome"]["title"], "Site created with a warning");
}

#[tokio::test]
async fn second_site_job_on_same_host_conflicts_before_touching_it() {
    let transport = host(|_| poll_reply("", "running"));
    let app = app(transport.clone());
    let launch = |kind: &str| {
        json!({"action": "launch", "action_kind": kind, "params": {"domain": "example.com"}})
    };

    ops(&app, launch("delete-site")).await.unwrap();
    let err = ops(&app, launch("install-tls")).await.unwrap_err();
    assert_eq!(err.code, "CONFLICT");
    assert_eq!(transport.commands().len(), 1);

    let listed = app
        .tool_executor
        .execute("hostops_jobs", json!({"action": "job_list", "state": "running"}))
        .await
        .unwrap();
    assert_eq!(listed["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_launch_leaves_no_registration() {
    let transport = MockTransport::new(|_| Err(ToolError::transport("Connection refused")));
    let app = app(transport);
    let err = ops(
        &app,
        json!({"action": "launch", "action_kind": "delete-site", "params": {"domain": "example.com"}}),
    )
    .await
    .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(app.job_service.list(10, None, None).len(), 0);
}

#[tokio::test]
async fn follow_polls_until_the_job_finishes() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let transport = host(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            poll_reply("still working", "running")
        } else {
            poll_reply("done\n__HOSTOPS_EXIT__=0", "finished")
        }
    });
    let app = app(transport);

    let launched = ops(
        &app,
        json!({"action": "launch", "action_kind": "delete-account", "params": {"domain": "example.com", "user_id": "4"}}),
    )
    .await
    .unwrap();
    let followed = ops(
        &app,
        json!({
            "action": "follow",
            "log_file_name": launched["log_file_name"],
            "pid_file_name": launched["pid_file_name"],
        }),
    )
    .await
    .unwrap();
    assert_eq!(followed["status"], "finished");
    assert_eq!(followed["polls"], 3);
    assert_eq!(followed["timed_out"], false);
    assert_eq!(followed["outcome"]["title"], "Account deletion completed");
    assert_eq!(followed["job_id"], launched["job_id"]);
}

#[tokio::test]
async fn follow_gives_up_within_budget() {
    let app = app(host(|_| poll_reply("", "running")));
    let launched = ops(
        &app,
        json!({"action": "launch", "action_kind": "install-platform", "params": {"username": "ops", "email": "ops@example.com"}}),
    )
    .await
    .unwrap();
    let followed = ops(
        &app,
        json!({"action": "follow", "job_id": launched["job_id"], "timeout_ms": 30, "poll_interval_ms": 10}),
    )
    .await
    .unwrap();
    assert_eq!(followed["status"], "running");
    assert_eq!(followed["timed_out"], true);
    assert!(followed.get("outcome").is_none());
}

#[tokio::test]
async fn sync_actions_answer_inline() {
    let transport = MockTransport::new(|command| {
        if command.starts_with("wo --version") {
            Ok(completed(0, "WordOps v3.21.3\n", ""))
        } else {
            Ok(completed(
                0,
                r#"[{"ID":1,"user_login":"admin","user_email":"a@example.com","roles":"administrator"}]"#,
                "",
            ))
        }
    });
    let app = app(transport.clone());

    let probe = ops(&app, json!({"action": "launch", "action_kind": "probe-platform-installed"}))
        .await
        .unwrap();
    assert_eq!(probe["mode"], "sync");
    assert_eq!(probe["installed"], true);
    assert_eq!(probe["version"], "WordOps v3.21.3");

    let accounts = ops(
        &app,
        json!({"action": "launch", "kind": "get-wp-users", "params": {"domain": "example.com"}}),
    )
    .await
    .unwrap();
    assert_eq!(accounts["accounts"][0]["user_login"], "admin");
    assert!(app.job_service.list(10, None, None).is_empty());
}

#[tokio::test]
async fn probe_reports_missing_platform() {
    let app = app(MockTransport::new(|_| Ok(completed(127, "", "bash: wo: command not found"))));
    let probe = ops(&app, json!({"action": "launch", "action_kind": "probe-platform-installed"}))
        .await
        .unwrap();
    assert_eq!(probe["installed"], false);
    assert_eq!(probe["exit_code"], 127);
    assert!(probe.get("version").is_none());
}

#[tokio::test]
async fn execute_supports_fire_and_forget() {
    let transport = MockTransport::new(|_| Ok(ExecuteOutcome::Accepted));
    let app = app(transport.clone());
    let out = ops(
        &app,
        json!({"action": "execute", "command": "sudo systemctl restart nginx", "wait_for_output": false}),
    )
    .await
    .unwrap();
    assert_eq!(out, json!({"accepted": true}));
    assert_eq!(transport.commands(), vec!["sudo systemctl restart nginx".to_string()]);
}

#[tokio::test]
async fn classify_and_cleanup_need_no_registry() {
    let transport = MockTransport::replying(0, "");
    let app = app(transport.clone());
    let outcome = ops(
        &app,
        json!({"action": "classify", "action_kind": "install-tls", "log_content": "Aborting SSL certificate issuance"}),
    )
    .await
    .unwrap();
    assert_eq!(outcome["status"], "completed_with_warning");

    let ack = ops(
        &app,
        json!({"action": "cleanup", "log_file_name": "wo-action-1712345678901-install-tls-0000abcd.log", "pid_file_name": "wo-action-1712345678901-install-tls-0000abcd.log.pid"}),
    )
    .await
    .unwrap();
    assert_eq!(ack, json!({"success": true, "removed": true}));
    assert!(transport.commands()[0].starts_with("rm -f '/tmp/wo-action-1712345678901"));
}

#[tokio::test]
async fn jobs_are_scoped_to_the_launching_host() {
    let app = app(host(|_| poll_reply("", "running")));
    let launched = ops(
        &app,
        json!({"action": "launch", "action_kind": "delete-site", "params": {"domain": "example.com"}}),
    )
    .await
    .unwrap();
    let mut args = json!({"action": "poll", "job_id": launched["job_id"]});
    args["credential"] = json!({"host": "198.51.100.1", "username": "root", "password": "x"});
    let err = app
        .tool_executor
        .execute("hostops_ops", args)
        .await
        .unwrap_err();
    assert_eq!(err.code, "NOT_FOUND");
}

#[tokio::test]
async fn unknown_actions_suggest_alternatives() {
    let app = app(MockTransport::replying(0, ""));
    let err = ops(&app, json!({"action": "pol"})).await.unwrap_err();
    assert_eq!(err.code, "UNKNOWN_ACTION");
    assert!(err.hint.unwrap().contains("poll"));

    let err = app
        .tool_executor
        .execute("hostops_opz", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code, "INVALID_PARAMS");
}

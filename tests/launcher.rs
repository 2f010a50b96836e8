mod common;
use common::{completed, credential, MockTransport};

use hostops::errors::{ToolError, ToolErrorKind};
use hostops::services::classifier::{OutcomeClassifier, OutcomeStatus};
use hostops::services::command_builder::{ActionKind, ActionRequest};
use hostops::services::launcher::{JobLauncher, LaunchResult};
use hostops::services::logger::Logger;
use std::sync::Arc;

fn launcher(transport: Arc<MockTransport>) -> JobLauncher {
    JobLauncher::new(
        Logger::capturing("test"),
        transport,
        Arc::new(OutcomeClassifier::default()),
        "/tmp".to_string(),
    )
}

#[tokio::test]
async fn long_running_actions_return_a_handle_and_pid() {
    let transport = MockTransport::replying(0, "4242\n");
    let request = ActionRequest::new(ActionKind::DeleteSite).param("domain", "example.com");

    let result = launcher(transport.clone())
        .launch(&credential(), &request)
        .await
        .unwrap();

    let LaunchResult::Detached { handle, pid } = result else {
        panic!("delete-site must detach");
    };
    assert_eq!(pid, Some(4242));
    assert!(handle.log_file_name.starts_with("wo-action-"));
    assert!(handle.log_file_name.contains("-delete-site-"));
    assert_eq!(handle.pid_file_name, format!("{}.pid", handle.log_file_name));

    let commands = transport.commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with(&format!(": > '/tmp/{}'", handle.log_file_name)));
    assert!(commands[0].contains("nohup bash -c"));
    assert!(commands[0].contains("sudo wo site delete"));
}

#[tokio::test]
async fn detached_launch_without_pid_is_still_accepted() {
    let transport = MockTransport::replying(0, "");
    let request = ActionRequest::new(ActionKind::InstallTls).param("domain", "example.com");
    let result = launcher(transport).launch(&credential(), &request).await.unwrap();
    assert!(matches!(result, LaunchResult::Detached { pid: None, .. }));
}

#[tokio::test]
async fn wrapper_failure_is_a_remote_command_error() {
    let transport = MockTransport::new(|_| Ok(completed(2, "", "/tmp: Permission denied")));
    let request = ActionRequest::new(ActionKind::DeleteSite).param("domain", "example.com");
    let err = launcher(transport).launch(&credential(), &request).await.unwrap_err();
    assert_eq!(err.kind, ToolErrorKind::RemoteCommand);
    assert!(err.hint.is_some());
}

#[tokio::test]
async fn sync_actions_never_create_artifacts() {
    let transport = MockTransport::replying(0, "example.com\nblog.example.com\n");
    let result = launcher(transport.clone())
        .launch(&credential(), &ActionRequest::new(ActionKind::ListSites))
        .await
        .unwrap();

    let LaunchResult::Completed(completion) = result else {
        panic!("list-sites must run inline");
    };
    assert_eq!(completion.result.stdout, "example.com\nblog.example.com\n");
    assert!(completion.outcome.is_none());
    assert_eq!(transport.commands(), vec!["ls /etc/nginx/sites-available/".to_string()]);
}

#[tokio::test]
async fn probe_nonzero_exit_is_a_negative_answer() {
    let transport = MockTransport::new(|_| Ok(completed(127, "", "wo: command not found")));
    let completion = launcher(transport)
        .launch_inline(&credential(), &ActionRequest::new(ActionKind::ProbePlatformInstalled))
        .await
        .unwrap();
    assert_eq!(completion.result.exit_code, 127);
    assert!(completion.outcome.is_none());
}

#[tokio::test]
async fn recoverable_failure_becomes_a_warning() {
    let transport = MockTransport::new(|_| {
        Ok(completed(
            1,
            "Issuing certificate...\nAborting SSL certificate issuance\n",
            "",
        ))
    });
    let request = ActionRequest::new(ActionKind::InstallTls).param("domain", "example.com");
    let completion = launcher(transport)
        .launch_inline(&credential(), &request)
        .await
        .unwrap();
    let outcome = completion.outcome.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::CompletedWithWarning);
    assert!(outcome.warning_text.unwrap().contains("DNS"));
}

#[tokio::test]
async fn unrecovered_sync_failure_carries_exit_code_and_output() {
    let transport = MockTransport::new(|_| Ok(completed(1, "", "Error: Invalid user ID")));
    let request = ActionRequest::new(ActionKind::DeleteAccount)
        .param("domain", "example.com")
        .param("user_id", "99");
    let err = launcher(transport)
        .launch_inline(&credential(), &request)
        .await
        .unwrap_err();
    assert_eq!(err.code, "REMOTE_COMMAND_FAILED");
    let details = err.details.unwrap();
    assert_eq!(details["exit_code"], 1);
    assert_eq!(details["stderr"], "Error: Invalid user ID");
}

#[tokio::test]
async fn transport_errors_pass_through_untouched() {
    let transport = MockTransport::new(|_| Err(ToolError::transport("Connection refused")));
    let err = launcher(transport)
        .launch(&credential(), &ActionRequest::new(ActionKind::ListSites))
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.message, "Connection refused");
}

#[tokio::test]
async fn forced_inline_long_running_action_reports_completion() {
    let transport = MockTransport::replying(0, "done\n");
    let request = ActionRequest::new(ActionKind::DeleteSite).param("domain", "example.com");
    let completion = launcher(transport.clone())
        .launch_inline(&credential(), &request)
        .await
        .unwrap();
    assert_eq!(completion.outcome.unwrap().title, "Site deletion completed");
    assert!(!transport.commands()[0].contains("nohup"));
}

#[tokio::test]
async fn launch_logs_never_contain_the_password() {
    let logger = Logger::capturing("test");
    let transport = MockTransport::replying(0, "77\n");
    let launcher = JobLauncher::new(
        logger.clone(),
        transport,
        Arc::new(OutcomeClassifier::default()),
        "/tmp".to_string(),
    );
    let request = ActionRequest::new(ActionKind::CreateSite)
        .param("domain", "example.com")
        .param("user", "admin")
        .param("pass", "Sup3r-Secret-Pw")
        .param("email", "ops@example.com");
    launcher.launch(&credential(), &request).await.unwrap();

    let lines = logger.captured();
    assert!(lines.iter().any(|l| l.contains("Detached job launched")));
    assert!(lines.iter().all(|l| !l.contains("Sup3r-Secret-Pw")));
    assert!(lines.iter().all(|l| !l.contains("hunter2")));
}

#[tokio::test]
async fn output_resembling_the_secret_is_returned_verbatim() {
    let transport = MockTransport::replying(0, "hunter2.example.com\nblog.example.com\n");
    let completion = launcher(transport)
        .launch_inline(&credential(), &ActionRequest::new(ActionKind::ListSites))
        .await
        .unwrap();
    assert_eq!(completion.result.stdout, "hunter2.example.com\nblog.example.com\n");
}

#[tokio::test]
async fn failure_details_mask_known_secrets() {
    let transport = MockTransport::new(|_| {
        Ok(completed(1, "retrying with hunter2", "Error: --user_pass=Sup3r-Secret-Pw rejected"))
    });
    let request = ActionRequest::new(ActionKind::UpdateAccount)
        .param("domain", "example.com")
        .param("user_id", "7")
        .param("pass", "Sup3r-Secret-Pw");
    let err = launcher(transport)
        .launch_inline(&credential(), &request)
        .await
        .unwrap_err();
    let details = err.details.unwrap().to_string();
    assert!(!details.contains("hunter2"));
    assert!(!details.contains("Sup3r-Secret-Pw"));
    assert!(details.contains("rejected"));
}

#[tokio::test]
async fn forced_inline_success_still_applies_recovery_rules() {
    let transport = MockTransport::replying(0, "Issuing certificate...\nAborting SSL certificate issuance\n");
    let request = ActionRequest::new(ActionKind::InstallTls).param("domain", "example.com");
    let outcome = launcher(transport)
        .launch_inline(&credential(), &request)
        .await
        .unwrap()
        .outcome
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::CompletedWithWarning);
}

use crate::config;
use crate::errors::ToolError;
use crate::managers::jobs::JobManager;
use crate::managers::ops::{OpsManager, OpsSettings};
use crate::mcp::catalog::tool_catalog;
use crate::services::classifier::OutcomeClassifier;
use crate::services::job::JobService;
use crate::services::logger::Logger;
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use crate::services::transport::{RemoteTransport, SshSettings, SshTransport};
use crate::services::validation::Validation;
use std::collections::HashMap;
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub tool_executor: Arc<ToolExecutor>,
    pub job_service: Arc<JobService>,
    pub classifier: Arc<OutcomeClassifier>,
}

impl App {
    fn validate_tool_wiring(
        handlers: &HashMap<String, Arc<dyn ToolHandler>>,
    ) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !handlers.contains_key(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_hint("Every tool in the catalog must have a registered handler.")
            .with_details(serde_json::json!({ "missing_tools": missing })))
    }

    pub fn initialize() -> Result<Self, ToolError> {
        let logger = Logger::new("hostops");
        let ssh_settings = SshSettings::from_env();
        let transport: Arc<dyn RemoteTransport> =
            Arc::new(SshTransport::new(logger.clone(), ssh_settings));
        let classifier = Arc::new(OutcomeClassifier::from_path(
            config::resolve_outcome_rules_path().as_deref(),
        )?);
        let job_service = Arc::new(JobService::new(logger.clone())?);
        let settings = OpsSettings {
            artifact_dir: config::resolve_artifact_dir()?,
            poll_max_log_bytes: config::resolve_poll_max_log_bytes(ssh_settings.max_capture_bytes),
            poll_interval_ms: config::resolve_poll_interval_ms(),
            call_budget_ms: config::resolve_tool_call_budget_ms(),
        };
        Self::assemble(logger, transport, classifier, job_service, settings)
    }

    /// Wires managers around an already-built transport and registry.
    pub fn assemble(
        logger: Logger,
        transport: Arc<dyn RemoteTransport>,
        classifier: Arc<OutcomeClassifier>,
        job_service: Arc<JobService>,
        settings: OpsSettings,
    ) -> Result<Self, ToolError> {
        let validation = Validation::new();
        let ops_manager: Arc<dyn ToolHandler> = Arc::new(OpsManager::new(
            logger.clone(),
            validation.clone(),
            transport,
            classifier.clone(),
            job_service.clone(),
            settings,
        ));
        let job_manager: Arc<dyn ToolHandler> = Arc::new(JobManager::new(
            logger.clone(),
            validation,
            job_service.clone(),
        ));

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        handlers.insert("hostops_ops".to_string(), ops_manager);
        handlers.insert("hostops_jobs".to_string(), job_manager);

        Self::validate_tool_wiring(&handlers)?;

        let tool_executor = Arc::new(ToolExecutor::new(logger.clone(), handlers));
        logger.debug(
            "Application wired",
            Some(&serde_json::json!({
                "tools": tool_catalog().iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                "outcome_rules": classifier.rules().len(),
            })),
        );

        Ok(Self {
            logger,
            tool_executor,
            job_service,
            classifier,
        })
    }
}

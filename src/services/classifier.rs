use crate::constants::jobs::EXIT_MARKER;
use crate::errors::ToolError;
use crate::services::command_builder::ActionKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SSL_ABORT_MARKER: &str = "Aborting SSL certificate issuance";
const FAILURE_TEXT: &str = "The operation failed. Check the logs for details.";
const FAILURE_WORDS: [&str; 3] = ["fail", "error", "aborting"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    CompletedWithWarning,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl Outcome {
    pub fn completed(action: ActionKind) -> Self {
        Self {
            status: OutcomeStatus::Completed,
            title: format!("{} completed", action.title()),
            warning_text: None,
            error_text: None,
        }
    }

    pub fn failed(action: ActionKind) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            title: format!("Failed: {}", action.title()),
            warning_text: None,
            error_text: Some(FAILURE_TEXT.to_string()),
        }
    }
}

/// Output that looks like a failure but is a known, recoverable situation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRule {
    pub action: ActionKind,
    pub marker: String,
    pub status: OutcomeStatus,
    pub title: String,
    pub message: String,
}

impl RecoveryRule {
    fn matches(&self, action: ActionKind, output: &str) -> bool {
        self.action == action && !self.marker.is_empty() && output.contains(&self.marker)
    }

    fn outcome(&self) -> Outcome {
        let (warning_text, error_text) = match self.status {
            OutcomeStatus::Completed => (None, None),
            OutcomeStatus::CompletedWithWarning => (Some(self.message.clone()), None),
            OutcomeStatus::Failed => (None, Some(self.message.clone())),
        };
        Outcome {
            status: self.status,
            title: self.title.clone(),
            warning_text,
            error_text,
        }
    }
}

fn builtin_rules() -> Vec<RecoveryRule> {
    vec![
        RecoveryRule {
            action: ActionKind::InstallTls,
            marker: SSL_ABORT_MARKER.to_string(),
            status: OutcomeStatus::CompletedWithWarning,
            title: "TLS installation finished with a warning".to_string(),
            message: "The certificate was not issued because the domain's DNS does not point at this server. Fix the DNS records and try again.".to_string(),
        },
        RecoveryRule {
            action: ActionKind::CreateSite,
            marker: SSL_ABORT_MARKER.to_string(),
            status: OutcomeStatus::CompletedWithWarning,
            title: "Site created with a warning".to_string(),
            message: "The site was created but TLS failed. Point the domain's DNS at the server's IP and install TLS from the panel.".to_string(),
        },
    ]
}

/// Exit code from the last exit marker line in `log`, if any.
pub fn last_exit_marker(log: &str) -> Option<i64> {
    log.lines()
        .rev()
        .filter_map(|line| line.trim().strip_prefix(EXIT_MARKER))
        .find_map(|value| value.trim().parse::<i64>().ok())
}

#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    rules: Vec<RecoveryRule>,
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }
}

impl OutcomeClassifier {
    /// Built-in rules followed by `extra`.
    pub fn with_rules(extra: Vec<RecoveryRule>) -> Self {
        let mut rules = builtin_rules();
        rules.extend(extra);
        Self { rules }
    }

    pub fn from_path(path: Option<&Path>) -> Result<Self, ToolError> {
        match path {
            Some(path) => Ok(Self::with_rules(load_rules(path)?)),
            None => Ok(Self::default()),
        }
    }

    pub fn rules(&self) -> &[RecoveryRule] {
        &self.rules
    }

    /// First recovery rule matching `action` and `output`.
    pub fn recover(&self, action: ActionKind, output: &str) -> Option<Outcome> {
        self.rules
            .iter()
            .find(|rule| rule.matches(action, output))
            .map(RecoveryRule::outcome)
    }

    pub fn classify(&self, action: ActionKind, log: &str) -> Outcome {
        if let Some(outcome) = self.recover(action, log) {
            return outcome;
        }
        if let Some(code) = last_exit_marker(log) {
            return if code == 0 {
                Outcome::completed(action)
            } else {
                Outcome::failed(action)
            };
        }
        let lowered = log.to_lowercase();
        if FAILURE_WORDS.iter().any(|word| lowered.contains(word)) {
            Outcome::failed(action)
        } else {
            Outcome::completed(action)
        }
    }
}

pub fn load_rules(path: &Path) -> Result<Vec<RecoveryRule>, ToolError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        ToolError::invalid_params(format!(
            "Failed to read outcome rules {}: {}",
            path.display(),
            err
        ))
    })?;
    let rules: Vec<RecoveryRule> = serde_json::from_str(&raw).map_err(|err| {
        ToolError::invalid_params(format!(
            "Outcome rules {} are not a valid JSON array: {}",
            path.display(),
            err
        ))
        .with_hint("Each entry needs action, marker, status, title and message.")
    })?;
    if let Some(rule) = rules.iter().find(|rule| rule.marker.trim().is_empty()) {
        return Err(ToolError::invalid_params(format!(
            "Outcome rule for {} has an empty marker",
            rule.action
        )));
    }
    Ok(rules)
}

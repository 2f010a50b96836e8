use crate::errors::ToolError;
use crate::utils::shell::{normalize_domain, quote};
use crate::utils::tool_errors::unknown_action_error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Administrative operations the builder knows how to express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    #[serde(alias = "install-wordops")]
    InstallPlatform,
    #[serde(alias = "create-wordpress-site")]
    CreateSite,
    #[serde(alias = "delete-wordpress-site", alias = "delete-wp-site")]
    DeleteSite,
    #[serde(alias = "install-ssl-site")]
    InstallTls,
    #[serde(alias = "create-wp-user")]
    CreateAccount,
    #[serde(alias = "update-wp-user")]
    UpdateAccount,
    #[serde(alias = "delete-wp-user")]
    DeleteAccount,
    #[serde(alias = "check-wordops-installed")]
    ProbePlatformInstalled,
    #[serde(alias = "get-installed-sites")]
    ListSites,
    #[serde(alias = "get-wp-users")]
    ListAccounts,
}

/// Which long-running jobs may not overlap on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionClass {
    Platform,
    Site,
    Account,
}

impl ExclusionClass {
    pub fn conflicts_with(self, other: ExclusionClass) -> bool {
        self == ExclusionClass::Platform || other == ExclusionClass::Platform || self == other
    }
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        ActionKind::InstallPlatform,
        ActionKind::CreateSite,
        ActionKind::DeleteSite,
        ActionKind::InstallTls,
        ActionKind::CreateAccount,
        ActionKind::UpdateAccount,
        ActionKind::DeleteAccount,
        ActionKind::ProbePlatformInstalled,
        ActionKind::ListSites,
        ActionKind::ListAccounts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::InstallPlatform => "install-platform",
            ActionKind::CreateSite => "create-site",
            ActionKind::DeleteSite => "delete-site",
            ActionKind::InstallTls => "install-tls",
            ActionKind::CreateAccount => "create-account",
            ActionKind::UpdateAccount => "update-account",
            ActionKind::DeleteAccount => "delete-account",
            ActionKind::ProbePlatformInstalled => "probe-platform-installed",
            ActionKind::ListSites => "list-sites",
            ActionKind::ListAccounts => "list-accounts",
        }
    }

    fn legacy_name(self) -> &'static str {
        match self {
            ActionKind::InstallPlatform => "install-wordops",
            ActionKind::CreateSite => "create-wordpress-site",
            ActionKind::DeleteSite => "delete-wordpress-site",
            ActionKind::InstallTls => "install-ssl-site",
            ActionKind::CreateAccount => "create-wp-user",
            ActionKind::UpdateAccount => "update-wp-user",
            ActionKind::DeleteAccount => "delete-wp-user",
            ActionKind::ProbePlatformInstalled => "check-wordops-installed",
            ActionKind::ListSites => "get-installed-sites",
            ActionKind::ListAccounts => "get-wp-users",
        }
    }

    /// Canonical names followed by every legacy alias `parse` understands.
    pub fn accepted_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = ActionKind::ALL.iter().map(|k| k.as_str()).collect();
        names.extend(ActionKind::ALL.iter().map(|k| k.legacy_name()));
        names.push("delete-wp-site");
        names
    }

    pub fn parse(raw: &str) -> Result<Self, ToolError> {
        let normalized = raw.trim().to_lowercase().replace('_', "-");
        if normalized == "delete-wp-site" {
            return Ok(ActionKind::DeleteSite);
        }
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized || kind.legacy_name() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = ActionKind::ALL.iter().map(|k| k.as_str()).collect();
                unknown_action_error("action_kind", raw, &known)
            })
    }

    pub fn title(self) -> &'static str {
        match self {
            ActionKind::InstallPlatform => "Platform installation",
            ActionKind::CreateSite => "Site creation",
            ActionKind::DeleteSite => "Site deletion",
            ActionKind::InstallTls => "TLS installation",
            ActionKind::CreateAccount => "Account creation",
            ActionKind::UpdateAccount => "Account update",
            ActionKind::DeleteAccount => "Account deletion",
            ActionKind::ProbePlatformInstalled => "Platform check",
            ActionKind::ListSites => "Site listing",
            ActionKind::ListAccounts => "Account listing",
        }
    }

    pub fn is_long_running(self) -> bool {
        self.exclusion_class().is_some()
    }

    /// A non-zero exit from these kinds answers the question instead of
    /// signalling a failure.
    pub fn nonzero_exit_is_answer(self) -> bool {
        matches!(self, ActionKind::ProbePlatformInstalled)
    }

    pub fn exclusion_class(self) -> Option<ExclusionClass> {
        match self {
            ActionKind::InstallPlatform => Some(ExclusionClass::Platform),
            ActionKind::CreateSite | ActionKind::DeleteSite | ActionKind::InstallTls => {
                Some(ExclusionClass::Site)
            }
            ActionKind::CreateAccount | ActionKind::UpdateAccount | ActionKind::DeleteAccount => {
                Some(ExclusionClass::Account)
            }
            ActionKind::ProbePlatformInstalled | ActionKind::ListSites | ActionKind::ListAccounts => {
                None
            }
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: ActionKind,
    pub parameters: BTreeMap<String, String>,
}

impl ActionRequest {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            parameters: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    fn lookup(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.parameters.get(*key))
            .map(|v| v.as_str())
            .find(|v| !v.trim().is_empty())
    }

    fn required(&self, keys: &[&str]) -> Result<&str, ToolError> {
        self.lookup(keys).ok_or_else(|| {
            ToolError::invalid_params(format!(
                "{} requires parameter '{}'",
                self.action, keys[0]
            ))
        })
    }

    /// Trimmed for identifiers; passwords keep their exact bytes.
    fn required_trimmed(&self, keys: &[&str]) -> Result<&str, ToolError> {
        self.required(keys).map(str::trim)
    }

    fn domain(&self) -> Result<String, ToolError> {
        let raw = self.required(&["domain"])?;
        let domain = normalize_domain(raw);
        if domain.is_empty() || domain.contains('/') {
            return Err(ToolError::invalid_params(format!(
                "{} received an invalid domain: {}",
                self.action, raw
            ))
            .with_hint("Pass a bare host name such as example.com."));
        }
        Ok(domain)
    }

    /// Values that must never appear in logs.
    pub fn secret_values(&self) -> Vec<String> {
        ["pass", "password", "user_pass"]
            .iter()
            .filter_map(|key| self.parameters.get(*key))
            .filter(|v| !v.is_empty())
            .cloned()
            .collect()
    }
}

fn site_root(domain: &str) -> String {
    quote(&format!("/var/www/{}/htdocs", domain))
}

/// Renders the shell command for `request`. Every caller-supplied value is
/// single-quoted; multi-step commands are joined with `&&`.
pub fn build(request: &ActionRequest) -> Result<String, ToolError> {
    let command = match request.action {
        ActionKind::InstallPlatform => {
            let username = request.required_trimmed(&["username", "user"])?;
            let email = request.required_trimmed(&["email"])?;
            format!(
                "printf '[user]\\n    name = %s\\n    email = %s\\n' {} {} > ~/.gitconfig && wget -qO wo wops.cc && sudo bash wo --force && sudo wo stack install",
                quote(username),
                quote(email)
            )
        }
        ActionKind::CreateSite => {
            let domain = request.domain()?;
            let user = request.required_trimmed(&["user", "username"])?;
            let pass = request.required(&["pass", "password"])?;
            let email = request.required_trimmed(&["email"])?;
            format!(
                "sudo wo site create {} --wp --user={} --pass={} --email={} --le && sudo ufw allow 80/tcp && sudo ufw allow 443/tcp && sudo ufw reload && echo 'y' | sudo ufw enable",
                quote(&domain),
                quote(user),
                quote(pass),
                quote(email)
            )
        }
        ActionKind::DeleteSite => {
            let domain = request.domain()?;
            format!("sudo wo site delete {} --force", quote(&domain))
        }
        ActionKind::InstallTls => {
            let domain = request.domain()?;
            format!(
                "echo 'y' | sudo wo site update {} --letsencrypt",
                quote(&domain)
            )
        }
        ActionKind::CreateAccount => {
            let domain = request.domain()?;
            let username = request.required_trimmed(&["username", "user"])?;
            let email = request.required_trimmed(&["email"])?;
            let role = request.required_trimmed(&["role"])?;
            let pass = request.required(&["pass", "password", "user_pass"])?;
            format!(
                "cd {} && wp user create {} {} --role={} --user_pass={} --allow-root",
                site_root(&domain),
                quote(username),
                quote(email),
                quote(role),
                quote(pass)
            )
        }
        ActionKind::UpdateAccount => {
            let domain = request.domain()?;
            let user_id = request.required_trimmed(&["user_id", "userId"])?;
            let mut flags = String::new();
            if let Some(pass) = request.lookup(&["pass", "password", "user_pass"]) {
                flags.push_str(&format!(" --user_pass={}", quote(pass)));
            }
            if let Some(email) = request.lookup(&["email"]) {
                flags.push_str(&format!(" --user_email={}", quote(email.trim())));
            }
            if let Some(role) = request.lookup(&["role"]) {
                flags.push_str(&format!(" --role={}", quote(role.trim())));
            }
            if flags.is_empty() {
                return Err(ToolError::invalid_params(
                    "update-account requires at least one of pass, email or role",
                ));
            }
            format!(
                "cd {} && wp user update {}{} --allow-root",
                site_root(&domain),
                quote(user_id),
                flags
            )
        }
        ActionKind::DeleteAccount => {
            let domain = request.domain()?;
            let user_id = request.required_trimmed(&["user_id", "userId"])?;
            format!(
                "cd {} && wp user delete {} --yes --allow-root",
                site_root(&domain),
                quote(user_id)
            )
        }
        ActionKind::ProbePlatformInstalled => "wo --version".to_string(),
        ActionKind::ListSites => "ls /etc/nginx/sites-available/".to_string(),
        ActionKind::ListAccounts => {
            let domain = request.domain()?;
            format!(
                "cd {} && wp user list --allow-root --format=json",
                site_root(&domain)
            )
        }
    };
    Ok(command)
}

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{EmailError, EmailResult};

pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const PLAIN_IMAP_PORT: u16 = 143;
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const IMPLICIT_TLS_SMTP_PORT: u16 = 465;

/// Top-level document shape: everything lives under an `[email]` table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct ConfigFile {
    #[serde(default)]
    email: EmailConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EmailConfig {
    /// Audit address for outbound mail. Unused by ingestion.
    #[serde(default)]
    pub bcc_owner: String,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub name: String,
    pub imap: ImapConfig,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    /// Outbound identity, e.g. `Agent <agent@example.com>`. Empty for
    /// read-only accounts.
    #[serde(default)]
    pub default_from: String,
    #[serde(default)]
    pub sent_folder: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ImapConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub starttls: Option<bool>,
}

impl ImapConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_IMAP_PORT)
    }

    /// Implicit TLS unless explicitly disabled; port 143 defaults to STARTTLS.
    pub fn use_tls(&self) -> bool {
        self.tls.unwrap_or(self.port() != PLAIN_IMAP_PORT)
    }
}

impl SmtpConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SMTP_PORT)
    }

    pub fn use_starttls(&self) -> bool {
        self.starttls.unwrap_or(self.port() != IMPLICIT_TLS_SMTP_PORT)
    }
}

impl AccountConfig {
    pub fn new(name: impl Into<String>, imap: ImapConfig) -> Self {
        Self {
            name: name.into(),
            imap,
            smtp: None,
            default_from: String::new(),
            sent_folder: None,
        }
    }

    pub fn with_default_from(mut self, from: impl Into<String>) -> Self {
        self.default_from = from.into();
        self
    }

    fn smtp_enabled(&self) -> bool {
        self.smtp
            .as_ref()
            .map(|smtp| !smtp.host.trim().is_empty())
            .unwrap_or(false)
    }

    fn apply_defaults(&mut self) {
        let imap_port = self.imap.port();
        self.imap.port = Some(imap_port);
        self.imap.tls = Some(self.imap.use_tls());

        if let Some(smtp) = self.smtp.as_mut() {
            let smtp_port = smtp.port();
            smtp.port = Some(smtp_port);
            smtp.starttls = Some(smtp.use_starttls());
        }
    }

    fn validate(&self) -> EmailResult<()> {
        let name = &self.name;
        if self.imap.host.trim().is_empty() {
            return Err(EmailError::Config(format!(
                "account {name:?}: imap.host is required"
            )));
        }
        if self.imap.username.trim().is_empty() {
            return Err(EmailError::Config(format!(
                "account {name:?}: imap.username is required"
            )));
        }
        if self.imap.port == Some(0) {
            return Err(EmailError::Config(format!(
                "account {name:?}: imap.port must be between 1 and 65535"
            )));
        }
        if let Some(smtp) = &self.smtp {
            if smtp.port == Some(0) {
                return Err(EmailError::Config(format!(
                    "account {name:?}: smtp.port must be between 1 and 65535"
                )));
            }
        }
        if self.smtp_enabled() {
            let smtp_user_missing = self
                .smtp
                .as_ref()
                .map(|smtp| smtp.username.trim().is_empty())
                .unwrap_or(true);
            if smtp_user_missing {
                return Err(EmailError::Config(format!(
                    "account {name:?}: smtp.username is required when smtp.host is set"
                )));
            }
            if self.default_from.trim().is_empty() {
                return Err(EmailError::Config(format!(
                    "account {name:?}: default_from is required when smtp.host is set"
                )));
            }
        }
        Ok(())
    }
}

impl EmailConfig {
    pub fn from_toml_str(raw: &str) -> EmailResult<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| EmailError::Config(e.to_string()))?;
        let mut config = file.email;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EmailResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EmailError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn apply_defaults(&mut self) {
        for account in &mut self.accounts {
            account.apply_defaults();
        }
    }

    pub fn validate(&self) -> EmailResult<()> {
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                return Err(EmailError::Config("account name must not be empty".into()));
            }
            if !seen.insert(account.name.as_str()) {
                return Err(EmailError::Config(format!(
                    "duplicate account name {:?}",
                    account.name
                )));
            }
            account.validate()?;
        }
        Ok(())
    }
}

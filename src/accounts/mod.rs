//! Directory of named mail clients. The first configured account is primary.
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{AccountConfig, EmailConfig};
use crate::errors::{EmailError, EmailResult};
use crate::imap::{Dialer, ImapClient, MailClient};

struct ManagedAccount<C> {
    config: AccountConfig,
    client: Arc<C>,
}

pub struct AccountManager<C = ImapClient> {
    accounts: Vec<ManagedAccount<C>>,
    bcc_owner: String,
}

impl AccountManager<ImapClient> {
    /// One IMAP client per configured account. Nothing is dialed here.
    pub fn new(config: &EmailConfig) -> EmailResult<Self> {
        config.validate()?;
        let accounts = config
            .accounts
            .iter()
            .map(|account| (account.clone(), ImapClient::new(account.clone())))
            .collect();
        Self::from_clients(config.bcc_owner.clone(), accounts)
    }

    pub fn with_dialer(config: &EmailConfig, dialer: Arc<dyn Dialer>) -> EmailResult<Self> {
        config.validate()?;
        let accounts = config
            .accounts
            .iter()
            .map(|account| {
                let client = ImapClient::with_dialer(account.clone(), Arc::clone(&dialer));
                (account.clone(), client)
            })
            .collect();
        Self::from_clients(config.bcc_owner.clone(), accounts)
    }
}

impl<C: MailClient> AccountManager<C> {
    pub fn from_clients(
        bcc_owner: impl Into<String>,
        accounts: Vec<(AccountConfig, C)>,
    ) -> EmailResult<Self> {
        let mut seen = HashSet::new();
        for (config, _) in &accounts {
            if config.name.trim().is_empty() {
                return Err(EmailError::Config("account name must not be empty".into()));
            }
            if !seen.insert(config.name.clone()) {
                return Err(EmailError::Config(format!(
                    "duplicate account name {:?}",
                    config.name
                )));
            }
        }

        Ok(Self {
            accounts: accounts
                .into_iter()
                .map(|(config, client)| ManagedAccount {
                    config,
                    client: Arc::new(client),
                })
                .collect(),
            bcc_owner: bcc_owner.into(),
        })
    }

    fn find(&self, name: &str) -> EmailResult<&ManagedAccount<C>> {
        let found = if name.is_empty() {
            self.accounts.first()
        } else {
            self.accounts.iter().find(|acc| acc.config.name == name)
        };
        found.ok_or_else(|| {
            let shown = if name.is_empty() { self.primary() } else { name };
            EmailError::NotFound(format!("account {shown:?}"))
        })
    }

    /// Empty `name` resolves to the primary account.
    pub fn account(&self, name: &str) -> EmailResult<Arc<C>> {
        self.find(name).map(|acc| Arc::clone(&acc.client))
    }

    pub fn account_config(&self, name: &str) -> EmailResult<&AccountConfig> {
        self.find(name).map(|acc| &acc.config)
    }

    pub fn bcc_owner(&self) -> &str {
        &self.bcc_owner
    }

    /// Name of the first configured account, or empty when there is none.
    pub fn primary(&self) -> &str {
        self.accounts
            .first()
            .map(|acc| acc.config.name.as_str())
            .unwrap_or_default()
    }

    pub fn account_names(&self) -> Vec<String> {
        self.accounts
            .iter()
            .map(|acc| acc.config.name.clone())
            .collect()
    }

    /// Closes every client. Failures are logged and do not stop the others.
    pub async fn close(&self) {
        for acc in &self.accounts {
            match acc.client.close().await {
                Ok(()) => debug!(account = %acc.config.name, "Mail client closed"),
                Err(e) => {
                    warn!(account = %acc.config.name, error = %e, "Closing mail client failed")
                }
            }
        }
    }
}

//! Scheduled new-mail detection across all accounts.
//!
//! Each `(account, INBOX)` pair has a high-water mark in the op-state store
//! (namespace `email_poll`, key `<account>:INBOX`). The first poll only
//! records the current highest UID; later polls report UIDs above the mark
//! and move it forward. The mark never moves backwards.
mod summary;
mod watermark;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use summary::{bare_address, filter_self_sent, format_section};
pub use watermark::{format_watermark, next_watermark, parse_watermark, watermark_key};

use crate::accounts::AccountManager;
use crate::context::CallContext;
use crate::errors::EmailResult;
use crate::imap::{ImapClient, MailClient};
use crate::storage::OpStateStore;
use crate::types::{Envelope, ListQuery, DEFAULT_FOLDER};

pub const POLL_NAMESPACE: &str = "email_poll";
pub const POLL_HEADER: &str = "New email detected:";

pub struct Poller<C = ImapClient> {
    accounts: Arc<AccountManager<C>>,
    store: OpStateStore,
}

impl<C: MailClient> Poller<C> {
    pub fn new(accounts: Arc<AccountManager<C>>, store: OpStateStore) -> Self {
        Self { accounts, store }
    }

    /// Returns a summary of newly arrived mail, or an empty string when there
    /// is nothing to report.
    ///
    /// Accounts are polled one after another. A failing account is logged and
    /// skipped; storage failures and cancellation abort the whole call.
    pub async fn check_new_messages(&self, ctx: &CallContext) -> EmailResult<String> {
        let mut sections = Vec::new();
        for name in self.accounts.account_names() {
            ctx.check()?;
            match self.poll_account(ctx, &name).await {
                Ok(section) if section.is_empty() => {}
                Ok(section) => sections.push(section),
                Err(e) if e.is_fatal_for_cycle() => {
                    warn!(account = %name, error = %e, "Email poll aborted");
                    return Err(e);
                }
                Err(e) => warn!(account = %name, error = %e, "Email poll failed for account"),
            }
        }

        if sections.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{POLL_HEADER}\n\n{}", sections.concat()))
    }

    async fn poll_account(&self, ctx: &CallContext, account: &str) -> EmailResult<String> {
        let client = self.accounts.account(account)?;
        let key = watermark_key(account, DEFAULT_FOLDER);
        let stored = self.store.get(POLL_NAMESPACE, &key).await?;

        if stored.is_empty() {
            self.seed(ctx, client.as_ref(), account, &key, false).await?;
            return Ok(String::new());
        }

        let mark = match parse_watermark(&stored) {
            Some(0) => {
                warn!(account = %account, "Zero email watermark, reseeding");
                self.seed(ctx, client.as_ref(), account, &key, true).await?;
                return Ok(String::new());
            }
            Some(mark) => mark,
            None => {
                warn!(account = %account, value = %stored, "Corrupt email watermark, reseeding");
                self.seed(ctx, client.as_ref(), account, &key, true).await?;
                return Ok(String::new());
            }
        };

        let mut envelopes = client
            .list_messages(ctx, &ListQuery::since(DEFAULT_FOLDER, mark))
            .await?;
        if envelopes.is_empty() {
            return Ok(String::new());
        }

        // Advance before filtering so self-sent mail is not examined again.
        self.advance(account, &key, mark, &envelopes).await?;

        envelopes.retain(|env| env.uid > mark);
        let config = self.accounts.account_config(account)?;
        let fresh = filter_self_sent(envelopes, &config.default_from);
        if fresh.is_empty() {
            return Ok(String::new());
        }

        info!(account = %account, count = fresh.len(), "New email detected");
        Ok(format_section(account, DEFAULT_FOLDER, &fresh))
    }

    /// Records the current highest UID without reporting anything. `replace`
    /// overwrites an unusable stored value; otherwise the write is monotone.
    async fn seed(
        &self,
        ctx: &CallContext,
        client: &C,
        account: &str,
        key: &str,
        replace: bool,
    ) -> EmailResult<()> {
        let latest = client
            .list_messages(ctx, &ListQuery::latest(DEFAULT_FOLDER, 1))
            .await?;
        let Some(top) = latest.iter().map(|env| env.uid).max() else {
            debug!(account = %account, "Mailbox empty, watermark not seeded");
            return Ok(());
        };

        if replace {
            self.store
                .set(POLL_NAMESPACE, key, &format_watermark(top))
                .await?;
        } else if !self.store.advance(POLL_NAMESPACE, key, top).await? {
            debug!(account = %account, uid = top, "Watermark already seeded elsewhere");
            return Ok(());
        }
        info!(account = %account, uid = top, "Seeded email watermark");
        Ok(())
    }

    /// `current` may be stale when polls overlap; the store only accepts a
    /// larger value, so a slower poll can never pull the mark back.
    async fn advance(
        &self,
        account: &str,
        key: &str,
        current: u32,
        envelopes: &[Envelope],
    ) -> EmailResult<u32> {
        let next = next_watermark(current, envelopes.iter().map(|env| env.uid));
        if next > current && self.store.advance(POLL_NAMESPACE, key, next).await? {
            debug!(account = %account, from = current, to = next, "Advanced email watermark");
        }
        Ok(next)
    }
}

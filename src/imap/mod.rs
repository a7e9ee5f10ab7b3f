//! Per-account IMAP client: one lazily dialed connection behind a mutex.
mod connect;
pub mod fetch;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Name, NameAttribute};
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub use connect::{read_greeting, BoxedStream, Dialer, ImapSession, ImapStream, NetworkDialer};

use crate::config::AccountConfig;
use crate::context::CallContext;
use crate::errors::{EmailError, EmailResult};
use crate::mime;
use crate::types::{Envelope, Folder, ListQuery, Message, MessageFlag, SearchOptions};

/// Largest raw message kept in memory for MIME parsing.
pub const MAX_RAW_MESSAGE_BYTES: usize = 5 * 1024 * 1024;

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// The operations the poller needs from a mailbox connection.
#[async_trait]
pub trait MailClient: Send + Sync {
    async fn list_messages(
        &self,
        ctx: &CallContext,
        query: &ListQuery,
    ) -> EmailResult<Vec<Envelope>>;

    async fn close(&self) -> EmailResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Idle,
    /// Authenticated and believed usable.
    Live,
    /// A command or NOOP failed; redial before the next command.
    Stale,
}

struct Connection {
    session: Option<ImapSession>,
    state: ConnectionState,
}

impl Connection {
    fn session(&mut self) -> EmailResult<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::Transport("no IMAP session".into()))
    }

    fn observe<T>(&mut self, result: &EmailResult<T>) {
        if let Err(e) = result {
            if e.is_connection_error() {
                self.state = ConnectionState::Stale;
            }
        }
    }
}

pub struct ImapClient {
    account: String,
    config: AccountConfig,
    dialer: Arc<dyn Dialer>,
    conn: Mutex<Connection>,
}

impl ImapClient {
    pub fn new(config: AccountConfig) -> Self {
        Self::with_dialer(config, Arc::new(NetworkDialer))
    }

    pub fn with_dialer(config: AccountConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            account: config.name.clone(),
            config,
            dialer,
            conn: Mutex::new(Connection {
                session: None,
                state: ConnectionState::Idle,
            }),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub async fn state(&self) -> ConnectionState {
        self.conn.lock().await.state
    }

    /// Newest-first envelopes. See [`ListQuery`] for the `limit` and
    /// `since_uid` rules.
    pub async fn list_messages(
        &self,
        ctx: &CallContext,
        query: &ListQuery,
    ) -> EmailResult<Vec<Envelope>> {
        let mut guard = self.acquire(ctx).await?;
        let conn = &mut *guard;
        let result = match conn.session() {
            Ok(session) => ctx.run(list_envelopes(session, query)).await,
            Err(e) => Err(e),
        };
        conn.observe(&result);
        result
    }

    /// Fetches and parses one message. Marks it seen on the server.
    pub async fn read_message(
        &self,
        ctx: &CallContext,
        folder: &str,
        uid: u32,
    ) -> EmailResult<Message> {
        let mut guard = self.acquire(ctx).await?;
        let conn = &mut *guard;
        let result = match conn.session() {
            Ok(session) => ctx.run(fetch_message(session, folder, uid)).await,
            Err(e) => Err(e),
        };
        conn.observe(&result);
        result
    }

    pub async fn search_messages(
        &self,
        ctx: &CallContext,
        options: &SearchOptions,
    ) -> EmailResult<Vec<Envelope>> {
        let mut guard = self.acquire(ctx).await?;
        let conn = &mut *guard;
        let result = match conn.session() {
            Ok(session) => ctx.run(search_envelopes(session, options)).await,
            Err(e) => Err(e),
        };
        conn.observe(&result);
        result
    }

    /// Adds or removes `flag` (`seen`, `flagged` or `answered`) silently.
    pub async fn mark_messages(
        &self,
        ctx: &CallContext,
        folder: &str,
        uids: &[u32],
        flag: &str,
        add: bool,
    ) -> EmailResult<()> {
        let flag: MessageFlag = flag.parse()?;
        if uids.is_empty() {
            return Err(EmailError::InvalidArgument("no UIDs given".into()));
        }

        let mut guard = self.acquire(ctx).await?;
        let conn = &mut *guard;
        let result = match conn.session() {
            Ok(session) => ctx.run(store_flag(session, folder, uids, flag, add)).await,
            Err(e) => Err(e),
        };
        conn.observe(&result);
        result
    }

    /// Moves messages with UID MOVE, or COPY + \Deleted + EXPUNGE when the
    /// server lacks the MOVE extension.
    pub async fn move_messages(
        &self,
        ctx: &CallContext,
        uids: &[u32],
        source: &str,
        destination: &str,
    ) -> EmailResult<()> {
        if uids.is_empty() {
            return Err(EmailError::InvalidArgument("no UIDs given".into()));
        }
        if destination.trim().is_empty() {
            return Err(EmailError::InvalidArgument(
                "destination folder is empty".into(),
            ));
        }

        let mut guard = self.acquire(ctx).await?;
        let conn = &mut *guard;
        let result = match conn.session() {
            Ok(session) => ctx.run(move_uids(session, uids, source, destination)).await,
            Err(e) => Err(e),
        };
        conn.observe(&result);
        result
    }

    /// All mailboxes, sorted by name. Non-selectable ones carry zero counts.
    pub async fn list_folders(&self, ctx: &CallContext) -> EmailResult<Vec<Folder>> {
        let mut guard = self.acquire(ctx).await?;
        let conn = &mut *guard;
        let result = match conn.session() {
            Ok(session) => ctx.run(folders(session)).await,
            Err(e) => Err(e),
        };
        conn.observe(&result);
        result
    }

    /// Logs out (best effort) and returns to `Idle`.
    pub async fn close(&self) -> EmailResult<()> {
        let mut conn = self.conn.lock().await;
        conn.state = ConnectionState::Idle;
        let Some(mut session) = conn.session.take() else {
            return Ok(());
        };

        match tokio::time::timeout(LOGOUT_TIMEOUT, session.logout()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(EmailError::Transport("LOGOUT timed out".into())),
        }
    }

    async fn acquire(&self, ctx: &CallContext) -> EmailResult<MutexGuard<'_, Connection>> {
        let mut guard = ctx.run(async { Ok(self.conn.lock().await) }).await?;
        self.ensure_live(&mut guard, ctx).await?;
        Ok(guard)
    }

    /// Checks a live connection with NOOP; anything else is (re)dialed once.
    async fn ensure_live(&self, conn: &mut Connection, ctx: &CallContext) -> EmailResult<()> {
        if conn.state == ConnectionState::Live {
            if let Some(session) = conn.session.as_mut() {
                let noop = ctx
                    .run(async { session.noop().await.map_err(EmailError::from) })
                    .await;
                match noop {
                    Ok(()) => {
                        drain_unsolicited(session, &self.account);
                        return Ok(());
                    }
                    Err(e @ (EmailError::Cancelled | EmailError::DeadlineExceeded)) => {
                        conn.state = ConnectionState::Stale;
                        return Err(e);
                    }
                    Err(e) => {
                        info!(account = %self.account, error = %e, "IMAP NOOP failed, reconnecting");
                        conn.state = ConnectionState::Stale;
                    }
                }
            }
        }

        // Dropping the old session closes its socket.
        conn.session = None;
        conn.state = ConnectionState::Idle;

        let session = self.dial(ctx).await?;
        conn.session = Some(session);
        conn.state = ConnectionState::Live;
        Ok(())
    }

    async fn dial(&self, ctx: &CallContext) -> EmailResult<ImapSession> {
        let imap = &self.config.imap;
        let timeout = ctx.dial_timeout();
        debug!(
            account = %self.account,
            host = %imap.host,
            port = imap.port(),
            tls = imap.use_tls(),
            "Dialing IMAP server"
        );

        let connect = async {
            let client = self.dialer.dial(imap).await?;
            client
                .login(&imap.username, &imap.password)
                .await
                .map_err(|(err, _client)| EmailError::from(err))
        };

        let session = ctx
            .run(async {
                tokio::time::timeout(timeout, connect).await.map_err(|_| {
                    EmailError::Transport(format!(
                        "connecting to {} timed out after {}s",
                        imap.host,
                        timeout.as_secs()
                    ))
                })?
            })
            .await?;

        info!(account = %self.account, host = %imap.host, "IMAP session established");
        Ok(session)
    }
}

#[async_trait]
impl MailClient for ImapClient {
    async fn list_messages(
        &self,
        ctx: &CallContext,
        query: &ListQuery,
    ) -> EmailResult<Vec<Envelope>> {
        ImapClient::list_messages(self, ctx, query).await
    }

    async fn close(&self) -> EmailResult<()> {
        ImapClient::close(self).await
    }
}

fn drain_unsolicited(session: &mut ImapSession, account: &str) {
    while let Ok(response) = session.unsolicited_responses.try_recv() {
        debug!(account = %account, ?response, "Unsolicited IMAP response");
    }
}

async fn select(session: &mut ImapSession, folder: &str) -> EmailResult<()> {
    let mailbox = session.select(folder).await?;
    debug!(
        folder = %folder,
        exists = mailbox.exists,
        uid_validity = ?mailbox.uid_validity,
        "Selected folder"
    );
    Ok(())
}

async fn list_envelopes(session: &mut ImapSession, query: &ListQuery) -> EmailResult<Vec<Envelope>> {
    select(session, &query.folder).await?;

    let Some(criteria) = fetch::list_criteria(query) else {
        return Ok(Vec::new());
    };
    let found = session.uid_search(&criteria).await?;
    let uids = fetch::select_uids(found, query.since_uid, query.effective_limit());
    fetch_envelopes(session, &uids).await
}

async fn search_envelopes(
    session: &mut ImapSession,
    options: &SearchOptions,
) -> EmailResult<Vec<Envelope>> {
    select(session, options.folder()).await?;

    let criteria = fetch::search_criteria(options);
    let found = session.uid_search(&criteria).await?;
    let uids = fetch::select_uids(found, 0, options.effective_limit());
    fetch_envelopes(session, &uids).await
}

/// Fetches envelopes for `uids` and returns them in descending UID order.
async fn fetch_envelopes(session: &mut ImapSession, uids: &[u32]) -> EmailResult<Vec<Envelope>> {
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let set = fetch::uid_set(uids);
    let fetches: Vec<Fetch> = session
        .uid_fetch(&set, fetch::ENVELOPE_QUERY)
        .await?
        .try_collect()
        .await?;

    let wanted: HashSet<u32> = uids.iter().copied().collect();
    let mut envelopes = Vec::with_capacity(fetches.len());
    for item in &fetches {
        let Some(uid) = item.uid else {
            debug!(seq = item.message, "Skipping FETCH response without UID");
            continue;
        };
        if !wanted.contains(&uid) {
            debug!(uid, "Skipping FETCH response for unrequested UID");
            continue;
        }
        envelopes.push(fetch::envelope_from_fetch(uid, item));
    }

    envelopes.sort_by(|a, b| b.uid.cmp(&a.uid));
    envelopes.dedup_by_key(|env| env.uid);
    Ok(envelopes)
}

async fn fetch_message(session: &mut ImapSession, folder: &str, uid: u32) -> EmailResult<Message> {
    select(session, folder).await?;

    let summary: Vec<Fetch> = session
        .uid_fetch(uid.to_string(), fetch::ENVELOPE_QUERY)
        .await?
        .try_collect()
        .await?;
    let item = summary
        .iter()
        .find(|item| item.uid == Some(uid))
        .ok_or_else(|| EmailError::NotFound(format!("UID {uid} in {folder}")))?;
    let mut message = fetch::message_from_fetch(uid, item);

    // The declared size decides what is downloaded at all, so an oversized
    // body never reaches memory. Both queries are non-peek.
    let oversized = message.envelope.size as usize > MAX_RAW_MESSAGE_BYTES;
    let query = if oversized {
        info!(uid, size = message.envelope.size, "Message over 5 MiB, reading headers only");
        fetch::HEADER_QUERY
    } else {
        fetch::BODY_QUERY
    };

    // The whole response is consumed before looking at it, so any literal
    // the server sends is read off the wire in order.
    let fetches: Vec<Fetch> = session
        .uid_fetch(uid.to_string(), query)
        .await?
        .try_collect()
        .await?;
    let item = fetches
        .iter()
        .find(|item| item.uid == Some(uid))
        .ok_or_else(|| EmailError::NotFound(format!("UID {uid} in {folder}")))?;

    let flags: BTreeSet<String> = item.flags().map(|flag| fetch::flag_token(&flag)).collect();
    if !flags.is_empty() {
        message.envelope.flags = flags;
    }

    let raw = if oversized { item.header() } else { item.body() }.unwrap_or_default();
    let raw = if raw.len() > MAX_RAW_MESSAGE_BYTES {
        debug!(uid, size = raw.len(), "Server sent more than declared, parsing prefix only");
        &raw[..MAX_RAW_MESSAGE_BYTES]
    } else {
        raw
    };

    if let Err(e) = mime::extract_body(raw, &mut message) {
        warn!(uid, folder = %folder, error = %e, "MIME parse failed, keeping raw text");
        message.text_body = mime::bound_body(&String::from_utf8_lossy(raw));
    }
    Ok(message)
}

async fn store_flag(
    session: &mut ImapSession,
    folder: &str,
    uids: &[u32],
    flag: MessageFlag,
    add: bool,
) -> EmailResult<()> {
    select(session, folder).await?;

    let op = if add { '+' } else { '-' };
    let query = format!("{op}FLAGS.SILENT ({})", flag.imap_token());
    let _: Vec<Fetch> = session
        .uid_store(fetch::uid_set(uids), &query)
        .await?
        .try_collect()
        .await?;
    Ok(())
}

async fn move_uids(
    session: &mut ImapSession,
    uids: &[u32],
    source: &str,
    destination: &str,
) -> EmailResult<()> {
    select(session, source).await?;

    let set = fetch::uid_set(uids);
    let capabilities = session.capabilities().await?;
    if capabilities.has_str("MOVE") {
        session.uid_mv(&set, destination).await?;
        return Ok(());
    }

    debug!(source = %source, destination = %destination, "Server lacks MOVE, using COPY/EXPUNGE");
    session.uid_copy(&set, destination).await?;
    let _: Vec<Fetch> = session
        .uid_store(&set, "+FLAGS.SILENT (\\Deleted)")
        .await?
        .try_collect()
        .await?;
    let _: Vec<u32> = session.expunge().await?.try_collect().await?;
    Ok(())
}

async fn folders(session: &mut ImapSession) -> EmailResult<Vec<Folder>> {
    let names: Vec<Name> = session
        .list(Some(""), Some("*"))
        .await?
        .try_collect()
        .await?;

    let mut out = Vec::with_capacity(names.len());
    for name in &names {
        let attributes = name
            .attributes()
            .iter()
            .map(fetch::attribute_token)
            .collect::<BTreeSet<_>>();
        let selectable = !name
            .attributes()
            .iter()
            .any(|attr| matches!(attr, NameAttribute::NoSelect))
            && !attributes
                .iter()
                .any(|attr| attr.eq_ignore_ascii_case("\\NonExistent"));

        let (messages, unseen) = if selectable {
            match session.status(name.name(), "(MESSAGES UNSEEN)").await {
                Ok(mailbox) => (mailbox.exists, mailbox.unseen.unwrap_or(0)),
                Err(async_imap::error::Error::No(msg)) => {
                    warn!(folder = %name.name(), error = %msg, "STATUS rejected");
                    (0, 0)
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            (0, 0)
        };

        out.push(Folder {
            name: name.name().to_string(),
            attributes,
            selectable,
            messages,
            unseen,
        });
    }

    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

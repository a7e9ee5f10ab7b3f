use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::Barrier;

use mailwake::config::{AccountConfig, ImapConfig};
use mailwake::poller::{POLL_HEADER, POLL_NAMESPACE};
use mailwake::types::{Envelope, ListQuery};
use mailwake::{AccountManager, CallContext, EmailError, EmailResult, MailClient, OpStateStore, Poller};

/// In-memory INBOX. `ignore_since` mimics a server that answers a UID range
/// with messages below it.
#[derive(Default)]
struct FakeMailbox {
    messages: Mutex<Vec<Envelope>>,
    unreachable: AtomicBool,
    ignore_since: AtomicBool,
    list_calls: AtomicUsize,
    closed: AtomicBool,
}

impl FakeMailbox {
    fn with_uids(uids: &[u32]) -> Self {
        let mailbox = Self::default();
        for uid in uids {
            mailbox.deliver(*uid, "someone@example.com", &format!("message {uid}"));
        }
        mailbox
    }

    fn deliver(&self, uid: u32, from: &str, subject: &str) {
        let mut env = Envelope::new(uid);
        env.from = from.to_string();
        env.subject = subject.to_string();
        env.date = DateTime::parse_from_rfc3339("2024-10-07T10:15:00+00:00").ok();
        self.messages.lock().unwrap().push(env);
    }

    fn replace_uids(&self, uids: &[u32]) {
        self.messages.lock().unwrap().clear();
        for uid in uids {
            self.deliver(*uid, "someone@example.com", &format!("message {uid}"));
        }
    }
}

#[async_trait]
impl MailClient for FakeMailbox {
    async fn list_messages(&self, ctx: &CallContext, query: &ListQuery) -> EmailResult<Vec<Envelope>> {
        ctx.check()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(EmailError::Transport("connection refused".into()));
        }

        let mut found = self.messages.lock().unwrap().clone();
        found.sort_by(|a, b| b.uid.cmp(&a.uid));
        if query.since_uid > 0 {
            if !self.ignore_since.load(Ordering::SeqCst) {
                found.retain(|env| env.uid > query.since_uid);
            }
        } else {
            found.truncate(query.effective_limit());
        }
        Ok(found)
    }

    async fn close(&self) -> EmailResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn account(name: &str) -> AccountConfig {
    let imap = ImapConfig {
        host: "imap.example.com".into(),
        username: format!("{name}@example.com"),
        ..ImapConfig::default()
    };
    AccountConfig::new(name, imap).with_default_from("Agent <agent@example.com>")
}

async fn poller_for(
    accounts: Vec<(AccountConfig, FakeMailbox)>,
) -> (Poller<FakeMailbox>, Arc<AccountManager<FakeMailbox>>, OpStateStore) {
    let manager = Arc::new(AccountManager::from_clients("", accounts).unwrap());
    let store = OpStateStore::open_in_memory().await.unwrap();
    let poller = Poller::new(Arc::clone(&manager), store.clone());
    (poller, manager, store)
}

#[tokio::test]
async fn first_poll_seeds_watermark_without_reporting() {
    let (poller, _, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[100, 101, 102]))]).await;

    let out = poller.check_new_messages(&CallContext::new()).await.unwrap();

    assert_eq!(out, "");
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "102");
}

#[tokio::test]
async fn new_messages_are_reported_newest_first() {
    let (poller, manager, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[100, 101, 102]))]).await;
    store.set(POLL_NAMESPACE, "personal:INBOX", "102").await.unwrap();

    let mailbox = manager.account("personal").unwrap();
    mailbox.deliver(103, "Alice <alice@example.com>", "Lunch?");
    mailbox.deliver(104, "Bob <bob@example.com>", "Report");

    let out = poller.check_new_messages(&CallContext::new()).await.unwrap();

    assert!(out.starts_with(POLL_HEADER));
    assert!(out.contains("Account: personal (INBOX)"));
    let bob = out.find("From: Bob <bob@example.com>").unwrap();
    let alice = out.find("From: Alice <alice@example.com>").unwrap();
    assert!(bob < alice);
    assert!(out.contains("Subject: Lunch?"));
    assert!(out.contains("Date: 2024-10-07 10:15"));
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "104");
}

#[tokio::test]
async fn self_sent_messages_are_skipped_but_advance_the_mark() {
    let (poller, manager, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[100, 101, 102]))]).await;
    store.set(POLL_NAMESPACE, "personal:INBOX", "102").await.unwrap();

    let mailbox = manager.account("personal").unwrap();
    mailbox.deliver(103, "alice@example.com", "from alice");
    mailbox.deliver(104, "Agent <AGENT@example.com>", "from myself");
    mailbox.deliver(105, "bob@example.com", "from bob");

    let out = poller.check_new_messages(&CallContext::new()).await.unwrap();

    assert!(!out.contains("from myself"));
    let bob = out.find("from bob").unwrap();
    let alice = out.find("from alice").unwrap();
    assert!(bob < alice);
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "105");
}

#[tokio::test]
async fn only_self_sent_mail_yields_empty_output() {
    let (poller, manager, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[1]))]).await;
    store.set(POLL_NAMESPACE, "personal:INBOX", "1").await.unwrap();
    manager
        .account("personal")
        .unwrap()
        .deliver(2, "agent@example.com", "sent by me");

    let out = poller.check_new_messages(&CallContext::new()).await.unwrap();

    assert_eq!(out, "");
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "2");
}

#[tokio::test]
async fn watermark_never_moves_backwards() {
    let mailbox = FakeMailbox::with_uids(&[200, 286]);
    mailbox.ignore_since.store(true, Ordering::SeqCst);
    let (poller, _, store) = poller_for(vec![(account("personal"), mailbox)]).await;
    store.set(POLL_NAMESPACE, "personal:INBOX", "391").await.unwrap();

    let out = poller.check_new_messages(&CallContext::new()).await.unwrap();

    assert_eq!(out, "");
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "391");
}

#[tokio::test]
async fn corrupt_watermark_is_reseeded() {
    let (poller, _, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[120, 500]))]).await;
    store
        .set(POLL_NAMESPACE, "personal:INBOX", "not-a-number")
        .await
        .unwrap();

    let out = poller.check_new_messages(&CallContext::new()).await.unwrap();

    assert_eq!(out, "");
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "500");
}

#[tokio::test]
async fn failing_account_does_not_affect_others() {
    let broken = FakeMailbox::with_uids(&[10]);
    broken.unreachable.store(true, Ordering::SeqCst);
    let (poller, manager, store) = poller_for(vec![
        (account("A"), broken),
        (account("B"), FakeMailbox::with_uids(&[7])),
    ])
    .await;
    store.set(POLL_NAMESPACE, "A:INBOX", "10").await.unwrap();
    store.set(POLL_NAMESPACE, "B:INBOX", "7").await.unwrap();
    manager
        .account("B")
        .unwrap()
        .deliver(8, "carol@example.com", "hello B");

    let out = poller.check_new_messages(&CallContext::new()).await.unwrap();

    assert!(out.contains("Account: B (INBOX)"));
    assert!(!out.contains("Account: A"));
    assert_eq!(store.get(POLL_NAMESPACE, "A:INBOX").await.unwrap(), "10");
    assert_eq!(store.get(POLL_NAMESPACE, "B:INBOX").await.unwrap(), "8");
}

#[tokio::test]
async fn second_poll_without_activity_is_quiet() {
    let (poller, manager, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[1, 2]))]).await;
    let ctx = CallContext::new();

    assert_eq!(poller.check_new_messages(&ctx).await.unwrap(), "");
    manager
        .account("personal")
        .unwrap()
        .deliver(3, "dave@example.com", "third");
    assert!(poller.check_new_messages(&ctx).await.unwrap().contains("third"));
    assert_eq!(poller.check_new_messages(&ctx).await.unwrap(), "");
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "3");
}

#[tokio::test]
async fn empty_mailbox_is_seeded_on_a_later_cycle() {
    let (poller, manager, store) =
        poller_for(vec![(account("personal"), FakeMailbox::default())]).await;
    let ctx = CallContext::new();

    assert_eq!(poller.check_new_messages(&ctx).await.unwrap(), "");
    assert!(store
        .get_entry(POLL_NAMESPACE, "personal:INBOX")
        .await
        .unwrap()
        .is_none());

    manager.account("personal").unwrap().replace_uids(&[42]);
    assert_eq!(poller.check_new_messages(&ctx).await.unwrap(), "");
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "42");
}

#[tokio::test]
async fn zero_watermark_is_reseeded() {
    let (poller, _, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[5, 6]))]).await;
    store.set(POLL_NAMESPACE, "personal:INBOX", "0").await.unwrap();

    assert_eq!(poller.check_new_messages(&CallContext::new()).await.unwrap(), "");
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "6");
}

#[tokio::test]
async fn cancelled_poll_leaves_watermarks_alone() {
    let (poller, manager, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[1]))]).await;
    store.set(POLL_NAMESPACE, "personal:INBOX", "1").await.unwrap();
    let mailbox = manager.account("personal").unwrap();
    mailbox.deliver(2, "erin@example.com", "never seen");

    let ctx = CallContext::new();
    ctx.cancel();
    let err = poller.check_new_messages(&ctx).await.unwrap_err();

    assert!(matches!(err, EmailError::Cancelled));
    assert_eq!(mailbox.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "1");
}

#[tokio::test]
async fn storage_failure_aborts_the_cycle() {
    let (poller, _, store) =
        poller_for(vec![(account("personal"), FakeMailbox::with_uids(&[1]))]).await;
    store.close().await;

    let err = poller.check_new_messages(&CallContext::new()).await.unwrap_err();
    assert!(matches!(err, EmailError::Storage(_)));
}

#[tokio::test]
async fn manager_close_reaches_every_client() {
    let (_, manager, _) = poller_for(vec![
        (account("A"), FakeMailbox::default()),
        (account("B"), FakeMailbox::default()),
    ])
    .await;

    manager.close().await;

    for name in manager.account_names() {
        assert!(manager.account(&name).unwrap().closed.load(Ordering::SeqCst));
    }
}

#[tokio::test]
async fn empty_account_name_resolves_to_primary() {
    let (_, manager, _) = poller_for(vec![
        (account("first"), FakeMailbox::default()),
        (account("second"), FakeMailbox::default()),
    ])
    .await;

    assert_eq!(manager.primary(), "first");
    assert_eq!(manager.account_config("").unwrap().name, "first");
    assert!(matches!(
        manager.account("missing").map(|_| ()),
        Err(EmailError::NotFound(_))
    ));
}

/// Answers the first `since` listing with UID 110. The second listing waits
/// until that poll has stored 110, then answers with UID 105 only, as if 110
/// had been moved away in between.
struct RacingMailbox {
    store: OpStateStore,
    both_read: Barrier,
    calls: AtomicUsize,
}

#[async_trait]
impl MailClient for RacingMailbox {
    async fn list_messages(&self, ctx: &CallContext, query: &ListQuery) -> EmailResult<Vec<Envelope>> {
        ctx.check()?;
        self.both_read.wait().await;
        let uid = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            110
        } else {
            while self.store.get(POLL_NAMESPACE, "personal:INBOX").await? != "110" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            105
        };
        assert!(query.since_uid > 0);

        let mut env = Envelope::new(uid);
        env.from = "frank@example.com".into();
        env.subject = format!("message {uid}");
        Ok(vec![env])
    }

    async fn close(&self) -> EmailResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn overlapping_polls_never_lower_the_watermark() {
    let store = OpStateStore::open_in_memory().await.unwrap();
    store.set(POLL_NAMESPACE, "personal:INBOX", "100").await.unwrap();
    let mailbox = RacingMailbox {
        store: store.clone(),
        both_read: Barrier::new(2),
        calls: AtomicUsize::new(0),
    };
    let manager =
        Arc::new(AccountManager::from_clients("", vec![(account("personal"), mailbox)]).unwrap());
    let poller = Poller::new(manager, store.clone());
    let ctx = CallContext::new();

    let run = async {
        tokio::join!(poller.check_new_messages(&ctx), poller.check_new_messages(&ctx))
    };
    let (first, second) = tokio::time::timeout(Duration::from_secs(10), run).await.unwrap();

    let outputs = [first.unwrap(), second.unwrap()];
    assert!(outputs.iter().any(|out| out.contains("message 110")));
    assert!(outputs.iter().any(|out| out.contains("message 105")));
    assert_eq!(store.get(POLL_NAMESPACE, "personal:INBOX").await.unwrap(), "110");
}

#[test]
fn duplicate_account_names_are_rejected() {
    let result = AccountManager::from_clients(
        "",
        vec![
            (account("same"), FakeMailbox::default()),
            (account("same"), FakeMailbox::default()),
        ],
    );
    assert!(matches!(result.map(|_| ()), Err(EmailError::Config(_))));
}

//! Conversions from IMAP fetch responses plus command-argument builders.
use async_imap::imap_proto::Address;
use async_imap::types::{Fetch, Flag, NameAttribute};
use chrono::{DateTime, FixedOffset};

use crate::mime::{decode_header_words, parse_message_ids};
use crate::types::{Envelope, ListQuery, Message, SearchOptions};

pub const ENVELOPE_QUERY: &str = "(UID FLAGS ENVELOPE RFC822.SIZE)";
/// Non-peek: reading a message marks it seen.
pub const BODY_QUERY: &str = "(UID FLAGS BODY[])";
/// Used instead of `BODY_QUERY` when the declared size is over the raw ceiling.
pub const HEADER_QUERY: &str = "(UID FLAGS BODY[HEADER])";

pub fn envelope_from_fetch(uid: u32, fetch: &Fetch) -> Envelope {
    let mut envelope = Envelope::new(uid);
    envelope.size = fetch.size.unwrap_or(0);
    envelope.flags = fetch.flags().map(|flag| flag_token(&flag)).collect();

    if let Some(env) = fetch.envelope() {
        envelope.date = env.date.as_deref().and_then(parse_date);
        envelope.subject = env
            .subject
            .as_deref()
            .map(decode_header_words)
            .unwrap_or_default();
        envelope.from = env
            .from
            .as_deref()
            .and_then(|addrs| addrs.iter().find_map(format_address))
            .unwrap_or_default();
        envelope.to = format_addresses(env.to.as_deref());
    }
    envelope
}

pub fn message_from_fetch(uid: u32, fetch: &Fetch) -> Message {
    let mut message = Message::new(envelope_from_fetch(uid, fetch));
    if let Some(env) = fetch.envelope() {
        message.message_id = env
            .message_id
            .as_deref()
            .map(|raw| {
                let raw = String::from_utf8_lossy(raw);
                parse_message_ids(&raw).into_iter().next().unwrap_or_default()
            })
            .unwrap_or_default();
        message.in_reply_to = env
            .in_reply_to
            .as_deref()
            .map(|raw| parse_message_ids(&String::from_utf8_lossy(raw)))
            .unwrap_or_default();
        message.cc = format_addresses(env.cc.as_deref());
        message.reply_to = format_addresses(env.reply_to.as_deref());
    }
    message
}

/// `Name <mailbox@host>` when a display name is present, bare address otherwise.
pub fn format_address(addr: &Address) -> Option<String> {
    let mailbox = addr.mailbox.as_deref()?;
    let host = addr.host.as_deref()?;
    let email = format!(
        "{}@{}",
        String::from_utf8_lossy(mailbox),
        String::from_utf8_lossy(host)
    );
    let name = addr
        .name
        .as_deref()
        .map(decode_header_words)
        .unwrap_or_default();
    Some(display_address(&name, &email))
}

pub fn display_address(name: &str, email: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        email.to_string()
    } else {
        format!("{name} <{email}>")
    }
}

fn format_addresses(addrs: Option<&[Address]>) -> Vec<String> {
    addrs
        .map(|addrs| addrs.iter().filter_map(format_address).collect())
        .unwrap_or_default()
}

fn parse_date(raw: &[u8]) -> Option<DateTime<FixedOffset>> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(text) {
        return Some(date);
    }
    let ts = mailparse::dateparse(text).ok()?;
    DateTime::from_timestamp(ts, 0).map(|dt| dt.fixed_offset())
}

#[allow(unreachable_patterns)]
pub fn flag_token(flag: &Flag) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(custom) => custom.to_string(),
        other => format!("{other:?}"),
    }
}

#[allow(unreachable_patterns)]
pub fn attribute_token(attr: &NameAttribute) -> String {
    match attr {
        NameAttribute::NoInferiors => "\\Noinferiors".to_string(),
        NameAttribute::NoSelect => "\\Noselect".to_string(),
        NameAttribute::Marked => "\\Marked".to_string(),
        NameAttribute::Unmarked => "\\Unmarked".to_string(),
        NameAttribute::All => "\\All".to_string(),
        NameAttribute::Archive => "\\Archive".to_string(),
        NameAttribute::Drafts => "\\Drafts".to_string(),
        NameAttribute::Flagged => "\\Flagged".to_string(),
        NameAttribute::Junk => "\\Junk".to_string(),
        NameAttribute::Sent => "\\Sent".to_string(),
        NameAttribute::Trash => "\\Trash".to_string(),
        NameAttribute::Extension(ext) => ext.to_string(),
        other => format!("{other:?}"),
    }
}

/// Compresses UIDs into an IMAP sequence set, e.g. `1:3,7,9:10`.
pub fn uid_set(uids: &[u32]) -> String {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for uid in sorted {
        match ranges.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(uid) => *end = uid,
            _ => ranges.push((uid, uid)),
        }
    }

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// UID SEARCH criteria for `list_messages`. `None` when no UID can satisfy
/// the query.
pub fn list_criteria(query: &ListQuery) -> Option<String> {
    let mut parts = Vec::new();
    if query.unseen_only {
        parts.push("UNSEEN".to_string());
    }
    if query.since_uid > 0 {
        let first = query.since_uid.checked_add(1)?;
        parts.push(format!("UID {first}:*"));
    }
    if parts.is_empty() {
        Some("ALL".to_string())
    } else {
        Some(parts.join(" "))
    }
}

/// Picks the UIDs `list_messages` should fetch, ascending.
///
/// With a `since_uid` bound every UID above it is kept (servers answer
/// `n:*` with the highest UID even when it is below `n`, so the bound is
/// re-applied here). Without one, the newest `limit` UIDs are kept.
pub fn select_uids<I>(found: I, since_uid: u32, limit: usize) -> Vec<u32>
where
    I: IntoIterator<Item = u32>,
{
    let mut uids: Vec<u32> = found.into_iter().filter(|uid| *uid > since_uid).collect();
    uids.sort_unstable();
    uids.dedup();
    if since_uid == 0 && uids.len() > limit {
        uids.drain(..uids.len() - limit);
    }
    uids
}

pub fn search_criteria(options: &SearchOptions) -> String {
    let mut parts = Vec::new();
    if let Some(text) = options.text.as_deref().filter(|t| !t.trim().is_empty()) {
        parts.push(format!("TEXT {}", quote(text)));
    }
    if let Some(from) = options.from.as_deref().filter(|f| !f.trim().is_empty()) {
        parts.push(format!("FROM {}", quote(from)));
    }
    if let Some(since) = options.since {
        parts.push(format!("SINCE {}", since.format("%d-%b-%Y")));
    }
    if let Some(before) = options.before {
        parts.push(format!("BEFORE {}", before.format("%d-%b-%Y")));
    }

    if parts.is_empty() {
        return "ALL".to_string();
    }
    let criteria = parts.join(" ");
    if criteria.is_ascii() {
        criteria
    } else {
        format!("CHARSET UTF-8 {criteria}")
    }
}

pub fn quote(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect();
    format!(
        "\"{}\"",
        cleaned.replace('\\', "\\\\").replace('"', "\\\"")
    )
}

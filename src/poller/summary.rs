use std::fmt::Write;

use mailparse::MailAddr;

use crate::types::Envelope;

/// Lowercased `addr` out of `Name <addr>` (or a bare address).
pub fn bare_address(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let parsed = mailparse::addrparse(raw).ok().and_then(|list| {
        list.iter().find_map(|addr| match addr {
            MailAddr::Single(info) => Some(info.addr.clone()),
            MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
        })
    });

    let addr = match parsed {
        Some(addr) => addr,
        None => match (raw.rfind('<'), raw.rfind('>')) {
            (Some(start), Some(end)) if start < end => raw[start + 1..end].to_string(),
            _ => raw.to_string(),
        },
    };
    addr.trim().to_ascii_lowercase()
}

/// Drops envelopes sent from the account's own outbound address. Accounts
/// without `default_from` pass everything through.
pub fn filter_self_sent(envelopes: Vec<Envelope>, default_from: &str) -> Vec<Envelope> {
    let own = bare_address(default_from);
    if own.is_empty() {
        return envelopes;
    }
    envelopes
        .into_iter()
        .filter(|env| bare_address(&env.from) != own)
        .collect()
}

pub fn format_section(account: &str, folder: &str, envelopes: &[Envelope]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Account: {account} ({folder})");
    for env in envelopes {
        let date = env
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "From: {}", env.from);
        let _ = writeln!(out, "Subject: {}", env.subject);
        let _ = writeln!(out, "Date: {date}");
        out.push('\n');
    }
    out
}

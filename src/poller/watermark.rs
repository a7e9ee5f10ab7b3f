/// Op-state key for one `(account, folder)` high-water mark.
pub fn watermark_key(account: &str, folder: &str) -> String {
    format!("{account}:{folder}")
}

/// Accepts only canonical decimal u32 text: digits, no sign, no whitespace,
/// no leading zeros.
pub fn parse_watermark(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return None;
    }
    raw.parse().ok()
}

pub fn format_watermark(uid: u32) -> String {
    uid.to_string()
}

/// The mark after observing `uids`: never below `current`.
pub fn next_watermark<I>(current: u32, uids: I) -> u32
where
    I: IntoIterator<Item = u32>,
{
    uids.into_iter().fold(current, u32::max)
}

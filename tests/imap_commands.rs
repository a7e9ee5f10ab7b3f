use chrono::NaiveDate;

use mailwake::imap::fetch::{display_address, list_criteria, quote, search_criteria, select_uids, uid_set};
use mailwake::poller::{bare_address, next_watermark, parse_watermark};
use mailwake::types::{ListQuery, MessageFlag, SearchOptions};
use mailwake::EmailError;

#[test]
fn uid_sets_compress_runs() {
    assert_eq!(uid_set(&[7, 1, 2, 3, 9, 10, 3]), "1:3,7,9:10");
    assert_eq!(uid_set(&[42]), "42");
    assert_eq!(uid_set(&[u32::MAX - 1, u32::MAX]), format!("{}:{}", u32::MAX - 1, u32::MAX));
}

#[test]
fn list_criteria_combine_unseen_and_uid_bound() {
    assert_eq!(list_criteria(&ListQuery::default()).as_deref(), Some("ALL"));
    assert_eq!(
        list_criteria(&ListQuery::since("INBOX", 102).unseen_only(true)).as_deref(),
        Some("UNSEEN UID 103:*")
    );
    assert_eq!(list_criteria(&ListQuery::since("INBOX", u32::MAX)), None);
}

#[test]
fn select_uids_keeps_newest_without_bound() {
    assert_eq!(select_uids(vec![5, 1, 4, 2, 3], 0, 3), vec![3, 4, 5]);
}

#[test]
fn select_uids_refilters_open_ended_ranges() {
    // `UID 392:*` on a mailbox whose highest UID is 286 still returns 286.
    assert!(select_uids(vec![286], 391, 20).is_empty());
    // The limit does not apply once a bound is given.
    let found: Vec<u32> = (1..=30).collect();
    assert_eq!(select_uids(found, 5, 3).len(), 25);
}

#[test]
fn search_criteria_quotes_and_formats_dates() {
    let options = SearchOptions {
        text: Some("quarterly \"report\"".into()),
        from: Some("alice@example.com".into()),
        since: NaiveDate::from_ymd_opt(2024, 3, 5),
        before: NaiveDate::from_ymd_opt(2024, 4, 1),
        ..SearchOptions::default()
    };
    assert_eq!(
        search_criteria(&options),
        "TEXT \"quarterly \\\"report\\\"\" FROM \"alice@example.com\" SINCE 05-Mar-2024 BEFORE 01-Apr-2024"
    );
    assert_eq!(options.folder(), "INBOX");
    assert_eq!(search_criteria(&SearchOptions::default()), "ALL");
}

#[test]
fn non_ascii_search_declares_charset() {
    let options = SearchOptions {
        text: Some("café".into()),
        ..SearchOptions::default()
    };
    assert_eq!(search_criteria(&options), "CHARSET UTF-8 TEXT \"café\"");
}

#[test]
fn quote_strips_line_breaks() {
    assert_eq!(quote("a\r\nb\\c"), "\"ab\\\\c\"");
}

#[test]
fn addresses_render_with_optional_name() {
    assert_eq!(display_address("Alice", "alice@example.com"), "Alice <alice@example.com>");
    assert_eq!(display_address("  ", "bob@example.com"), "bob@example.com");
    assert_eq!(bare_address("Alice <Alice@Example.com>"), "alice@example.com");
    assert_eq!(bare_address("bob@example.com"), "bob@example.com");
}

#[test]
fn message_flags_parse_known_names() {
    assert_eq!("seen".parse::<MessageFlag>().unwrap().imap_token(), "\\Seen");
    assert_eq!("flagged".parse::<MessageFlag>().unwrap().imap_token(), "\\Flagged");
    assert!(matches!(
        "deleted".parse::<MessageFlag>(),
        Err(EmailError::InvalidArgument(_))
    ));
    assert!(matches!(
        "Seen".parse::<MessageFlag>(),
        Err(EmailError::InvalidArgument(_))
    ));
}

#[test]
fn watermarks_parse_only_canonical_decimals() {
    assert_eq!(parse_watermark("102"), Some(102));
    assert_eq!(parse_watermark("0"), Some(0));
    assert_eq!(parse_watermark("4294967295"), Some(u32::MAX));
    for bad in ["", "007", "-1", " 5", "5 ", "1e3", "4294967296", "not-a-number"] {
        assert_eq!(parse_watermark(bad), None, "{bad:?}");
    }
}

#[test]
fn next_watermark_never_decreases() {
    assert_eq!(next_watermark(391, [200, 286]), 391);
    assert_eq!(next_watermark(102, [104, 103]), 104);
    assert_eq!(next_watermark(7, std::iter::empty()), 7);
}

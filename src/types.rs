use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::Serialize;

use crate::errors::EmailError;

pub const DEFAULT_FOLDER: &str = "INBOX";
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Listing-sized summary of one message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub uid: u32,
    pub date: Option<DateTime<FixedOffset>>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub flags: BTreeSet<String>,
    pub size: u32,
}

impl Envelope {
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            date: None,
            from: String::new(),
            to: Vec::new(),
            subject: String::new(),
            flags: BTreeSet::new(),
            size: 0,
        }
    }

    pub fn is_seen(&self) -> bool {
        self.flags.contains("\\Seen")
    }
}

/// A fully read message. Bodies are bounded by the MIME extractor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub envelope: Envelope,
    pub message_id: String,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,
    pub cc: Vec<String>,
    pub reply_to: Vec<String>,
    pub text_body: String,
    pub html_body: String,
}

impl Message {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            message_id: String::new(),
            in_reply_to: Vec::new(),
            references: Vec::new(),
            cc: Vec::new(),
            reply_to: Vec::new(),
            text_body: String::new(),
            html_body: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Folder {
    pub name: String,
    pub attributes: BTreeSet<String>,
    pub selectable: bool,
    pub messages: u32,
    pub unseen: u32,
}

/// Arguments of `list_messages`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub folder: String,
    /// Ignored when `since_uid > 0`. Zero means the default of 20.
    pub limit: usize,
    pub unseen_only: bool,
    /// Only UIDs strictly greater than this. Zero disables the bound.
    pub since_uid: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            folder: DEFAULT_FOLDER.to_string(),
            limit: DEFAULT_LIST_LIMIT,
            unseen_only: false,
            since_uid: 0,
        }
    }
}

impl ListQuery {
    pub fn latest(folder: impl Into<String>, limit: usize) -> Self {
        Self {
            folder: folder.into(),
            limit,
            ..Self::default()
        }
    }

    pub fn since(folder: impl Into<String>, since_uid: u32) -> Self {
        Self {
            folder: folder.into(),
            since_uid,
            ..Self::default()
        }
    }

    pub fn unseen_only(mut self, unseen_only: bool) -> Self {
        self.unseen_only = unseen_only;
        self
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Empty means INBOX.
    pub folder: String,
    pub text: Option<String>,
    pub from: Option<String>,
    pub since: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
    /// Zero means the default of 20.
    pub limit: usize,
}

impl SearchOptions {
    pub fn folder(&self) -> &str {
        if self.folder.is_empty() {
            DEFAULT_FOLDER
        } else {
            &self.folder
        }
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit
        }
    }
}

/// The flags callers may toggle through `mark_messages`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageFlag {
    Seen,
    Flagged,
    Answered,
}

impl MessageFlag {
    pub fn imap_token(&self) -> &'static str {
        match self {
            MessageFlag::Seen => "\\Seen",
            MessageFlag::Flagged => "\\Flagged",
            MessageFlag::Answered => "\\Answered",
        }
    }
}

impl FromStr for MessageFlag {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seen" => Ok(MessageFlag::Seen),
            "flagged" => Ok(MessageFlag::Flagged),
            "answered" => Ok(MessageFlag::Answered),
            other => Err(EmailError::InvalidArgument(format!(
                "unknown flag {other:?}; expected seen, flagged or answered"
            ))),
        }
    }
}

impl fmt::Display for MessageFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageFlag::Seen => "seen",
            MessageFlag::Flagged => "flagged",
            MessageFlag::Answered => "answered",
        };
        f.write_str(name)
    }
}

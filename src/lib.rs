pub mod accounts;
pub mod app;
pub mod cli;
pub mod config;
pub mod context;
pub mod errors;
pub mod imap;
pub mod mime;
pub mod poller;
pub mod storage;
pub mod types;

pub use accounts::AccountManager;
pub use context::CallContext;
pub use errors::{EmailError, EmailResult};
pub use imap::{ImapClient, MailClient};
pub use poller::Poller;
pub use storage::OpStateStore;

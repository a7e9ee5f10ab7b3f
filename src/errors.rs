use thiserror::Error;

pub type EmailResult<T> = Result<T, EmailError>;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl EmailError {
    /// True when the connection that produced this error can no longer be
    /// trusted to be in sync with the server.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EmailError::Transport(_)
                | EmailError::Protocol(_)
                | EmailError::Cancelled
                | EmailError::DeadlineExceeded
        )
    }

    /// Errors that abort a whole poll cycle instead of skipping one account.
    pub fn is_fatal_for_cycle(&self) -> bool {
        matches!(
            self,
            EmailError::Storage(_) | EmailError::Cancelled | EmailError::DeadlineExceeded
        )
    }
}

impl From<sqlx::Error> for EmailError {
    fn from(err: sqlx::Error) -> Self {
        EmailError::Storage(err.to_string())
    }
}

impl From<async_imap::error::Error> for EmailError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error;
        match err {
            Error::Io(e) => EmailError::Transport(e.to_string()),
            Error::ConnectionLost => EmailError::Transport("connection lost".to_string()),
            other => EmailError::Protocol(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EmailError {
    fn from(err: std::io::Error) -> Self {
        EmailError::Transport(err.to_string())
    }
}

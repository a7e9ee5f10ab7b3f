//! Per-call cancellation and deadline handling.
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{EmailError, EmailResult};

/// Upper bound for establishing (and authenticating) an IMAP connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Carries the caller's cancellation token and optional deadline into every
/// blocking operation.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails fast when the context is already done.
    pub fn check(&self) -> EmailResult<()> {
        if self.token.is_cancelled() {
            return Err(EmailError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EmailError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// The dial ceiling, shortened to whatever is left of the deadline.
    pub fn dial_timeout(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(DIAL_TIMEOUT),
            None => DIAL_TIMEOUT,
        }
    }

    /// Races `fut` against cancellation and the deadline. The future is
    /// dropped as soon as either fires.
    pub async fn run<F, T>(&self, fut: F) -> EmailResult<T>
    where
        F: Future<Output = EmailResult<T>>,
    {
        self.check()?;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(EmailError::Cancelled),
            _ = expired => Err(EmailError::DeadlineExceeded),
            res = fut => res,
        }
    }
}

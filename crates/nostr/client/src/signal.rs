//! Cancellation for in-flight relay requests.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Caller cancellation combined with a deadline. Whichever fires first
/// aborts the request.
#[derive(Debug, Clone)]
pub struct RequestSignal {
    token: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl RequestSignal {
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    /// A signal that only the deadline can fire.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), timeout)
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves once the request must stop, yielding the error to report.
    pub async fn aborted(&self) -> ClientError {
        tokio::select! {
            () = self.token.cancelled() => ClientError::Cancelled,
            () = tokio::time::sleep_until(self.deadline) => ClientError::Timeout(format!(
                "request exceeded {} ms",
                self.timeout.as_millis()
            )),
        }
    }
}

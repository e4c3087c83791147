//! Generic create→poll→retrieve orchestration for asynchronous API requests.
//!
//! Analytical queries and dependency-map requests share the same lifecycle: a
//! POST creates the request, then status GETs are issued until the server
//! reports it ready or failed, bounded by a wall-clock budget. The poll
//! closure owns the request-specific wire details; this module owns the state
//! machine.

use std::future::Future;
use std::time::Duration;

use crate::error::{HnyError, Result};

/// Observed state of an asynchronous request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    /// Still running; poll again after the interval.
    Pending,
    /// Terminal: the result payload is available.
    Ready(T),
    /// Terminal: the server reported a failure. The payload is surfaced
    /// verbatim and never retried here; the caller decides.
    Failed(String),
}

/// Poll until the request is ready or failed, or until `max_wait` elapses.
///
/// Transport-level errors from the poll closure propagate immediately. A
/// `Failed` state becomes [`HnyError::QueryFailed`]; exceeding the budget
/// becomes [`HnyError::Timeout`] naming `what`.
pub async fn await_ready<T, F, Fut>(
    what: &str,
    mut poll: F,
    max_wait: Duration,
    interval: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollState<T>>>,
{
    let start = tokio::time::Instant::now();
    loop {
        match poll().await? {
            PollState::Ready(payload) => return Ok(payload),
            PollState::Failed(message) => {
                tracing::error!(what, %message, "Async request failed");
                return Err(HnyError::QueryFailed(message));
            }
            PollState::Pending => {}
        }

        if start.elapsed() >= max_wait {
            tracing::warn!(what, max_wait_secs = max_wait.as_secs(), "Async request timed out");
            return Err(HnyError::Timeout {
                what: what.to_string(),
                max_wait_secs: max_wait.as_secs(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

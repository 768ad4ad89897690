//! Per-attempt diagnostics emitted by the retry loop.

use std::time::Duration;

use crate::TransportError;

/// What happened on one attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure(Option<u16>),
    FatalFailure(TransportError),
}

/// Structured record of one attempt and the decision taken after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptEvent {
    pub attempt: u32,
    pub target: String,
    pub outcome: AttemptOutcome,
    /// Backoff scheduled before the next attempt, `None` when the loop stops.
    pub delay_before_next: Option<Duration>,
}

/// Receives attempt events. Implementations must not block for long; they run
/// inline in the retry loop.
pub trait AttemptSink: Send + Sync {
    fn record(&self, event: &AttemptEvent);
}

impl<F> AttemptSink for F
where
    F: Fn(&AttemptEvent) + Send + Sync,
{
    fn record(&self, event: &AttemptEvent) {
        self(event)
    }
}

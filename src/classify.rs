use std::sync::Arc;

use crate::TransportError;

/// Decides whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&TransportError) -> bool + Send + Sync>;

/// Only `503 Service Unavailable` is transient. Other statuses and failures
/// without a status are fatal.
pub fn is_service_unavailable(err: &TransportError) -> bool {
    err.status == Some(503)
}

/// Builds a predicate that treats the listed statuses as transient.
pub fn retry_on_statuses(statuses: impl IntoIterator<Item = u16>) -> RetryPredicate {
    let statuses: Vec<u16> = statuses.into_iter().collect();
    Arc::new(move |err: &TransportError| {
        err.status
            .is_some_and(|status| statuses.contains(&status))
    })
}

pub(crate) fn default_predicate() -> RetryPredicate {
    Arc::new(is_service_unavailable)
}

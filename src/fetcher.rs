use std::fmt;
use std::future::{self, Future};
use std::sync::Arc;

use tokio::time::sleep;

use crate::{
    classify::{default_predicate, RetryPredicate},
    AttemptEvent, AttemptOutcome, AttemptSink, CdnError, Result, RetryPolicy, TransportError,
};

/// Runs a transport operation with a bounded number of attempts, exponential
/// backoff between retryable failures, and immediate exit on fatal ones.
#[derive(Clone)]
pub struct RetryingFetcher {
    policy: RetryPolicy,
    is_retryable: RetryPredicate,
    sink: Option<Arc<dyn AttemptSink>>,
}

impl fmt::Debug for RetryingFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("policy", &self.policy)
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryingFetcher {
    /// Creates a fetcher that retries on `503` only.
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            is_retryable: default_predicate(),
            sink: None,
        })
    }

    /// Replaces the transient-failure classifier.
    pub fn with_classifier<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&TransportError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(predicate);
        self
    }

    /// Replaces the classifier with an already shared predicate.
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.is_retryable = predicate;
        self
    }

    /// Attaches a sink that receives one event per attempt.
    pub fn with_sink(mut self, sink: Arc<dyn AttemptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `transport(target)` until it succeeds, fails fatally, or the
    /// attempt budget is used up.
    pub async fn fetch<P, F, Fut>(&self, target: &str, transport: F) -> Result<P>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = std::result::Result<P, TransportError>>,
    {
        self.fetch_until(target, transport, future::pending::<()>())
            .await
    }

    /// Like [`RetryingFetcher::fetch`], but gives up with
    /// [`CdnError::Cancelled`] if `cancel` completes during a backoff wait.
    ///
    /// An attempt already in flight is never interrupted.
    pub async fn fetch_until<P, F, Fut, C>(
        &self,
        target: &str,
        mut transport: F,
        cancel: C,
    ) -> Result<P>
    where
        F: FnMut(&str) -> Fut,
        Fut: Future<Output = std::result::Result<P, TransportError>>,
        C: Future<Output = ()>,
    {
        if target.trim().is_empty() {
            return Err(CdnError::Config("fetch target must not be empty".to_owned()));
        }
        tokio::pin!(cancel);

        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1u32;
        loop {
            #[cfg(feature = "tracing")]
            tracing::debug!(path = target, attempt, max_attempts, "fetch attempt");

            let err = match transport(target).await {
                Ok(payload) => {
                    self.emit(attempt, target, AttemptOutcome::Success, None);
                    return Ok(payload);
                }
                Err(err) => err,
            };

            if !(self.is_retryable)(&err) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    path = target,
                    attempt,
                    status = ?err.status,
                    error = %err,
                    "fatal fetch failure"
                );

                self.emit(
                    attempt,
                    target,
                    AttemptOutcome::FatalFailure(err.clone()),
                    None,
                );
                return Err(CdnError::Fatal {
                    attempts: attempt,
                    source: err,
                });
            }

            if attempt >= max_attempts {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    path = target,
                    attempts = attempt,
                    error = %err,
                    "fetch retries exhausted"
                );

                self.emit(
                    attempt,
                    target,
                    AttemptOutcome::TransientFailure(err.status),
                    None,
                );
                return Err(CdnError::RetryExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.policy.delay_after(attempt);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                path = target,
                attempt,
                status = ?err.status,
                "retrying fetch after {} ms",
                delay.as_millis()
            );

            self.emit(
                attempt,
                target,
                AttemptOutcome::TransientFailure(err.status),
                Some(delay),
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = &mut cancel => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        path = target,
                        attempts = attempt,
                        "fetch cancelled during backoff"
                    );

                    return Err(CdnError::Cancelled { attempts: attempt });
                }
            }
            attempt += 1;
        }
    }

    fn emit(
        &self,
        attempt: u32,
        target: &str,
        outcome: AttemptOutcome,
        delay_before_next: Option<std::time::Duration>,
    ) {
        if let Some(sink) = &self.sink {
            sink.record(&AttemptEvent {
                attempt,
                target: target.to_owned(),
                outcome,
                delay_before_next,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::RetryingFetcher;
    use crate::{AttemptEvent, AttemptOutcome, AttemptSink, CdnError, RetryPolicy, TransportError};

    type Reply = std::result::Result<&'static str, TransportError>;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AttemptEvent>>);

    impl AttemptSink for Recorder {
        fn record(&self, event: &AttemptEvent) {
            self.0.lock().expect("recorder mutex").push(event.clone());
        }
    }

    impl Recorder {
        fn delays(&self) -> Vec<Duration> {
            self.0
                .lock()
                .expect("recorder mutex")
                .iter()
                .filter_map(|event| event.delay_before_next)
                .collect()
        }

        fn events(&self) -> Vec<AttemptEvent> {
            self.0.lock().expect("recorder mutex").clone()
        }
    }

    /// Scripted transport: pops one reply per call and counts calls.
    struct Script {
        replies: Mutex<VecDeque<Reply>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("calls mutex")
        }

        async fn call(self: Arc<Self>) -> Reply {
            *self.calls.lock().expect("calls mutex") += 1;
            self.replies
                .lock()
                .expect("replies mutex")
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::network("script exhausted")))
        }
    }

    fn unavailable() -> Reply {
        Err(TransportError::status(503, "Service Unavailable"))
    }

    fn workshop_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1_000))
    }

    fn recording_fetcher(policy: RetryPolicy) -> (RetryingFetcher, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let fetcher = RetryingFetcher::new(policy)
            .expect("policy must be valid")
            .with_sink(recorder.clone());
        (fetcher, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_backoffs() {
        let (fetcher, recorder) = recording_fetcher(workshop_policy());
        let script = Script::new([unavailable(), unavailable(), Ok("image-bytes")]);
        let started = Instant::now();

        let payload = fetcher
            .fetch("/products/img_123.jpg", |_| script.clone().call())
            .await
            .expect("third attempt must succeed");

        assert_eq!(payload, "image-bytes");
        assert_eq!(script.calls(), 3);
        assert_eq!(
            recorder.delays(),
            vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
        );
        assert!(started.elapsed() >= Duration::from_millis(3_000));
        let events = recorder.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].outcome, AttemptOutcome::Success);
        assert_eq!(events[2].delay_before_next, None);
    }

    #[tokio::test(start_paused = true)]
    async fn always_unavailable_exhausts_budget() {
        let (fetcher, recorder) = recording_fetcher(workshop_policy());
        let script = Script::new([unavailable(), unavailable(), unavailable()]);

        let err = fetcher
            .fetch("/products/img_123.jpg", |_| script.clone().call())
            .await
            .expect_err("must exhaust retries");

        match &err {
            CdnError::RetryExhausted { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert_eq!(last.status, Some(503));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert!(err.to_string().contains("Service Unavailable"));
        assert_eq!(script.calls(), 3);
        assert_eq!(
            recorder.delays(),
            vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_makes_exactly_max_attempts_for_any_budget() {
        for max_attempts in 1..=6 {
            let policy = RetryPolicy::new(max_attempts, Duration::from_millis(10));
            let (fetcher, recorder) = recording_fetcher(policy);
            let script = Script::new((0..max_attempts).map(|_| unavailable()));

            let err = fetcher
                .fetch("/a", |_| script.clone().call())
                .await
                .expect_err("must exhaust retries");

            assert_eq!(err.attempts(), Some(max_attempts));
            assert_eq!(script.calls(), max_attempts);
            assert_eq!(recorder.delays().len() as u32, max_attempts - 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_stops_there() {
        let max_attempts = 5;
        for k in 1..=max_attempts {
            let policy = RetryPolicy::new(max_attempts, Duration::from_millis(10));
            let (fetcher, recorder) = recording_fetcher(policy);
            let replies = (1..k).map(|_| unavailable()).chain([Ok("payload")]);
            let script = Script::new(replies);

            let payload = fetcher
                .fetch("/a", |_| script.clone().call())
                .await
                .expect("must succeed");

            assert_eq!(payload, "payload");
            assert_eq!(script.calls(), k);
            let expected: Vec<Duration> = (1..k)
                .map(|attempt| Duration::from_millis(10 * 2u64.pow(attempt - 1)))
                .collect();
            assert_eq!(recorder.delays(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_fatal_on_first_attempt() {
        let (fetcher, recorder) = recording_fetcher(workshop_policy());
        let script = Script::new([Err(TransportError::status(404, "Not Found"))]);
        let started = Instant::now();

        let err = fetcher
            .fetch("/missing.jpg", |_| script.clone().call())
            .await
            .expect_err("404 must be fatal");

        assert!(matches!(err, CdnError::Fatal { attempts: 1, .. }));
        assert_eq!(err.last_status(), Some(404));
        assert_eq!(script.calls(), 1);
        assert!(recorder.delays().is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_without_status_is_fatal() {
        let (fetcher, _) = recording_fetcher(RetryPolicy::new(5, Duration::from_secs(1)));
        let script = Script::new([Err(TransportError::network("connection reset"))]);

        let err = fetcher
            .fetch("/a", |_| script.clone().call())
            .await
            .expect_err("network error must be fatal");

        assert!(matches!(err, CdnError::Fatal { attempts: 1, .. }));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_after_transient_keeps_attempt_count() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let (fetcher, recorder) = recording_fetcher(policy);
        let script = Script::new([
            unavailable(),
            Err(TransportError::status(401, "Unauthorized")),
        ]);

        let err = fetcher
            .fetch("/a", |_| script.clone().call())
            .await
            .expect_err("401 must be fatal");

        assert!(matches!(err, CdnError::Fatal { attempts: 2, .. }));
        assert_eq!(recorder.delays(), vec![Duration::from_millis(100)]);
        let events = recorder.events();
        assert!(matches!(events[1].outcome, AttemptOutcome::FatalFailure(_)));
    }

    #[test]
    fn zero_attempts_is_rejected_before_any_call() {
        let err = RetryingFetcher::new(RetryPolicy::new(0, Duration::ZERO))
            .expect_err("zero attempts must be rejected");
        assert!(matches!(err, CdnError::Config(_)));
    }

    #[tokio::test]
    async fn empty_target_never_calls_transport() {
        let (fetcher, _) = recording_fetcher(workshop_policy());
        let script = Script::new([Ok("x")]);

        let err = fetcher
            .fetch("  ", |_| script.clone().call())
            .await
            .expect_err("empty target must be rejected");

        assert!(matches!(err, CdnError::Config(_)));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_retries_other_statuses() {
        let (fetcher, _) = recording_fetcher(workshop_policy());
        let fetcher = fetcher.with_classifier(|err: &TransportError| err.status == Some(429));
        let script = Script::new([
            Err(TransportError::status(429, "Too Many Requests")),
            Ok("ok"),
        ]);

        let payload = fetcher
            .fetch("/a", |_| script.clone().call())
            .await
            .expect("429 must be retried");

        assert_eq!(payload, "ok");
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_aborts_loop() {
        let (fetcher, _) = recording_fetcher(workshop_policy());
        let script = Script::new([unavailable(), Ok("late")]);

        let err = fetcher
            .fetch_until(
                "/a",
                |_| script.clone().call(),
                tokio::time::sleep(Duration::from_millis(500)),
            )
            .await
            .expect_err("must be cancelled");

        assert!(matches!(err, CdnError::Cancelled { attempts: 1 }));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_without_sink_behaves_the_same() {
        let fetcher = RetryingFetcher::new(workshop_policy()).expect("valid policy");
        let script = Script::new([unavailable(), Ok("payload")]);

        let payload = fetcher
            .fetch("/a", |_| script.clone().call())
            .await
            .expect("second attempt must succeed");

        assert_eq!(payload, "payload");
        assert_eq!(script.calls(), 2);
    }
}

//! Fixed-delay retry with an attempt bound and an external stop signal.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{KeelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    /// Overall budget shared by every lookup of one resolve call.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 8, delay: Duration::from_secs(1), timeout: Duration::from_secs(15) }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}

impl RetryPolicy {
    /// Defaults overridden by `KEEL_CRD_ATTEMPTS`, `KEEL_CRD_RETRY_DELAY_MS`
    /// and `KEEL_CRD_TIMEOUT_SECS` when set and parseable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            attempts: env_u64("KEEL_CRD_ATTEMPTS").and_then(|v| u32::try_from(v).ok()).unwrap_or(d.attempts),
            delay: env_u64("KEEL_CRD_RETRY_DELAY_MS").map(Duration::from_millis).unwrap_or(d.delay),
            timeout: env_u64("KEEL_CRD_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(d.timeout),
        }
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts or `stop` fires.
    ///
    /// `notify` sees every retryable failure with its 1-based attempt number.
    /// When stopped, the last retryable error is returned, or a `NotFound`
    /// if no attempt had finished yet.
    pub async fn call<T, F, Fut, P, N>(
        &self,
        clock: &dyn Clock,
        stop: &CancellationToken,
        mut op: F,
        is_fatal: P,
        mut notify: N,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&KeelError) -> bool,
        N: FnMut(&KeelError, u32),
    {
        let attempts = self.attempts.max(1);
        let mut last: Option<KeelError> = None;
        for attempt in 1..=attempts {
            let outcome = tokio::select! {
                biased;
                () = stop.cancelled() => return Err(stopped(last)),
                res = op() => res,
            };
            let err = match outcome {
                Ok(v) => return Ok(v),
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => err,
            };
            notify(&err, attempt);
            if attempt == attempts {
                return Err(err);
            }
            last = Some(err);
            tokio::select! {
                biased;
                () = stop.cancelled() => return Err(stopped(last)),
                () = clock.sleep(self.delay) => {}
            }
        }
        Err(stopped(last))
    }
}

fn stopped(last: Option<KeelError>) -> KeelError {
    last.unwrap_or_else(|| KeelError::NotFound("retry stopped before any attempt completed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn not_found_fatal(e: &KeelError) -> bool {
        !e.is_not_found()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_attempt() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();
        let out = policy
            .call(
                &TokioClock,
                &CancellationToken::new(),
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 8 { Err(KeelError::not_found("thing")) } else { Ok(n) }
                },
                not_found_fatal,
                |_, _| {},
            )
            .await
            .unwrap();
        assert_eq!(out, 8);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_immediately() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::default()
            .call(
                &TokioClock,
                &CancellationToken::new(),
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(KeelError::Transport("boom".into()))
                },
                not_found_fatal,
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_attempt_reports_not_found() {
        let stop = CancellationToken::new();
        stop.cancel();
        let err = RetryPolicy::default()
            .call(&TokioClock, &stop, || async { Ok::<_, KeelError>(1) }, not_found_fatal, |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn notify_sees_each_retryable_attempt() {
        let mut seen = Vec::new();
        let policy = RetryPolicy { attempts: 3, ..Default::default() };
        let err = policy
            .call(
                &TokioClock,
                &CancellationToken::new(),
                || async { Err::<(), _>(KeelError::not_found("x")) },
                not_found_fatal,
                |_, attempt| seen.push(attempt),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

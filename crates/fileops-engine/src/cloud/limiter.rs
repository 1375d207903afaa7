//! Per-remote concurrency gates with bounded retry.

use crate::errors::{EngineError, ErrorCode};
use crate::ignore_poison::IgnorePoison;
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Cap on the exponential backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retries.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(MAX_BACKOFF.as_millis()).unwrap_or(u64::MAX);
        let shift = attempt.min(16);
        Duration::from_millis(base_ms.saturating_mul(1u64 << shift).min(max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

/// Whether a provider call can be repeated safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Reads, and writes that land in the same state when repeated.
    Idempotent,
    /// A timed-out attempt may already have been applied, so timeouts are not retried.
    Mutating,
}

impl CallKind {
    fn may_retry(self, err: &EngineError) -> bool {
        err.is_retryable() && !(self == CallKind::Mutating && err.code == ErrorCode::Timeout)
    }
}

/// Bounds how many provider calls run at once against each remote.
///
/// Callers over the limit wait for a permit; they never fail because of the limit. Transient
/// failures are retried with exponential backoff, and the permit is released while sleeping.
pub struct ConcurrencyLimiter {
    per_remote: usize,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    retry: RetryPolicy,
}

impl ConcurrencyLimiter {
    pub fn new(per_remote: usize, retry: RetryPolicy) -> Self {
        Self {
            per_remote: per_remote.max(1),
            gates: Mutex::new(HashMap::new()),
            retry,
        }
    }

    fn gate(&self, remote: &str) -> Arc<Semaphore> {
        let mut gates = self.gates.lock_ignore_poison();
        Arc::clone(
            gates
                .entry(remote.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_remote))),
        )
    }

    /// Number of calls currently holding a permit for `remote`.
    pub fn in_flight(&self, remote: &str) -> usize {
        let gates = self.gates.lock_ignore_poison();
        gates
            .get(remote)
            .map(|g| self.per_remote.saturating_sub(g.available_permits()))
            .unwrap_or(0)
    }

    /// Runs `call` under the gate for `remote`, retrying transient failures as `kind` allows.
    ///
    /// If `token` is cancelled, no new attempt starts and a result that arrives afterwards is
    /// discarded in favor of `Cancelled`. An attempt already running is not interrupted.
    pub async fn run<T, F, Fut>(
        &self,
        remote: &str,
        op: &str,
        kind: CallKind,
        token: &CancellationToken,
        mut call: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let gate = self.gate(remote);
        let mut attempt = 0u32;
        loop {
            if token.is_cancelled() {
                return Err(EngineError::cancelled());
            }
            let result = {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|_| EngineError::cancelled())?;
                call().await
            };
            if token.is_cancelled() {
                debug!("Limiter {op} [{remote}]: discarding result, owner cancelled");
                return Err(EngineError::cancelled());
            }
            match result {
                Err(e) if kind.may_retry(&e) && attempt + 1 < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Limiter {op} [{remote}]: attempt {} failed ({}), retrying in {}ms",
                        attempt + 1,
                        e,
                        delay.as_millis()
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = token.cancelled() => return Err(EngineError::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transient() -> EngineError {
        let mut e = EngineError::new(ErrorCode::Io, "rate limited");
        e.transient = true;
        e
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(20), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_until_success() {
        let limiter = ConcurrencyLimiter::new(2, RetryPolicy::new(3, Duration::from_millis(50)));
        let calls = AtomicUsize::new(0);
        let token = CancellationToken::new();
        let result = limiter
            .run("r", "list", CallKind::Idempotent, &token, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(transient()) } else { Ok(n) } }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let limiter = ConcurrencyLimiter::new(2, RetryPolicy::new(3, Duration::from_millis(50)));
        let calls = AtomicUsize::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = limiter
            .run("r", "list", CallKind::Idempotent, &token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Io);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let limiter = ConcurrencyLimiter::new(2, RetryPolicy::default());
        let calls = AtomicUsize::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = limiter
            .run("r", "stat", CallKind::Idempotent, &token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::not_found("r:x")) }
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_write_is_not_repeated() {
        let limiter = ConcurrencyLimiter::new(2, RetryPolicy::new(3, Duration::from_millis(50)));
        let token = CancellationToken::new();
        let moves = AtomicUsize::new(0);
        let result: Result<(), _> = limiter
            .run("r", "move", CallKind::Mutating, &token, || {
                moves.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::new(ErrorCode::Timeout, "timed out")) }
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Timeout);
        assert_eq!(moves.load(Ordering::SeqCst), 1);

        let lists = AtomicUsize::new(0);
        let result: Result<(), _> = limiter
            .run("r", "list", CallKind::Idempotent, &token, || {
                lists.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::new(ErrorCode::Timeout, "timed out")) }
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Timeout);
        assert_eq!(lists.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_write_is_retried() {
        let limiter = ConcurrencyLimiter::new(2, RetryPolicy::new(3, Duration::from_millis(50)));
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);
        let result = limiter
            .run("r", "copy", CallKind::Mutating, &token, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Err(transient()) } else { Ok(n) } }
            })
            .await;
        assert_eq!(result, Ok(1));
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_call() {
        let limiter = ConcurrencyLimiter::new(1, RetryPolicy::default());
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = limiter
            .run("r", "list", CallKind::Idempotent, &token, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_over_limit_wait_instead_of_failing() {
        let limiter = Arc::new(ConcurrencyLimiter::new(2, RetryPolicy::default()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = Arc::clone(&limiter);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                limiter
                    .run("gdrive", "list", CallKind::Idempotent, &token, || {
                        let running = Arc::clone(&running);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, EngineError>(())
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.in_flight("gdrive"), 0);
    }
}

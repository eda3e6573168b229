//! Retry loop with linear backoff and IP-ban suspension.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::Cancelled;
use crate::metrics;
use crate::upstream::BAN_PHRASE;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

static BAN_EXPIRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ban expires in ([^)<\n]+)").expect("ban expiry pattern"));

static BAN_COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*(day|hour|minute|second)s?").expect("ban component pattern")
});

/// How an operation is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up; 0 means the default of 3.
    pub max_attempts: u32,
    /// Wait out IP bans instead of counting them as failures.
    pub wait_for_unban: bool,
    /// Sleep after the n-th failure is `n * backoff_step`.
    pub backoff_step: Duration,
    /// Added to the announced ban duration.
    pub ban_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            wait_for_unban: false,
            backoff_step: Duration::from_secs(5),
            ban_margin: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait_for_unban: bool) -> Self {
        Self {
            max_attempts,
            wait_for_unban,
            ..Self::default()
        }
    }

    fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            self.max_attempts
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{operation}: exceeded max retries ({attempts}): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl From<Cancelled> for RetryError {
    fn from(_: Cancelled) -> Self {
        RetryError::Cancelled
    }
}

/// Sleep for `duration` unless the token fires first.
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Extract the remaining ban time from an upstream ban notice.
///
/// Returns `None` unless the message is a ban notice with a positive duration
/// that fits in a `u64` of seconds.
pub fn parse_ban_duration(message: &str) -> Option<Duration> {
    if !message.contains(BAN_PHRASE) {
        return None;
    }
    let expiry = BAN_EXPIRY.captures(message)?;

    let mut total = 0u64;
    for caps in BAN_COMPONENT.captures_iter(&expiry[1]) {
        let value: u64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "day" => 86_400,
            "hour" => 3_600,
            "minute" => 60,
            _ => 1,
        };
        total = value.checked_mul(unit).and_then(|secs| total.checked_add(secs))?;
    }

    (total > 0).then(|| Duration::from_secs(total))
}

/// Run `attempt` until it succeeds, the budget is spent, or the run is cancelled.
///
/// With `wait_for_unban`, a failure whose message is a ban notice suspends for
/// the announced duration plus a margin and resets the attempt counter.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let max_attempts = policy.attempts();
    let mut failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        metrics::RETRY_ATTEMPTS.with_label_values(&[operation]).inc();

        if policy.wait_for_unban {
            if let Some(ban) = parse_ban_duration(&error.to_string()) {
                let wait = ban.saturating_add(policy.ban_margin);
                warn!(
                    operation = operation,
                    wait_secs = wait.as_secs(),
                    "IP banned, waiting for the ban to expire"
                );
                metrics::BAN_WAITS.inc();
                metrics::BAN_WAIT_SECONDS.inc_by(wait.as_secs());
                pause(cancel, wait).await?;
                failures = 0;
                continue;
            }
        }

        failures += 1;
        if failures >= max_attempts {
            return Err(RetryError::Exhausted {
                operation: operation.to_string(),
                attempts: failures,
                source: Box::new(error),
            });
        }

        warn!(
            operation = operation,
            attempt = failures,
            max_attempts = max_attempts,
            error = %error,
            "Attempt failed, retrying"
        );
        pause(cancel, policy.backoff_step * failures).await?;
    }
}

/// [`retry`] for operations that only have side effects.
pub async fn retry_void<E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    attempt: F,
) -> Result<(), RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    retry(policy, cancel, operation, attempt).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct TestError(String);

    const BAN_NOTICE: &str = "Your IP address has been temporarily banned for excessive \
        pageloads which indicates that you are using automated mirroring/harvesting software. \
        (The ban expires in 1 hour and 30 minutes)";

    fn failing(message: &str) -> Result<u32, TestError> {
        Err(TestError(message.to_string()))
    }

    #[test]
    fn test_parse_ban_duration() {
        assert_eq!(
            parse_ban_duration(BAN_NOTICE),
            Some(Duration::from_secs(5400))
        );
        assert_eq!(
            parse_ban_duration(
                "temporarily banned. The ban expires in 2 minutes and 5 seconds"
            ),
            Some(Duration::from_secs(125))
        );
        assert_eq!(
            parse_ban_duration("temporarily banned (The ban expires in 1 day)"),
            Some(Duration::from_secs(86_400))
        );
    }

    #[test]
    fn test_parse_ban_duration_rejects_non_bans() {
        assert_eq!(parse_ban_duration("connection reset by peer"), None);
        assert_eq!(
            parse_ban_duration("The ban expires in 1 hour"),
            None,
            "the ban phrase is required"
        );
        assert_eq!(
            parse_ban_duration("temporarily banned (The ban expires in a moment)"),
            None
        );
    }

    #[test]
    fn test_parse_ban_duration_overflow_is_not_a_ban() {
        assert_eq!(
            parse_ban_duration("temporarily banned (The ban expires in 999999999999999999 days)"),
            None
        );
        assert_eq!(
            parse_ban_duration(
                "temporarily banned (The ban expires in 18446744073709551615 seconds and 1 second)"
            ),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_backoff() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let start = Instant::now();

        let result = retry(&RetryPolicy::default(), &cancel, "test", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    failing("boom")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(5 + 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_without_final_sleep() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let start = Instant::now();

        let err = retry(&RetryPolicy::default(), &cancel, "listing", || {
            calls += 1;
            async { failing("status 503") }
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        match err {
            RetryError::Exhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "listing");
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "status 503");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_means_default() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let policy = RetryPolicy::new(0, false);

        let result = retry_void(&policy, &cancel, "void", || {
            calls += 1;
            async { Err::<(), _>(TestError("nope".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_wait_resets_attempt_budget() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3, true);
        let mut calls = 0;
        let start = Instant::now();

        // fail, fail, ban, fail, fail, ok: only possible if the ban reset the counter
        let result = retry(&policy, &cancel, "metadata", || {
            calls += 1;
            let n = calls;
            async move {
                match n {
                    3 => failing(BAN_NOTICE),
                    6 => Ok(n),
                    _ => failing("timeout"),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 6);
        let expected = 5 + 10 + (5400 + 10) + 5 + 10;
        assert_eq!(start.elapsed(), Duration::from_secs(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_counts_as_failure_without_ban_awareness() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let start = Instant::now();

        let result = retry(&RetryPolicy::default(), &cancel, "page", || {
            calls += 1;
            async { failing(BAN_NOTICE) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { .. })));
        assert_eq!(calls, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let start = Instant::now();

        let result = retry(&RetryPolicy::default(), &cancel, "page", || async {
            failing("boom")
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_pause_on_cancelled_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(pause(&cancel, Duration::ZERO).await, Err(Cancelled));
    }
}

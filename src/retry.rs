use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Backoff for idempotent chain reads.
#[derive(Clone, Copy, Debug)]
pub struct RetryOpts {
    pub max_attempts: u32,
    /// Wait before the second retry; doubles after that up to `max_wait`.
    pub min_nonzero_wait: Duration,
    pub max_wait: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryOpts {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_nonzero_wait: Duration::from_millis(200),
            max_wait: Duration::from_secs(2),
            max_jitter: Duration::from_millis(100),
        }
    }
}

/// Runs `func` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is exhausted. Never use this for hashing, signing or
/// submission.
pub async fn with_retries<Func, Fut, Out>(
    description: &str,
    opts: RetryOpts,
    func: Func,
) -> Result<Out>
where
    Func: Fn() -> Fut,
    Fut: Future<Output = Result<Out>>,
{
    let mut next_wait = Duration::ZERO;
    let mut attempt = 1;
    loop {
        let err = match func().await {
            Ok(out) => return Ok(out),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= opts.max_attempts.max(1) {
            return Err(err);
        }
        tracing::warn!(attempt, error = %err, "failed to {description}; retrying");

        let jitter = if opts.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..opts.max_jitter)
        };
        tokio::time::sleep(next_wait + jitter).await;
        next_wait = (next_wait * 2).clamp(opts.min_nonzero_wait, opts.max_wait);
        attempt += 1;
    }
}

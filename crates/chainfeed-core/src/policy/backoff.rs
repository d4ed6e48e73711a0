//! Exponential backoff bounded by a total elapsed-time ceiling.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Configuration for the backoff policy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Maximum delay between two attempts (caps exponential growth).
    pub max_interval: Duration,
    /// Multiplier applied to the delay on each retry.
    pub multiplier: f64,
    /// Total time after which no further attempt is made.
    pub max_elapsed: Duration,
    /// Add `jitter_fraction * delay / 2` to every delay (0.0 = no jitter).
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(60),
            jitter_fraction: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Default growth with the given first delay and elapsed ceiling.
    pub fn bounded(initial_interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            max_elapsed,
            ..Default::default()
        }
    }
}

/// Stateful backoff schedule. Started when created.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    started: Instant,
    current: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_interval;
        Self {
            config,
            started: Instant::now(),
            current,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the elapsed ceiling is
    /// reached. The last delay is shortened so the schedule never sleeps past
    /// the ceiling.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let elapsed = self.elapsed();
        if elapsed >= self.config.max_elapsed {
            return None;
        }
        let remaining = self.config.max_elapsed - elapsed;

        let base_ms = self.current.as_millis() as f64;
        let jitter_ms = base_ms * self.config.jitter_fraction * 0.5;
        let delay = Duration::from_millis((base_ms + jitter_ms) as u64).min(remaining);

        let next_ms = (base_ms * self.config.multiplier)
            .min(self.config.max_interval.as_millis() as f64);
        self.current = Duration::from_millis(next_ms as u64);
        self.attempt += 1;

        Some(delay)
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Restart the schedule from the initial interval.
    pub fn reset(&mut self) {
        self.started = Instant::now();
        self.current = self.config.initial_interval;
        self.attempt = 0;
    }
}

/// Classification of a failed attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    /// Worth trying again after a delay.
    Transient(E),
    /// Give up immediately.
    Permanent(E),
}

/// Why [`retry`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    Permanent(E),
    Exhausted {
        last: E,
        attempts: u32,
        elapsed: Duration,
    },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e) => e,
            Self::Exhausted { last, .. } => last,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the backoff ceiling is
/// reached. Each transient failure is logged at `warn` with `what`.
pub async fn retry<T, E, F, Fut>(
    config: BackoffConfig,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let mut backoff = ExponentialBackoff::new(config);
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(Attempt::Permanent(e)) => return Err(RetryError::Permanent(e)),
            Err(Attempt::Transient(e)) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        what,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(RetryError::Exhausted {
                        last: e,
                        attempts: backoff.attempt() + 1,
                        elapsed: backoff.elapsed(),
                    })
                }
            },
        }
    }
}

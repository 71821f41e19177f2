//! Retry with exponential backoff, request pacing, and the injectable sleep
//! used by both.
//!
//! Collectors never call `std::thread::sleep` directly: all waiting goes
//! through a [`Sleeper`], so tests can assert on the exact delays without
//! waiting for them.

use super::provider::FetchError;
use super::transport::{HttpResponse, HttpTransport};
use crate::domain::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);

    /// The clock pacing is measured against.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records requested sleeps and returns immediately.
///
/// Its clock only moves forward by the sleeps it records, so pacing
/// decisions are reproducible.
#[derive(Debug)]
pub struct RecordingSleeper {
    origin: Instant,
    slept: Mutex<Vec<Duration>>,
}

impl Default for RecordingSleeper {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            slept: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut s) = self.slept.lock() {
            s.push(duration);
        }
    }

    fn now(&self) -> Instant {
        self.origin + self.total()
    }
}

/// How many times a request is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            factor: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Wait before zero-based `attempt`: nothing before the first, then
    /// `base * factor^(attempt - 1)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        Duration::from_millis(self.base_delay_ms).mul_f64(self.factor.max(1.0).powi(exp))
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Identifies the sub-range being requested, for logs and errors.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub provider: SourceKind,
    pub symbol: &'a str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Enforces a minimum gap between consecutive requests to one provider.
///
/// Clones share the last-request time, so every series fetched through the
/// same provider is paced together, whichever thread it runs on.
#[derive(Debug, Clone)]
pub struct Pacer {
    min_delay: Duration,
    last: Arc<Mutex<Option<Instant>>>,
}

impl Pacer {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Sleep whatever is left of `min_delay` since the previous request.
    ///
    /// The lock is held across the sleep so waiting callers go out one at a
    /// time.
    pub fn before_request(&self, sleeper: &dyn Sleeper) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *last {
            let wait = self.min_delay.saturating_sub(sleeper.now().saturating_duration_since(prev));
            if !wait.is_zero() {
                sleeper.sleep(wait);
            }
        }
        *last = Some(sleeper.now());
    }
}

/// Transport, sleeper and policies shared by one collector's requests.
#[derive(Clone)]
pub struct ProviderClient {
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    pacer: Pacer,
}

impl ProviderClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
        retry: RetryPolicy,
        min_delay: Duration,
    ) -> Self {
        Self {
            transport,
            sleeper,
            retry,
            pacer: Pacer::new(min_delay),
        }
    }

    /// Issue one logical request, retrying failures with backoff.
    ///
    /// Transport errors, non-2xx statuses and bodies `parse` rejects all
    /// count as failed attempts. A 2xx body that parses to an empty page is
    /// a success.
    pub fn get_with_retry<T>(
        &self,
        ctx: RequestContext<'_>,
        url: &str,
        query: &[(String, String)],
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T, FetchError> {
        self.pacer.before_request(self.sleeper.as_ref());

        let attempts = self.retry.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry.delay_before(attempt);
                tracing::warn!(
                    provider = %ctx.provider,
                    symbol = ctx.symbol,
                    attempt = attempt + 1,
                    ?delay,
                    "retrying after: {last_error}"
                );
                self.sleeper.sleep(delay);
            }

            match self.transport.get(url, query) {
                Ok(resp) if resp.is_success() => match parse(&resp.body) {
                    Ok(value) => return Ok(value),
                    Err(reason) => last_error = format!("unparseable response: {reason}"),
                },
                Ok(resp) => {
                    let snippet: String = resp.body.chars().take(200).collect();
                    last_error = format!("HTTP {}: {snippet}", resp.status);
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(FetchError::RetriesExhausted {
            provider: ctx.provider,
            symbol: ctx.symbol.to_string(),
            start: ctx.start,
            end: ctx.end,
            attempts,
            last: last_error,
        })
    }
}

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Probe/request attempts: the initial attempt plus five retries.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
/// Delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Upper bound for any single retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Bounded exponential retry policy for a service whose startup timing the
/// client does not control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// Delay before retry number `retry_index` (zero based), doubled per retry
    /// and capped at `max_delay`.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index.min(31));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    pub fn schedule(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempts: 0,
        }
    }
}

/// Attempt bookkeeping for one logical operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    /// Number of failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failed attempt and returns the wait before the next one, or
    /// `None` once `max_attempts` attempts have been made.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay_for(self.attempts - 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable { attempts: u32 },
    Unreachable { attempts: u32 },
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable { .. })
    }
}

/// Probe until the service answers healthy or the policy is exhausted.
pub async fn ensure_reachable<P, F>(probe: P, policy: &BackoffPolicy) -> Reachability
where
    P: FnMut() -> F,
    F: Future<Output = bool>,
{
    ensure_reachable_with(probe, policy, tokio::time::sleep).await
}

/// Same as [`ensure_reachable`] with an injectable sleep.
pub async fn ensure_reachable_with<P, F, S, SF>(
    probe: P,
    policy: &BackoffPolicy,
    sleep: S,
) -> Reachability
where
    P: FnMut() -> F,
    F: Future<Output = bool>,
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let mut backoff = policy.schedule();
    probe_with_backoff(probe, &mut backoff, sleep).await
}

/// Probe loop that draws from an existing schedule, so a caller can keep
/// spending the same attempt budget after the service answers.
pub async fn probe_with_backoff<P, F, S, SF>(
    mut probe: P,
    backoff: &mut Backoff,
    mut sleep: S,
) -> Reachability
where
    P: FnMut() -> F,
    F: Future<Output = bool>,
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    loop {
        if probe().await {
            return Reachability::Reachable {
                attempts: backoff.attempts() + 1,
            };
        }

        match backoff.next_delay() {
            Some(delay) => {
                tracing::debug!(
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "execution service not ready, waiting"
                );
                sleep(delay).await;
            }
            None => {
                return Reachability::Unreachable {
                    attempts: backoff.attempts(),
                }
            }
        }
    }
}

fn transient_error_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)connection.?(refused|reset|closed)|service.?unavailable|timed.?out|broken.?pipe")
            .expect("retry regex must compile")
    })
}

/// Server-side failures are transient; 4xx client errors never are.
pub fn is_retryable_status(status: u16) -> bool {
    (500..=599).contains(&status)
}

/// Error text policy for network failures that did not produce a status.
pub fn is_transient_error_text(error_text: &str) -> bool {
    transient_error_regex().is_match(error_text)
}

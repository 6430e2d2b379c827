//! Exponential backoff (spec.md §4.8, §5: "initial 10 ms, factor 2, cap
//! 1 s... resets on any success"). Grounded on `TestBackoff`
//! (`backoff/test/test_backoff.cc`): a small reusable value with
//! `next()`/`reset()`, rather than a policy baked into each call site.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: u32,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: u32, max: Duration) -> Self { Backoff { initial, factor, max, current: initial } }

    /// The uniform policy spec.md §4.8/§5 names for every retried
    /// operation: token fetch, cloud doc request, cloud blob fetch,
    /// transport reconnect.
    pub fn default_policy() -> Self { Backoff::new(Duration::from_millis(10), 2, Duration::from_secs(1)) }

    /// The delay to wait before the next retry, advancing the internal
    /// state toward `max`.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        delay
    }

    pub fn reset(&mut self) { self.current = self.initial; }
}

impl Default for Backoff {
    fn default() -> Self { Backoff::default_policy() }
}

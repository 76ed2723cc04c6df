//! Backoff/ping scheduler (C10): the connection factory's exponential
//! reconnect delay. Idle-ping timing is handled inline in
//! `connection.rs`'s run loop, since it's one `tokio::time::Interval`
//! plus a deadline rather than standalone state worth its own type.

use std::time::Duration;

const MAX_DELAY_SECS: u64 = 60;

/// Exponential reconnect backoff with an exact clamp rule (not a jittered
/// generic strategy): `next = max(min(current * 2, 60), 1)` on failure,
/// reset to 0 on success. Sequence from zero: 1, 2, 4, 8, 16, 32, 60, 60, ...
#[derive(Debug, Default)]
pub(crate) struct ReconnectBackoff {
    current_delay_secs: u64,
}

impl ReconnectBackoff {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a failed connection attempt and return the delay to wait
    /// before the next attempt.
    pub(crate) fn on_failure(&mut self) -> Duration {
        let next = (self.current_delay_secs.saturating_mul(2)).clamp(1, MAX_DELAY_SECS);
        self.current_delay_secs = next;
        Duration::from_secs(next)
    }

    /// Record a successful connection attempt, resetting the delay.
    pub(crate) fn on_success(&mut self) {
        self.current_delay_secs = 0;
    }

    /// The delay recorded by the most recent `on_failure`/`on_success`
    /// call, without mutating it. Used by the factory to decide how long
    /// to wait before its *next* dial attempt.
    pub(crate) fn current_delay(&self) -> Duration {
        Duration::from_secs(self.current_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_matches_documented_progression() {
        let mut backoff = ReconnectBackoff::new();
        let expected = [1, 2, 4, 8, 16, 32, 60, 60, 60];
        for secs in expected {
            assert_eq!(backoff.on_failure(), Duration::from_secs(secs));
        }
    }

    #[test]
    fn success_resets_delay_to_zero() {
        let mut backoff = ReconnectBackoff::new();
        backoff.on_failure();
        backoff.on_failure();
        assert_eq!(backoff.current_delay(), Duration::from_secs(2));

        backoff.on_success();
        assert_eq!(backoff.current_delay(), Duration::from_secs(0));
        assert_eq!(backoff.on_failure(), Duration::from_secs(1));
    }
}

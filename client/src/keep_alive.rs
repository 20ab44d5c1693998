// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use tokio::time::Instant;

/// Margin subtracted from the negotiated keep-alive so the client pings the broker
/// before the broker's own one-and-a-half-interval grace period runs out.
const MIN_MARGIN_SECS: u64 = 5;

/// Floor on the ping interval, so a short keep-alive never turns into a busy loop.
const MIN_INTERVAL_SECS: u64 = 5;

/// Tracks when the client must send the next automatic PINGREQ.
///
/// `None` (via `KeepAlive::new` returning `None`) means keep-alive is disabled, which
/// happens when the session negotiated a keep-alive of `0`.
pub(crate) struct KeepAlive {
    interval: Duration,
    deadline: Instant,
}

impl KeepAlive {
    /// Build a tracker from the session's negotiated keep-alive, in seconds.
    ///
    /// Returns `None` if `keep_alive_seconds` is `0`.
    pub(crate) fn new(keep_alive_seconds: u16) -> Option<Self> {
        if keep_alive_seconds == 0 {
            return None;
        }
        let interval_secs = u64::from(keep_alive_seconds)
            .saturating_sub(MIN_MARGIN_SECS)
            .max(MIN_INTERVAL_SECS);
        let interval = Duration::from_secs(interval_secs);
        Some(Self {
            interval,
            deadline: Instant::now() + interval,
        })
    }

    /// Rearm the deadline; call after every outbound write, not just after pings.
    pub(crate) fn on_write(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }

    #[must_use]
    pub(crate) const fn deadline(&self) -> Instant {
        self.deadline
    }

    #[must_use]
    pub(crate) const fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_returns_none_for_zero_keep_alive() {
        assert!(KeepAlive::new(0).is_none());
    }

    #[test]
    fn test_interval_applies_margin() {
        // 60s keep-alive minus the 5s margin.
        let keep_alive = KeepAlive::new(60).unwrap();
        assert_eq!(keep_alive.interval(), Duration::from_secs(55));
    }

    #[test]
    fn test_interval_floors_at_minimum() {
        // keep-alive of 6s would yield a 1s interval, floored to 5s.
        let keep_alive = KeepAlive::new(6).unwrap();
        assert_eq!(keep_alive.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_interval_never_negative_for_small_keep_alive() {
        let keep_alive = KeepAlive::new(1).unwrap();
        assert_eq!(keep_alive.interval(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_write_rearms_deadline() {
        let mut keep_alive = KeepAlive::new(60).unwrap();
        let initial_deadline = keep_alive.deadline();

        tokio::time::advance(Duration::from_secs(30)).await;
        keep_alive.on_write();
        assert!(keep_alive.deadline() > initial_deadline);
        assert_eq!(keep_alive.deadline(), Instant::now() + Duration::from_secs(55));
    }
}

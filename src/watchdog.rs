//! Connection liveness watchdog.
//!
//! Two states: armed (a timeout is configured) and disarmed. Every
//! inbound message refreshes the last-seen stamp; a deferred check
//! re-evaluates the elapsed idle time and either reports a timeout (and
//! disarms) or the remaining interval to wait before checking again.
//! The state machine is deterministic; [`Watchdog::delay`] is the async
//! driver for sessions that want a ready-made loop step.

use std::time::{Duration, Instant};

/// Outcome of a deferred liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogCheck {
    /// No timeout configured.
    Disarmed,
    /// Traffic was seen recently; check again after this interval.
    Wait(Duration),
    /// The configured timeout elapsed with no traffic. The watchdog has
    /// disarmed itself; the carried value is the observed idle time.
    TimedOut(Duration),
}

/// Liveness timer state for one connection.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Option<Duration>,
    last_seen: Instant,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            timeout: None,
            last_seen: Instant::now(),
        }
    }

    /// Arm with `timeout`, also refreshing the last-seen stamp. A zero
    /// timeout fully disarms.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.last_seen = Instant::now();
        self.timeout = (!timeout.is_zero()).then_some(timeout);
    }

    pub fn disarm(&mut self) {
        self.timeout = None;
    }

    pub fn is_armed(&self) -> bool {
        self.timeout.is_some()
    }

    /// Record inbound traffic.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Evaluate elapsed idle time at `now`.
    pub fn check(&mut self, now: Instant) -> WatchdogCheck {
        let Some(timeout) = self.timeout else {
            return WatchdogCheck::Disarmed;
        };
        let idle = now.saturating_duration_since(self.last_seen);
        if idle >= timeout {
            self.timeout = None;
            WatchdogCheck::TimedOut(idle)
        } else {
            WatchdogCheck::Wait(timeout - idle)
        }
    }

    /// Async driver step: sleep until the next check is due.
    ///
    /// Returns the idle duration once the timeout fires, or None if the
    /// watchdog is (or becomes) disarmed. Callers re-invoke after every
    /// reconnect/re-arm.
    pub async fn delay(&mut self) -> Option<Duration> {
        loop {
            match self.check(Instant::now()) {
                WatchdogCheck::Disarmed => return None,
                WatchdogCheck::TimedOut(idle) => return Some(idle),
                WatchdogCheck::Wait(remaining) => tokio::time::sleep(remaining).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disarmed_by_default() {
        let mut watchdog = Watchdog::new();
        assert!(!watchdog.is_armed());
        assert_eq!(watchdog.check(Instant::now()), WatchdogCheck::Disarmed);
    }

    #[test]
    fn test_zero_timeout_disarms() {
        let mut watchdog = Watchdog::new();
        watchdog.set_timeout(Duration::from_secs(5));
        assert!(watchdog.is_armed());
        watchdog.set_timeout(Duration::ZERO);
        assert!(!watchdog.is_armed());
    }

    #[test]
    fn test_recent_traffic_reschedules() {
        let mut watchdog = Watchdog::new();
        watchdog.set_timeout(Duration::from_secs(10));
        watchdog.touch();
        match watchdog.check(Instant::now()) {
            WatchdogCheck::Wait(remaining) => {
                assert!(remaining <= Duration::from_secs(10));
                assert!(remaining > Duration::from_secs(9));
            }
            other => panic!("unexpected check result: {other:?}"),
        }
        assert!(watchdog.is_armed());
    }

    #[test]
    fn test_idle_connection_times_out_and_disarms() {
        let mut watchdog = Watchdog::new();
        watchdog.set_timeout(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(15));
        match watchdog.check(Instant::now()) {
            WatchdogCheck::TimedOut(idle) => assert!(idle >= Duration::from_millis(10)),
            other => panic!("unexpected check result: {other:?}"),
        }
        // Raising the event disarms; the next check reports that.
        assert_eq!(watchdog.check(Instant::now()), WatchdogCheck::Disarmed);
    }

    #[test]
    fn test_touch_defers_timeout() {
        let mut watchdog = Watchdog::new();
        watchdog.set_timeout(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(12));
        watchdog.touch();
        std::thread::sleep(Duration::from_millis(12));
        // 24ms since arming but only 12ms since traffic.
        assert!(matches!(
            watchdog.check(Instant::now()),
            WatchdogCheck::Wait(_)
        ));
    }

    #[tokio::test]
    async fn test_delay_driver_fires_once() {
        let mut watchdog = Watchdog::new();
        watchdog.set_timeout(Duration::from_millis(20));
        let idle = watchdog.delay().await.expect("should time out");
        assert!(idle >= Duration::from_millis(20));
        assert!(watchdog.delay().await.is_none());
    }
}

// =============================================================================
// Heartbeat: ping/pong liveness for the feed connection
// =============================================================================
//
// The connection loop polls `check` on a short timer. A ping goes out every
// `interval`; once a ping is outstanding, a pong must arrive within `timeout`
// or the connection is declared dead.
// =============================================================================

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    SendPing,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    last_ping: Instant,
    awaiting_pong_since: Option<Instant>,
}

impl Heartbeat {
    /// Start tracking a freshly opened connection. The first ping is due one
    /// `interval` after `now`.
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_ping: now,
            awaiting_pong_since: None,
        }
    }

    pub fn check(&self, now: Instant) -> HeartbeatAction {
        if let Some(sent) = self.awaiting_pong_since {
            if now.saturating_duration_since(sent) >= self.timeout {
                return HeartbeatAction::TimedOut;
            }
            return HeartbeatAction::Idle;
        }
        if now.saturating_duration_since(self.last_ping) >= self.interval {
            HeartbeatAction::SendPing
        } else {
            HeartbeatAction::Idle
        }
    }

    pub fn record_ping_sent(&mut self, now: Instant) {
        self.last_ping = now;
        self.awaiting_pong_since = Some(now);
    }

    pub fn record_pong(&mut self) {
        self.awaiting_pong_since = None;
    }

    #[cfg(test)]
    pub fn awaiting_pong(&self) -> bool {
        self.awaiting_pong_since.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(start: Instant) -> Heartbeat {
        Heartbeat::new(Duration::from_secs(10), Duration::from_secs(5), start)
    }

    #[test]
    fn ping_due_after_interval() {
        let start = Instant::now();
        let hb = heartbeat(start);
        assert_eq!(hb.check(start + Duration::from_secs(9)), HeartbeatAction::Idle);
        assert_eq!(hb.check(start + Duration::from_secs(10)), HeartbeatAction::SendPing);
    }

    #[test]
    fn pong_clears_outstanding_ping() {
        let start = Instant::now();
        let mut hb = heartbeat(start);
        let ping_at = start + Duration::from_secs(10);
        hb.record_ping_sent(ping_at);
        assert!(hb.awaiting_pong());
        assert_eq!(hb.check(ping_at + Duration::from_secs(2)), HeartbeatAction::Idle);

        hb.record_pong();
        assert!(!hb.awaiting_pong());
        assert_eq!(hb.check(ping_at + Duration::from_secs(6)), HeartbeatAction::Idle);
        assert_eq!(hb.check(ping_at + Duration::from_secs(10)), HeartbeatAction::SendPing);
    }

    #[test]
    fn missing_pong_times_out() {
        let start = Instant::now();
        let mut hb = heartbeat(start);
        let ping_at = start + Duration::from_secs(10);
        hb.record_ping_sent(ping_at);
        assert_eq!(hb.check(ping_at + Duration::from_secs(4)), HeartbeatAction::Idle);
        assert_eq!(hb.check(ping_at + Duration::from_secs(5)), HeartbeatAction::TimedOut);
    }
}

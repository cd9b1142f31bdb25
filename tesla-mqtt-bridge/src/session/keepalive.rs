//! Keepalive bookkeeping for a streaming connection.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks when to probe the stream and when to give up on it.
///
/// A probe is due every `interval`. The connection is dead once no traffic of
/// any kind has arrived for `interval + timeout`.
#[derive(Debug, Clone)]
pub struct Keepalive {
    interval: Duration,
    timeout: Duration,
    last_traffic: Instant,
    next_ping: Instant,
}

impl Keepalive {
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_traffic: now,
            next_ping: now + interval,
        }
    }

    /// Any inbound message counts as proof of life.
    pub fn record_traffic(&mut self, now: Instant) {
        self.last_traffic = now;
    }

    pub fn ping_sent(&mut self, now: Instant) {
        self.next_ping = now + self.interval;
    }

    /// When the next probe should be sent.
    pub fn next_ping(&self) -> Instant {
        self.next_ping
    }

    /// When the connection is declared dead without further traffic.
    pub fn deadline(&self) -> Instant {
        self.last_traffic + self.interval + self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);
    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn test_deadline_is_interval_plus_timeout() {
        let start = Instant::now();
        let keepalive = Keepalive::new(INTERVAL, TIMEOUT, start);

        assert_eq!(keepalive.next_ping(), start + INTERVAL);
        assert_eq!(keepalive.deadline(), start + Duration::from_secs(40));
    }

    #[test]
    fn test_traffic_pushes_deadline() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INTERVAL, TIMEOUT, start);

        keepalive.record_traffic(start + Duration::from_secs(25));
        assert_eq!(keepalive.deadline(), start + Duration::from_secs(65));
    }

    #[test]
    fn test_pings_do_not_count_as_traffic() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INTERVAL, TIMEOUT, start);

        keepalive.ping_sent(start + INTERVAL);
        assert_eq!(keepalive.next_ping(), start + Duration::from_secs(20));
        assert_eq!(keepalive.deadline(), start + Duration::from_secs(40));
    }
}

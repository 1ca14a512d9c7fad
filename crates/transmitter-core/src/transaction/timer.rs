//! Retransmission timers for unreliable transports (RFC 3261 Section 17).
//!
//! A message sent over UDP is retransmitted after T1, then at doubling
//! intervals. Non-INVITE requests and responses cap the interval at T2.
//! Retransmissions stop once the next one would fire after the
//! transaction timeout (64*T1 by default).

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::transmitter::{Transmitter, TransmitterState};

/// Timer durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// RTT estimate and first retransmission interval (default 500 ms).
    pub t1: Duration,
    /// Largest retransmission interval for non-INVITE requests and responses (default 4 s).
    pub t2: Duration,
    /// No retransmission fires after this much time (default 64*T1).
    pub transaction_timeout: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            transaction_timeout: Duration::from_secs(32),
        }
    }
}

/// Intervals between successive retransmissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitSchedule {
    next: Duration,
    cap: Option<Duration>,
    elapsed: Duration,
    timeout: Duration,
}

impl RetransmitSchedule {
    /// Doubling from T1 without a cap (Timer A).
    pub fn uncapped(settings: &TimerSettings) -> Self {
        Self {
            next: settings.t1,
            cap: None,
            elapsed: Duration::ZERO,
            timeout: settings.transaction_timeout,
        }
    }

    /// Doubling from T1 up to T2 (Timers E and G).
    pub fn capped(settings: &TimerSettings) -> Self {
        Self {
            cap: Some(settings.t2),
            ..Self::uncapped(settings)
        }
    }

    /// Interval before the first retransmission.
    pub fn first_interval(&self) -> Duration {
        self.next
    }
}

impl Iterator for RetransmitSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let interval = self.next;
        if self.elapsed + interval > self.timeout {
            return None;
        }
        self.elapsed += interval;
        let doubled = interval * 2;
        self.next = match self.cap {
            Some(cap) => doubled.min(cap),
            None => doubled,
        };
        Some(interval)
    }
}

/// Retransmits the last message of `transmitter` on `schedule`.
///
/// Stops when the schedule runs out, a retransmission fails, or the
/// transmitter terminates. Returns `None` outside a tokio runtime.
pub(crate) fn spawn_retransmissions(
    transmitter: Transmitter,
    schedule: RetransmitSchedule,
) -> Option<JoinHandle<()>> {
    let Ok(handle) = Handle::try_current() else {
        warn!(id = %transmitter.id(), "no runtime, retransmissions disabled");
        return None;
    };
    Some(handle.spawn(async move {
        for interval in schedule {
            tokio::time::sleep(interval).await;
            if transmitter.state() == TransmitterState::Terminated {
                trace!(id = %transmitter.id(), "transmitter terminated, stopping retransmissions");
                return;
            }
            if let Err(e) = transmitter.retransmit() {
                debug!(id = %transmitter.id(), error = %e, "stopping retransmissions");
                return;
            }
            trace!(id = %transmitter.id(), ?interval, "retransmitted");
        }
        debug!(id = %transmitter.id(), "retransmission schedule exhausted");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_capped_schedule_stops_at_t2() {
        let settings = TimerSettings::default();
        let intervals: Vec<_> = RetransmitSchedule::capped(&settings).take(6).collect();
        assert_eq!(intervals, vec![ms(500), ms(1000), ms(2000), ms(4000), ms(4000), ms(4000)]);
    }

    #[test]
    fn test_uncapped_schedule_ends_at_timeout() {
        let settings = TimerSettings::default();
        let intervals: Vec<_> = RetransmitSchedule::uncapped(&settings).collect();
        // 0.5 + 1 + 2 + 4 + 8 + 16 = 31.5 s; the next (32 s) would pass the timeout.
        assert_eq!(intervals, vec![ms(500), ms(1000), ms(2000), ms(4000), ms(8000), ms(16000)]);
    }

    #[test]
    fn test_capped_schedule_total_within_timeout() {
        let settings = TimerSettings {
            t1: ms(100),
            t2: ms(400),
            transaction_timeout: ms(2000),
        };
        let schedule = RetransmitSchedule::capped(&settings);
        assert_eq!(schedule.first_interval(), ms(100));
        let total: Duration = schedule.sum();
        assert!(total <= ms(2000));
        assert_eq!(total, ms(1900));
    }
}

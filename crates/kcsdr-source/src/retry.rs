//! Read retry policy for transient "no data yet" misses.
//!
//! A read first spins under the device lock for up to `spin_limit` attempts.
//! If every attempt misses, the lock is released, the thread backs off for
//! `backoff` (or yields when it is zero) and the run flag is checked before
//! the next round. Releasing the lock between rounds keeps control commands
//! from waiting behind a device that has no data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{ReceiverDevice, SharedDevice};

/// Retry behaviour for transient read misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Immediate attempts per lock hold (at least one)
    #[serde(default = "default_spin_limit")]
    pub spin_limit: u32,

    /// Sleep between spin rounds, with the lock released
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,

    /// Consecutive misses after which the loop gives up (None = never)
    #[serde(default)]
    pub max_consecutive_misses: Option<u64>,
}

fn default_spin_limit() -> u32 {
    64
}

fn default_backoff() -> Duration {
    Duration::from_micros(100)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            spin_limit: default_spin_limit(),
            backoff: default_backoff(),
            max_consecutive_misses: None,
        }
    }
}

/// Result of one retried block read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The buffer holds a full block.
    Filled { misses: u64 },
    /// The run flag was cleared before data arrived.
    Stopped { misses: u64 },
    /// `max_consecutive_misses` was reached.
    Stalled { misses: u64 },
}

impl ReadOutcome {
    /// Misses counted before the outcome.
    pub fn misses(&self) -> u64 {
        match *self {
            Self::Filled { misses } | Self::Stopped { misses } | Self::Stalled { misses } => misses,
        }
    }
}

enum Spin {
    Filled(u64),
    Missed(u64),
}

fn spin_read(device: &mut dyn ReceiverDevice, buf: &mut [i16], limit: u32, run: &AtomicBool) -> Spin {
    let mut misses = 0;
    for _ in 0..limit.max(1) {
        if device.read(buf) {
            return Spin::Filled(misses);
        }
        misses += 1;
        if !run.load(Ordering::Acquire) {
            break;
        }
    }
    Spin::Missed(misses)
}

/// Read one block from `device`, retrying transient misses per `policy`
/// until data arrives, `run` is cleared, or the escalation limit is hit.
pub fn read_block(
    device: &SharedDevice,
    buf: &mut [i16],
    policy: &RetryPolicy,
    run: &AtomicBool,
) -> ReadOutcome {
    let mut misses = 0u64;

    loop {
        match device.with_handle(|dev| spin_read(dev, buf, policy.spin_limit, run)) {
            Spin::Filled(n) => return ReadOutcome::Filled { misses: misses + n },
            Spin::Missed(n) => misses += n,
        }

        if !run.load(Ordering::Acquire) {
            return ReadOutcome::Stopped { misses };
        }
        if policy
            .max_consecutive_misses
            .is_some_and(|max| misses >= max)
        {
            return ReadOutcome::Stalled { misses };
        }

        if policy.backoff.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(policy.backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Setpoints;
    use crate::mock::{MockConfig, MockReceiver, SamplePattern};

    fn started(config: MockConfig) -> (SharedDevice, crate::mock::MockProbe) {
        let receiver = MockReceiver::new(MockReceiver::kc908_descriptor("RT0001"), config);
        let probe = receiver.probe();
        let device = SharedDevice::new(Box::new(receiver), Setpoints::default());
        device.start_streaming();
        (device, probe)
    }

    #[test]
    fn test_misses_are_absorbed() {
        let (device, _probe) = started(MockConfig {
            pattern: SamplePattern::Constant { i: 5, q: -5 },
            misses_per_read: 3,
            ..Default::default()
        });
        let run = AtomicBool::new(true);
        let mut buf = vec![0i16; 8];

        let outcome = read_block(&device, &mut buf, &RetryPolicy::default(), &run);
        assert_eq!(outcome, ReadOutcome::Filled { misses: 3 });
        assert_eq!(buf, vec![5, -5, 5, -5, 5, -5, 5, -5]);
    }

    #[test]
    fn test_misses_across_backoff_rounds() {
        let (device, _probe) = started(MockConfig {
            misses_per_read: 10,
            ..Default::default()
        });
        let run = AtomicBool::new(true);
        let policy = RetryPolicy {
            spin_limit: 4,
            backoff: Duration::ZERO,
            max_consecutive_misses: None,
        };
        let mut buf = vec![0i16; 4];

        let outcome = read_block(&device, &mut buf, &policy, &run);
        assert_eq!(outcome.misses(), 10);
        assert!(matches!(outcome, ReadOutcome::Filled { .. }));
    }

    #[test]
    fn test_escalates_after_limit() {
        let (device, probe) = started(MockConfig::default());
        probe.set_data_available(false);
        let run = AtomicBool::new(true);
        let policy = RetryPolicy {
            spin_limit: 8,
            backoff: Duration::from_micros(10),
            max_consecutive_misses: Some(20),
        };
        let mut buf = vec![0i16; 4];

        match read_block(&device, &mut buf, &policy, &run) {
            ReadOutcome::Stalled { misses } => assert!(misses >= 20),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_cleared_run_flag_stops_retry() {
        let (device, probe) = started(MockConfig::default());
        probe.set_data_available(false);
        let run = AtomicBool::new(false);
        let mut buf = vec![0i16; 4];

        let outcome = read_block(&device, &mut buf, &RetryPolicy::default(), &run);
        assert_eq!(outcome, ReadOutcome::Stopped { misses: 1 });
    }

    #[test]
    fn test_stop_wins_over_stall_limit() {
        let (device, probe) = started(MockConfig::default());
        probe.set_data_available(false);
        let run = AtomicBool::new(false);
        let policy = RetryPolicy {
            spin_limit: 8,
            backoff: Duration::ZERO,
            max_consecutive_misses: Some(1),
        };
        let mut buf = vec![0i16; 4];

        let outcome = read_block(&device, &mut buf, &policy, &run);
        assert_eq!(outcome, ReadOutcome::Stopped { misses: 1 });
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            spin_limit = 16
            backoff = "250us"
            max_consecutive_misses = 100000
            "#,
        )
        .unwrap();

        assert_eq!(policy.spin_limit, 16);
        assert_eq!(policy.backoff, Duration::from_micros(250));
        assert_eq!(policy.max_consecutive_misses, Some(100_000));

        let policy: RetryPolicy = toml::from_str("").unwrap();
        assert_eq!(policy, RetryPolicy::default());
    }
}

#![forbid(unsafe_code)]

//! Epoch arithmetic shared by every network and every selection tree.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RewardError};

/// Fixed start time + fixed epoch length (both in seconds).
///
/// Two clocks are consistent iff they are equal; a selection tree whose clock
/// differs from the platform clock cannot back a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochClock {
    start_time: u64,
    epoch_length: u64,
}

impl EpochClock {
    pub fn new(start_time: u64, epoch_length: u64) -> Result<Self> {
        if epoch_length == 0 {
            return Err(RewardError::InvalidConfig("epoch_length must be > 0".into()));
        }
        Ok(Self { start_time, epoch_length })
    }

    #[inline]
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    #[inline]
    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    /// `(ts - start) / len`; timestamps before the start map to epoch 0.
    #[inline]
    pub fn epoch_of(&self, ts: u64) -> u64 {
        ts.saturating_sub(self.start_time) / self.epoch_length
    }

    #[inline]
    pub fn current_epoch(&self, now: u64) -> u64 {
        self.epoch_of(now)
    }

    /// First second of `epoch`.
    pub fn epoch_start(&self, epoch: u64) -> u64 {
        self.start_time
            .saturating_add(epoch.saturating_mul(self.epoch_length))
    }

    /// First second after `epoch` (= start of `epoch + 1`).
    pub fn epoch_end(&self, epoch: u64) -> u64 {
        self.epoch_start(epoch.saturating_add(1))
    }

    /// True once `epoch` has fully elapsed at `now`.
    #[inline]
    pub fn is_complete(&self, epoch: u64, now: u64) -> bool {
        epoch < self.current_epoch(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_rejected() {
        assert!(matches!(EpochClock::new(0, 0), Err(RewardError::InvalidConfig(_))));
    }

    #[test]
    fn epoch_boundaries() {
        let c = EpochClock::new(1_000, 100).unwrap();
        assert_eq!(c.epoch_of(1_000), 0);
        assert_eq!(c.epoch_of(1_099), 0);
        assert_eq!(c.epoch_of(1_100), 1);
        assert_eq!(c.epoch_of(1_350), 3);
        assert_eq!(c.epoch_start(3), 1_300);
        assert_eq!(c.epoch_end(3), 1_400);
        assert_eq!(c.epoch_of(c.epoch_end(3)), 4);
    }

    #[test]
    fn before_start_is_epoch_zero() {
        let c = EpochClock::new(1_000, 100).unwrap();
        assert_eq!(c.epoch_of(0), 0);
        assert_eq!(c.epoch_of(999), 0);
    }

    #[test]
    fn completeness() {
        let c = EpochClock::new(0, 10).unwrap();
        assert!(!c.is_complete(0, 9));
        assert!(c.is_complete(0, 10));
        assert!(!c.is_complete(1, 10));
    }

    #[test]
    fn epoch_is_monotone() {
        let c = EpochClock::new(50, 7).unwrap();
        let mut prev = 0;
        for ts in 0..500u64 {
            let e = c.epoch_of(ts);
            assert!(e >= prev);
            prev = e;
        }
    }
}

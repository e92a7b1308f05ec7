//! Wall clock used to capture request-start timestamps.

use chrono::Utc;

use kanisync_common::Timestamp;

/// Source of the current time.
///
/// This allows injecting a manual clock for testing.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// System clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::Mutex;

    use super::Clock;
    use kanisync_common::Timestamp;

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub(crate) struct ManualClock {
        now: Mutex<Timestamp>,
    }

    impl ManualClock {
        pub(crate) fn new(now: Timestamp) -> Self {
            Self {
                now: Mutex::new(now),
            }
        }

        pub(crate) fn set(&self, now: Timestamp) {
            *self.now.lock().unwrap() = now;
        }

        pub(crate) fn advance(&self, by: chrono::Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            *self.now.lock().unwrap()
        }
    }
}

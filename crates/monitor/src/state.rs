use crate::store::Outcome;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// Success and failure counts, overall and for the current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub today_succeeded: u64,
    pub today_failed: u64,
    /// Calendar day the `today_*` counts belong to.
    pub day: Date,
}

impl CounterSnapshot {
    fn new(day: Date) -> Self {
        Self { total_succeeded: 0, total_failed: 0, today_succeeded: 0, today_failed: 0, day }
    }
}

/// Today's date in local time, or UTC if the local offset is unknown.
pub fn local_today() -> Date {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()).date()
}

#[derive(Debug)]
pub struct MonitorCounters {
    inner: Mutex<CounterSnapshot>,
}

impl MonitorCounters {
    pub fn new(today: Date) -> Self {
        Self { inner: Mutex::new(CounterSnapshot::new(today)) }
    }

    pub fn record(&self, outcome: Outcome) {
        let mut counters = self.inner.lock();
        match outcome {
            Outcome::Success => {
                counters.total_succeeded += 1;
                counters.today_succeeded += 1;
            },
            Outcome::Failure => {
                counters.total_failed += 1;
                counters.today_failed += 1;
            },
        }
    }

    /// Reset the daily counts if `today` is a different calendar day than
    /// the one they were counted on. Returns `true` if they were reset.
    pub fn roll_over(&self, today: Date) -> bool {
        let mut counters = self.inner.lock();
        if counters.day == today {
            return false;
        }
        counters.today_succeeded = 0;
        counters.today_failed = 0;
        counters.day = today;
        true
    }

    /// Replace the counts with ones loaded from a checkpoint.
    pub fn restore(&self, snapshot: CounterSnapshot, today: Date) {
        *self.inner.lock() = snapshot;
        self.roll_over(today);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        *self.inner.lock()
    }
}

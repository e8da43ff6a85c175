//! Calendar-bucketed rain accumulation.
//!
//! Each accumulator remembers the wall-clock bucket of its last update and
//! starts over when an update lands in a different one. Buckets are only
//! checked when data arrives, so a boundary with no rain pushed across it is
//! noticed on the next push.

use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RainPeriod {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RainPeriod {
    pub const ALL: [RainPeriod; 5] = [
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Yearly,
    ];

    /// The rain driver field this period feeds, if any.
    pub fn from_field(field: &str) -> Option<Self> {
        match field {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Hourly => 0,
            Self::Daily => 1,
            Self::Weekly => 2,
            Self::Monthly => 3,
            Self::Yearly => 4,
        }
    }

    /// Identify the calendar bucket `at` falls in. The enclosing year (and
    /// day, for hours) is part of the key so that an update exactly one
    /// period later still counts as a new bucket.
    fn bucket(self, at: OffsetDateTime) -> (i32, u16) {
        match self {
            Self::Hourly => (at.year(), at.ordinal() * 24 + u16::from(at.hour())),
            Self::Daily => (at.year(), at.ordinal()),
            Self::Weekly => {
                let (iso_year, week, _) = at.to_iso_week_date();
                (iso_year, u16::from(week))
            }
            Self::Monthly => (at.year(), u16::from(u8::from(at.month()))),
            Self::Yearly => (at.year(), 0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    total: f64,
    bucket: Option<(i32, u16)>,
}

/// Hourly, daily, weekly, monthly and yearly running totals (mm).
#[derive(Debug, Default)]
pub struct RainAccumulators {
    accumulators: [Accumulator; 5],
}

#[derive(Debug, Clone, Serialize)]
pub struct RainTotals {
    pub hourly: f64,
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
    pub yearly: f64,
}

impl RainAccumulators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `increment` to the `period` total as of `at`, resetting first if
    /// `at` is in a new bucket. Returns the running total.
    pub fn add_at(&mut self, period: RainPeriod, increment: f64, at: OffsetDateTime) -> f64 {
        let acc = &mut self.accumulators[period.index()];
        let bucket = period.bucket(at);

        if acc.bucket != Some(bucket) {
            acc.bucket = Some(bucket);
            acc.total = 0.0;
        }

        acc.total += increment;
        acc.total
    }

    /// Same as [`add_at`](Self::add_at) using the local wall clock.
    pub fn add(&mut self, period: RainPeriod, increment: f64) -> f64 {
        self.add_at(period, increment, now_local())
    }

    pub fn total(&self, period: RainPeriod) -> f64 {
        self.accumulators[period.index()].total
    }

    pub fn totals(&self) -> RainTotals {
        RainTotals {
            hourly: self.total(RainPeriod::Hourly),
            daily: self.total(RainPeriod::Daily),
            weekly: self.total(RainPeriod::Weekly),
            monthly: self.total(RainPeriod::Monthly),
            yearly: self.total(RainPeriod::Yearly),
        }
    }
}

/// Local wall-clock time, falling back to UTC when the local offset cannot
/// be determined.
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

// ===========================================================================
// Tests
// ===========================================================================

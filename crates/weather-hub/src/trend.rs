//! Barometric pressure trend: a bounded sample history and the categorical
//! classification reported on the pressure node's trend driver.

use std::collections::VecDeque;

use serde::Serialize;

/// Maximum number of pressure samples retained.
pub const TREND_CAPACITY: usize = 180;

/// Difference (mb) between the baseline and the current sample beyond which
/// pressure counts as rising or falling.
const TREND_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Falling,
    Steady,
    Rising,
    RisingSlowly,
    RisingRapidly,
    FallingSlowly,
    FallingRapidly,
    Unknown,
}

impl Trend {
    /// Value reported to the host for this trend.
    pub fn code(self) -> u8 {
        match self {
            Self::Falling => 0,
            Self::Steady => 1,
            Self::Rising => 2,
            Self::RisingSlowly => 3,
            Self::RisingRapidly => 4,
            Self::FallingSlowly => 5,
            Self::FallingRapidly => 6,
            Self::Unknown => 7,
        }
    }

    /// Map a descriptive trend as some stations send it ("Rising slowly").
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Falling" => Self::Falling,
            "Steady" => Self::Steady,
            "Rising" => Self::Rising,
            "Rising slowly" => Self::RisingSlowly,
            "Rising rapidly" => Self::RisingRapidly,
            "Falling slowly" => Self::FallingSlowly,
            "Falling rapidly" => Self::FallingRapidly,
            _ => Self::Unknown,
        }
    }

    /// Classify `past - current`.
    pub fn from_drop(drop: f64) -> Self {
        if drop > TREND_THRESHOLD {
            Self::Falling
        } else if drop < -TREND_THRESHOLD {
            Self::Rising
        } else {
            Self::Steady
        }
    }
}

/// Most-recent-first pressure history.
#[derive(Debug, Default)]
pub struct PressureTrend {
    history: VecDeque<f64>,
}

impl PressureTrend {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(TREND_CAPACITY),
        }
    }

    /// Record a sample and classify it against the oldest retained one.
    pub fn update(&mut self, current: f64) -> Trend {
        if self.history.len() >= TREND_CAPACITY {
            self.history.pop_back();
        }

        let past = self.history.back().copied().unwrap_or(0.0);
        let trend = Trend::from_drop(past - current);

        self.history.push_front(current);
        trend
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<f64> {
        self.history.front().copied()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

//! Time and phase utilities
//!
//! Every derived table is keyed by calendar attributes computed here: the day
//! index relative to the first observation, the hour bucket, the light/dark
//! phase label and the phase occurrence counter. All functions are pure.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Light-cycle phase label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Light,
    Dark,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Light => "light",
            Phase::Dark => "dark",
        }
    }

    pub fn other(&self) -> Phase {
        match self {
            Phase::Light => Phase::Dark,
            Phase::Dark => Phase::Light,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Phase::Light),
            "dark" => Ok(Phase::Dark),
            other => Err(AnalysisError::SchemaMismatch {
                column: "phase".to_string(),
                reason: format!("unknown phase label '{}'", other),
            }),
        }
    }
}

/// Clock times at which the light and dark phases begin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBoundaries {
    /// Start of the light phase (e.g. "07:00:00")
    #[serde(with = "clock_time")]
    pub light_start: NaiveTime,
    /// Start of the dark phase (e.g. "19:00:00")
    #[serde(with = "clock_time")]
    pub dark_start: NaiveTime,
}

impl PhaseBoundaries {
    pub fn new(light_start: NaiveTime, dark_start: NaiveTime) -> Self {
        Self {
            light_start,
            dark_start,
        }
    }

    /// Phase label for a wall-clock time. Windows wrap past midnight.
    pub fn phase_at(&self, time: NaiveTime) -> Phase {
        let in_light = if self.light_start < self.dark_start {
            time >= self.light_start && time < self.dark_start
        } else {
            time >= self.light_start || time < self.dark_start
        };
        if in_light {
            Phase::Light
        } else {
            Phase::Dark
        }
    }

    fn start_of(&self, phase: Phase) -> NaiveTime {
        match phase {
            Phase::Light => self.light_start,
            Phase::Dark => self.dark_start,
        }
    }
}

/// One concrete instance of a phase, clipped to the observation window
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOccurrence {
    pub phase: Phase,
    pub phase_count: i64,
    pub day: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PhaseOccurrence {
    pub fn duration_seconds(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Calendar attributes anchored at the first observation of a run
#[derive(Debug, Clone, Copy)]
pub struct PhaseClock {
    boundaries: PhaseBoundaries,
    origin: DateTime<Utc>,
}

impl PhaseClock {
    pub fn new(boundaries: PhaseBoundaries, origin: DateTime<Utc>) -> Self {
        Self { boundaries, origin }
    }

    pub fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    /// Day index; day 0 is the calendar day of the first observation.
    pub fn day(&self, ts: DateTime<Utc>) -> i64 {
        (ts.date_naive() - self.origin.date_naive()).num_days()
    }

    pub fn hour(&self, ts: DateTime<Utc>) -> u32 {
        ts.hour()
    }

    pub fn phase(&self, ts: DateTime<Utc>) -> Phase {
        self.boundaries.phase_at(ts.time())
    }

    /// Global occurrence counter: 1 for the phase holding the first
    /// observation, incremented at every phase boundary crossed since.
    pub fn phase_count(&self, ts: DateTime<Utc>) -> i64 {
        let first = self.period_start(self.origin.naive_utc());
        let current = self.period_start(ts.naive_utc());
        let elapsed = (current - first).num_seconds();
        let whole_days = elapsed.div_euclid(SECONDS_PER_DAY);
        let partial = i64::from(elapsed.rem_euclid(SECONDS_PER_DAY) != 0);
        1 + 2 * whole_days + partial
    }

    /// Start of the phase period containing `at`.
    fn period_start(&self, at: NaiveDateTime) -> NaiveDateTime {
        let phase = self.boundaries.phase_at(at.time());
        let candidate = at.date().and_time(self.boundaries.start_of(phase));
        if candidate > at {
            candidate - Duration::days(1)
        } else {
            candidate
        }
    }

    /// End of the phase period that started at `start`.
    fn period_end(&self, start: NaiveDateTime) -> NaiveDateTime {
        let phase = self.boundaries.phase_at(start.time());
        let candidate = start.date().and_time(self.boundaries.start_of(phase.other()));
        if candidate <= start {
            candidate + Duration::days(1)
        } else {
            candidate
        }
    }

    /// Every phase occurrence touching `[self.origin, last]`, clipped to it.
    pub fn occurrences(&self, last: DateTime<Utc>) -> Vec<PhaseOccurrence> {
        let mut occurrences = Vec::new();
        if last < self.origin {
            return occurrences;
        }

        let last_naive = last.naive_utc();
        let mut start = self.period_start(self.origin.naive_utc());
        while start <= last_naive {
            let end = self.period_end(start);
            let clipped_start = start.max(self.origin.naive_utc()).and_utc();
            let clipped_end = end.min(last_naive).and_utc();
            occurrences.push(PhaseOccurrence {
                phase: self.boundaries.phase_at(start.time()),
                phase_count: self.phase_count(clipped_start),
                day: self.day(clipped_start),
                start: clipped_start,
                end: clipped_end,
            });
            start = end;
        }
        occurrences
    }
}

/// Truncate a timestamp to the start of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let naive = ts.naive_utc();
    naive
        .date()
        .and_hms_opt(naive.hour(), 0, 0)
        .map(|n| n.and_utc())
        .unwrap_or(ts)
}

/// Serde adapter accepting "HH:MM:SS" or "HH:MM"
mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M"))
            .map_err(|e| serde::de::Error::custom(format!("invalid clock time '{}': {}", raw, e)))
    }
}

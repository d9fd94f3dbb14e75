//! Row types for every table flowing through the engine
//!
//! Input tables (`binary_df`, `padded_df`) are produced upstream by the
//! project bootstrap. All other tables are derived by the metric stages and
//! are densified over their key domains.

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::define_table;
use crate::error::AnalysisError;
use crate::time::{Phase, PhaseClock};

define_table! {
    /// One second of an animal occupying a monitored cage
    pub struct BinaryEvent {
        pub datetime: DateTime<Utc>,
        pub animal_id: String,
        pub cage: String,
        pub hour: u32,
        pub day: i64,
    }
}

impl BinaryEvent {
    pub fn new(
        clock: &PhaseClock,
        datetime: DateTime<Utc>,
        animal_id: impl Into<String>,
        cage: impl Into<String>,
    ) -> Self {
        Self {
            datetime,
            animal_id: animal_id.into(),
            cage: cage.into(),
            hour: clock.hour(datetime),
            day: clock.day(datetime),
        }
    }
}

define_table! {
    /// One contiguous dwell interval at a position; `datetime` is the end
    pub struct PaddedEvent {
        pub animal_id: String,
        pub position: String,
        pub datetime: DateTime<Utc>,
        /// Interval duration in seconds
        pub time_spent: f64,
        pub phase: Phase,
        pub day: i64,
        pub phase_count: i64,
    }
}

impl PaddedEvent {
    pub fn new(
        clock: &PhaseClock,
        animal_id: impl Into<String>,
        position: impl Into<String>,
        datetime: DateTime<Utc>,
        time_spent: f64,
    ) -> Self {
        Self {
            animal_id: animal_id.into(),
            position: position.into(),
            datetime,
            time_spent,
            phase: clock.phase(datetime),
            day: clock.day(datetime),
            phase_count: clock.phase_count(datetime),
        }
    }

    /// Start of the dwell interval
    pub fn start(&self) -> Result<DateTime<Utc>, AnalysisError> {
        let invalid = || AnalysisError::SchemaMismatch {
            column: "time_spent".to_string(),
            reason: format!(
                "{} s before {} is not a representable instant",
                self.time_spent, self.datetime
            ),
        };
        if !self.time_spent.is_finite() {
            return Err(invalid());
        }
        let spent = Duration::try_milliseconds((self.time_spent * 1000.0).round() as i64)
            .ok_or_else(invalid)?;
        self.datetime.checked_sub_signed(spent).ok_or_else(invalid)
    }

    pub fn hour(&self) -> u32 {
        self.datetime.hour()
    }
}

define_table! {
    /// Wall-clock length of one phase occurrence inside the run bounds
    pub struct PhaseDurationRow {
        pub phase: Phase,
        pub phase_count: i64,
        pub day: i64,
        pub start: DateTime<Utc>,
        pub end: DateTime<Utc>,
        pub duration_seconds: f64,
    }
}

define_table! {
    /// Seconds an animal spent in a cage during one hour
    pub struct CageOccupancyRow {
        pub day: i64,
        pub hour: u32,
        pub cage: String,
        pub animal_id: String,
        pub time_spent: i64,
    }
}

define_table! {
    /// Time and visits per position for one phase occurrence
    pub struct ActivityRow {
        pub phase: Phase,
        pub day: i64,
        pub phase_count: i64,
        pub position: String,
        pub animal_id: String,
        pub time_in_position: f64,
        pub visits_to_position: i64,
    }
}

define_table! {
    /// Number of times `chaser` chased `chased` within one hour bucket
    pub struct ChasingRow {
        pub phase: Phase,
        pub day: i64,
        pub phase_count: i64,
        pub hour: u32,
        pub chaser: String,
        pub chased: String,
        pub chasings: i64,
    }
}

define_table! {
    /// A single chasing event seen as a won match
    pub struct MatchRow {
        pub loser: String,
        pub winner: String,
        pub datetime: DateTime<Utc>,
    }
}

define_table! {
    /// Rating of one animal right after a match
    pub struct RankingRow {
        pub animal_id: String,
        pub mu: f64,
        pub sigma: f64,
        pub ordinal: f64,
        pub datetime: DateTime<Utc>,
        pub phase: Phase,
        pub day: i64,
        pub hour: u32,
    }
}

define_table! {
    /// Time two animals shared a cage within one phase occurrence
    pub struct PairwiseMeetingRow {
        pub phase: Phase,
        pub day: i64,
        pub phase_count: i64,
        pub position: String,
        pub animal_id: String,
        pub animal_id_2: String,
        pub time_together: f64,
        pub pairwise_encounters: i64,
    }
}

define_table! {
    /// Observed minus chance-level co-occupancy for a pair
    pub struct IncohortSociabilityRow {
        pub phase: Phase,
        pub day: i64,
        pub phase_count: i64,
        pub animal_id: String,
        pub animal_id_2: String,
        pub proportion_together: f64,
        pub sociability: f64,
    }
}

define_table! {
    /// Seconds an animal was the only occupant of a cage
    pub struct TimeAloneRow {
        pub phase: Phase,
        pub day: i64,
        pub phase_count: i64,
        pub animal_id: String,
        pub cage: String,
        pub time_alone: i64,
    }
}

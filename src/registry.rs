//! Derived-table registry and cache-aware loader
//!
//! Table keys map statically to the stage that produces them. The
//! [`AnalysisContext`] is created once per invocation and passed to every
//! stage; it owns the configuration, the artifact store and the tables
//! produced so far in this run.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{ConfigSource, ProjectConfig, StageOptions};
use crate::error::AnalysisError;
use crate::metrics;
use crate::store::ArtifactStore;
use crate::table::Columnar;
use crate::time::PhaseClock;
use crate::types::BinaryEvent;

/// Stable name of every table the engine knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKey {
    BinaryDf,
    PaddedDf,
    PhaseDurations,
    CageOccupancy,
    ActivityDf,
    ChasingsDf,
    MatchDf,
    Ranking,
    PairwiseMeetings,
    IncohortSociability,
    TimeAlone,
}

impl TableKey {
    pub const ALL: [TableKey; 11] = [
        TableKey::BinaryDf,
        TableKey::PaddedDf,
        TableKey::PhaseDurations,
        TableKey::CageOccupancy,
        TableKey::ActivityDf,
        TableKey::ChasingsDf,
        TableKey::MatchDf,
        TableKey::Ranking,
        TableKey::PairwiseMeetings,
        TableKey::IncohortSociability,
        TableKey::TimeAlone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKey::BinaryDf => "binary_df",
            TableKey::PaddedDf => "padded_df",
            TableKey::PhaseDurations => "phase_durations",
            TableKey::CageOccupancy => "cage_occupancy",
            TableKey::ActivityDf => "activity_df",
            TableKey::ChasingsDf => "chasings_df",
            TableKey::MatchDf => "match_df",
            TableKey::Ranking => "ranking",
            TableKey::PairwiseMeetings => "pairwise_meetings",
            TableKey::IncohortSociability => "incohort_sociability",
            TableKey::TimeAlone => "time_alone",
        }
    }

    /// Stage that writes this table; `None` for upstream inputs.
    pub fn producer(&self) -> Option<Stage> {
        match self {
            TableKey::BinaryDf | TableKey::PaddedDf => None,
            TableKey::PhaseDurations => Some(Stage::PhaseDurations),
            TableKey::CageOccupancy => Some(Stage::CageOccupancy),
            TableKey::ActivityDf => Some(Stage::Activity),
            TableKey::ChasingsDf | TableKey::MatchDf => Some(Stage::Chasings),
            TableKey::Ranking => Some(Stage::Ranking),
            TableKey::PairwiseMeetings => Some(Stage::PairwiseMeetings),
            TableKey::IncohortSociability => Some(Stage::IncohortSociability),
            TableKey::TimeAlone => Some(Stage::TimeAlone),
        }
    }

    pub fn is_input(&self) -> bool {
        self.producer().is_none()
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKey {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| AnalysisError::UnknownTable(s.to_string()))
    }
}

/// Signature shared by every registered stage; returns the produced row count
pub type StageFn = fn(&mut AnalysisContext, &StageOptions) -> Result<usize, AnalysisError>;

/// A unit of work producing one derived table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PhaseDurations,
    Activity,
    CageOccupancy,
    Chasings,
    Ranking,
    PairwiseMeetings,
    IncohortSociability,
    TimeAlone,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::PhaseDurations => "phase_durations",
            Stage::Activity => "activity",
            Stage::CageOccupancy => "cage_occupancy",
            Stage::Chasings => "chasings",
            Stage::Ranking => "ranking",
            Stage::PairwiseMeetings => "pairwise_meetings",
            Stage::IncohortSociability => "incohort_sociability",
            Stage::TimeAlone => "time_alone",
        }
    }

    pub fn output(&self) -> TableKey {
        match self {
            Stage::PhaseDurations => TableKey::PhaseDurations,
            Stage::Activity => TableKey::ActivityDf,
            Stage::CageOccupancy => TableKey::CageOccupancy,
            Stage::Chasings => TableKey::ChasingsDf,
            Stage::Ranking => TableKey::Ranking,
            Stage::PairwiseMeetings => TableKey::PairwiseMeetings,
            Stage::IncohortSociability => TableKey::IncohortSociability,
            Stage::TimeAlone => TableKey::TimeAlone,
        }
    }

    pub fn runner(&self) -> StageFn {
        match self {
            Stage::PhaseDurations => run_phase_durations,
            Stage::Activity => run_activity,
            Stage::CageOccupancy => run_cage_occupancy,
            Stage::Chasings => run_chasings,
            Stage::Ranking => run_ranking,
            Stage::PairwiseMeetings => run_pairwise_meetings,
            Stage::IncohortSociability => run_incohort_sociability,
            Stage::TimeAlone => run_time_alone,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn run_phase_durations(ctx: &mut AnalysisContext, o: &StageOptions) -> Result<usize, AnalysisError> {
    metrics::calculate_phase_durations(ctx, o).map(|rows| rows.len())
}

fn run_activity(ctx: &mut AnalysisContext, o: &StageOptions) -> Result<usize, AnalysisError> {
    metrics::calculate_activity(ctx, o).map(|rows| rows.len())
}

fn run_cage_occupancy(ctx: &mut AnalysisContext, o: &StageOptions) -> Result<usize, AnalysisError> {
    metrics::calculate_cage_occupancy(ctx, o).map(|rows| rows.len())
}

fn run_chasings(ctx: &mut AnalysisContext, o: &StageOptions) -> Result<usize, AnalysisError> {
    metrics::calculate_chasings(ctx, o).map(|rows| rows.len())
}

fn run_ranking(ctx: &mut AnalysisContext, o: &StageOptions) -> Result<usize, AnalysisError> {
    metrics::calculate_ranking(ctx, o).map(|rows| rows.len())
}

fn run_pairwise_meetings(ctx: &mut AnalysisContext, o: &StageOptions) -> Result<usize, AnalysisError> {
    metrics::calculate_pairwise_meetings(ctx, o).map(|rows| rows.len())
}

fn run_incohort_sociability(
    ctx: &mut AnalysisContext,
    o: &StageOptions,
) -> Result<usize, AnalysisError> {
    metrics::calculate_incohort_sociability(ctx, o).map(|rows| rows.len())
}

fn run_time_alone(ctx: &mut AnalysisContext, o: &StageOptions) -> Result<usize, AnalysisError> {
    metrics::calculate_time_alone(ctx, o).map(|rows| rows.len())
}

/// First and last raw observation of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationWindow {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

/// Per-invocation state injected into every stage
pub struct AnalysisContext {
    config: ProjectConfig,
    store: ArtifactStore,
    produced: HashMap<TableKey, RecordBatch>,
    computations: HashMap<TableKey, usize>,
    window: Option<ObservationWindow>,
}

impl AnalysisContext {
    /// Resolve and validate the configuration; no stage runs on failure.
    pub fn open(source: impl Into<ConfigSource>) -> Result<Self, AnalysisError> {
        let config = source.into().resolve()?;
        let store = ArtifactStore::new(config.results_path());
        Ok(Self {
            config,
            store,
            produced: HashMap::new(),
            computations: HashMap::new(),
            window: None,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn default_options(&self) -> StageOptions {
        self.config.default_options()
    }

    /// How many times `key` has been computed by this context
    pub fn computations(&self, key: TableKey) -> usize {
        self.computations.get(&key).copied().unwrap_or(0)
    }

    /// Return the table for `key` from this run or disk, unless `overwrite`
    /// is set; otherwise compute it, remember it and persist it if `save`.
    pub fn cached<T, F>(
        &mut self,
        key: TableKey,
        options: &StageOptions,
        compute: F,
    ) -> Result<Vec<T>, AnalysisError>
    where
        T: Columnar,
        F: FnOnce(&mut Self) -> Result<Vec<T>, AnalysisError>,
    {
        options.validate()?;
        if !options.overwrite {
            if let Some(batch) = self.lookup(key)? {
                debug!(table = %key, rows = batch.num_rows(), "cache hit");
                return T::from_batch(&batch);
            }
        }

        info!(table = %key, "computing table");
        let rows = compute(self)?;
        *self.computations.entry(key).or_default() += 1;
        self.publish(key, &rows, options.save)?;
        info!(table = %key, rows = rows.len(), "table ready");
        Ok(rows)
    }

    /// Record a table produced in this run and optionally persist it.
    pub fn publish<T: Columnar>(
        &mut self,
        key: TableKey,
        rows: &[T],
        save: bool,
    ) -> Result<(), AnalysisError> {
        let batch = T::to_batch(rows)?;
        if save {
            self.store.write_batch(key.as_str(), &batch)?;
        }
        self.produced.insert(key, batch);
        Ok(())
    }

    /// Fetch an upstream table. Never computes: a table that this run has
    /// not produced and that is not persisted is an error.
    pub fn require<T: Columnar>(&mut self, key: TableKey) -> Result<Vec<T>, AnalysisError> {
        match self.lookup(key)? {
            Some(batch) => T::from_batch(&batch),
            None => Err(self.missing(key)),
        }
    }

    /// Load any table by key, computing it through its producer when needed.
    ///
    /// A secondary output (`match_df`) is only written when its producer
    /// computes, so a missing one forces the producer past its own cache.
    pub fn load(
        &mut self,
        key: TableKey,
        options: &StageOptions,
    ) -> Result<RecordBatch, AnalysisError> {
        if let Some(stage) = key.producer() {
            if options.overwrite {
                (stage.runner())(self, options)?;
            } else if let Some(batch) = self.lookup(key)? {
                return Ok(batch);
            } else if stage.output() == key {
                (stage.runner())(self, options)?;
            } else {
                let forced = options.clone().with_overwrite(true);
                (stage.runner())(self, &forced)?;
            }
        }
        self.lookup(key)?.ok_or_else(|| self.missing(key))
    }

    /// Bounds of the raw event table
    pub fn observation_window(&mut self) -> Result<ObservationWindow, AnalysisError> {
        if let Some(window) = self.window {
            return Ok(window);
        }
        let events: Vec<BinaryEvent> = self.require(TableKey::BinaryDf)?;
        let first = events.iter().map(|e| e.datetime).min();
        let last = events.iter().map(|e| e.datetime).max();
        let window = match (first, last) {
            (Some(first), Some(last)) => ObservationWindow { first, last },
            _ => return Err(AnalysisError::EmptyTable(TableKey::BinaryDf.to_string())),
        };
        self.window = Some(window);
        Ok(window)
    }

    /// Clock anchored at the first raw observation
    pub fn clock(&mut self) -> Result<PhaseClock, AnalysisError> {
        let window = self.observation_window()?;
        Ok(PhaseClock::new(self.config.phase, window.first))
    }

    fn lookup(&mut self, key: TableKey) -> Result<Option<RecordBatch>, AnalysisError> {
        if let Some(batch) = self.produced.get(&key) {
            return Ok(Some(batch.clone()));
        }
        let batch = self.store.read_batch(key.as_str())?;
        if let Some(batch) = &batch {
            self.produced.insert(key, batch.clone());
        }
        Ok(batch)
    }

    fn missing(&self, key: TableKey) -> AnalysisError {
        AnalysisError::MissingArtifact {
            table: key.to_string(),
            path: self.store.path(key.as_str()),
        }
    }
}

//! Shared fixtures for unit tests
//!
//! The sample project has three animals, two cages and one tunnel. Within the
//! first half minute of the light phase m1 and m2 leave cage_1 through the
//! tunnel, m2 entering 0.7 s after m1 (one chase), and all three end up in
//! cage_2.
//!
//! The dusk recording runs from 18:59:50 to 19:00:29, so it spans two hours
//! and two phase occurrences: m1 stays in cage_1, m2 in cage_2, and m3 moves
//! from cage_1 to cage_2 through the tunnel just after lights out.

use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::config::ProjectConfig;
use crate::registry::{AnalysisContext, TableKey};
use crate::store::ArtifactStore;
use crate::time::{PhaseBoundaries, PhaseClock};
use crate::types::{BinaryEvent, PaddedEvent};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

/// Instant `seconds` after the start of the recording
pub(crate) fn secs(seconds: f64) -> DateTime<Utc> {
    t0() + Duration::milliseconds((seconds * 1000.0).round() as i64)
}

pub(crate) fn sample_config(location: impl Into<PathBuf>) -> ProjectConfig {
    ProjectConfig {
        project_name: Some("fixture".to_string()),
        project_location: location.into(),
        animal_ids: vec!["m1".to_string(), "m2".to_string(), "m3".to_string()],
        cages: vec!["cage_1".to_string(), "cage_2".to_string()],
        tunnels: vec!["tunnel_1".to_string()],
        results_dir: PathBuf::from("results"),
        phase: PhaseBoundaries::new(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        ),
        tunnel_aliases: Default::default(),
        analysis: Default::default(),
    }
}

pub(crate) fn clock(config: &ProjectConfig) -> PhaseClock {
    PhaseClock::new(config.phase, t0())
}

pub(crate) fn padded_events(config: &ProjectConfig) -> Vec<PaddedEvent> {
    let clock = clock(config);
    let row = |animal: &str, position: &str, end: f64, spent: f64| {
        PaddedEvent::new(&clock, animal, position, secs(end), spent)
    };
    vec![
        row("m1", "cage_1", 10.0, 10.0),
        row("m1", "tunnel_1", 11.0, 1.0),
        row("m1", "cage_2", 30.0, 19.0),
        row("m2", "cage_1", 10.7, 10.7),
        row("m2", "tunnel_1", 11.5, 0.8),
        row("m2", "cage_2", 30.0, 18.5),
        row("m3", "cage_2", 30.0, 30.0),
    ]
}

pub(crate) fn binary_events(config: &ProjectConfig) -> Vec<BinaryEvent> {
    let clock = clock(config);
    let mut events = Vec::new();
    let mut occupy = |animal: &str, cage: &str, from: i64, to: i64| {
        for s in from..to {
            events.push(BinaryEvent::new(&clock, secs(s as f64), animal, cage));
        }
    };
    occupy("m1", "cage_1", 0, 10);
    occupy("m2", "cage_1", 0, 11);
    occupy("m1", "cage_2", 11, 30);
    occupy("m2", "cage_2", 12, 30);
    occupy("m3", "cage_2", 0, 30);
    events.sort_by(|a, b| a.datetime.cmp(&b.datetime));
    events
}

/// Start of the recording crossing the light/dark boundary
pub(crate) fn dusk() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 18, 59, 50).unwrap()
}

fn after_dusk(seconds: f64) -> DateTime<Utc> {
    dusk() + Duration::milliseconds((seconds * 1000.0).round() as i64)
}

fn dusk_padded_events(config: &ProjectConfig) -> Vec<PaddedEvent> {
    let clock = PhaseClock::new(config.phase, dusk());
    let row = |animal: &str, position: &str, end: f64, spent: f64| {
        PaddedEvent::new(&clock, animal, position, after_dusk(end), spent)
    };
    vec![
        row("m1", "cage_1", 40.0, 40.0),
        row("m2", "cage_2", 40.0, 40.0),
        row("m3", "cage_1", 8.0, 8.0),
        row("m3", "tunnel_1", 16.0, 8.0),
        row("m3", "cage_2", 40.0, 24.0),
    ]
}

fn dusk_binary_events(config: &ProjectConfig) -> Vec<BinaryEvent> {
    let clock = PhaseClock::new(config.phase, dusk());
    let mut events = Vec::new();
    let mut occupy = |animal: &str, cage: &str, from: i64, to: i64| {
        for s in from..to {
            events.push(BinaryEvent::new(&clock, after_dusk(s as f64), animal, cage));
        }
    };
    occupy("m1", "cage_1", 0, 40);
    occupy("m2", "cage_2", 0, 40);
    occupy("m3", "cage_1", 0, 8);
    occupy("m3", "cage_2", 16, 40);
    events.sort_by(|a, b| a.datetime.cmp(&b.datetime));
    events
}

type Tables<T> = fn(&ProjectConfig) -> Vec<T>;

/// Project directory on disk with both input tables written
pub(crate) struct ProjectFixture {
    _dir: TempDir,
    pub config: ProjectConfig,
}

impl ProjectFixture {
    pub fn new() -> Self {
        Self::with_inputs(binary_events, padded_events)
    }

    /// Recording spanning hours 18 and 19 and a light and a dark occurrence
    pub fn across_dusk() -> Self {
        Self::with_inputs(dusk_binary_events, dusk_padded_events)
    }

    fn with_inputs(binary: Tables<BinaryEvent>, padded: Tables<PaddedEvent>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(dir.path());
        let store = ArtifactStore::new(config.results_path());
        store
            .save(TableKey::BinaryDf.as_str(), &binary(&config))
            .unwrap();
        store
            .save(TableKey::PaddedDf.as_str(), &padded(&config))
            .unwrap();
        Self { _dir: dir, config }
    }

    pub fn context(&self) -> AnalysisContext {
        AnalysisContext::open(self.config.clone()).unwrap()
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.config.results_path())
    }
}

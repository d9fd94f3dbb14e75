//! Pipeline orchestration
//!
//! Runs every derived-table stage in dependency order and reports progress
//! after each one. The run is an iterator: each `next()` executes exactly one
//! stage, so dropping it between stages is how a caller stops a run.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::StageOptions;
use crate::error::AnalysisError;
use crate::registry::{AnalysisContext, Stage};
use crate::store::ProjectLock;
use crate::{ENGINE_VERSION, PRODUCER_NAME};

/// Fixed stage order; each stage only reads tables produced before it.
pub const PIPELINE: [Stage; 7] = [
    Stage::Activity,
    Stage::CageOccupancy,
    Stage::Chasings,
    Stage::Ranking,
    Stage::PairwiseMeetings,
    Stage::IncohortSociability,
    Stage::TimeAlone,
];

/// Name of the run manifest written next to the artifacts
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Progress report yielded after each completed stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageProgress {
    pub stage: Stage,
    pub completed: usize,
    pub total: usize,
    pub rows: usize,
    pub cache_hit: bool,
}

impl StageProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }
}

/// Outcome of one stage in the run manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub table: String,
    pub rows: usize,
    pub cache_hit: bool,
    pub elapsed_ms: u64,
}

/// Summary of a pipeline run, persisted as `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub producer: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub overwrite: bool,
    pub chasing_window: [f64; 2],
    pub minimum_time: f64,
    pub stages: Vec<StageRecord>,
}

impl RunManifest {
    fn new(options: &StageOptions) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            producer: PRODUCER_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            overwrite: options.overwrite,
            chasing_window: [
                options.chasing_window.min_seconds,
                options.chasing_window.max_seconds,
            ],
            minimum_time: options.minimum_time,
            stages: Vec::new(),
        }
    }
}

/// An in-progress pipeline run
pub struct PipelineRun<'a> {
    ctx: &'a mut AnalysisContext,
    options: StageOptions,
    next: usize,
    failed: bool,
    lock: Option<ProjectLock>,
    manifest: RunManifest,
}

impl PipelineRun<'_> {
    pub fn manifest(&self) -> &RunManifest {
        &self.manifest
    }

    /// Whether this run still holds the project lock
    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Path of the manifest written when a persisting run completes
    pub fn manifest_path(&self) -> PathBuf {
        self.ctx.store().root().join(MANIFEST_FILE_NAME)
    }

    fn run_stage(&mut self, stage: Stage) -> Result<StageProgress, AnalysisError> {
        let before = self.ctx.computations(stage.output());
        let started = Instant::now();
        let rows = (stage.runner())(self.ctx, &self.options)?;
        let cache_hit = self.ctx.computations(stage.output()) == before;

        self.next += 1;
        self.manifest.stages.push(StageRecord {
            stage: stage.name().to_string(),
            table: stage.output().to_string(),
            rows,
            cache_hit,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        info!(
            stage = %stage,
            completed = self.next,
            total = PIPELINE.len(),
            rows,
            cache_hit,
            "stage finished"
        );

        if self.next == PIPELINE.len() {
            self.finish()?;
        }
        Ok(StageProgress {
            stage,
            completed: self.next,
            total: PIPELINE.len(),
            rows,
            cache_hit,
        })
    }

    fn finish(&mut self) -> Result<(), AnalysisError> {
        self.manifest.finished_at = Some(Utc::now());
        if self.options.save {
            let path = self.manifest_path();
            fs::write(&path, serde_json::to_string_pretty(&self.manifest)?)?;
            info!(run_id = %self.manifest.run_id, path = %path.display(), "run manifest written");
        }
        self.lock = None;
        Ok(())
    }
}

impl Iterator for PipelineRun<'_> {
    type Item = Result<StageProgress, AnalysisError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= PIPELINE.len() {
            return None;
        }
        let stage = PIPELINE[self.next];
        match self.run_stage(stage) {
            Ok(progress) => Some(Ok(progress)),
            Err(e) => {
                error!(stage = %stage, error = %e, "stage failed; stopping pipeline");
                self.failed = true;
                self.lock = None;
                Some(Err(e))
            }
        }
    }
}

/// Start a pipeline run over every stage.
///
/// # Arguments
/// * `ctx` - Analysis context of the project
/// * `options` - Options applied to every stage
///
/// # Returns
/// An iterator yielding one progress report per completed stage. A
/// persisting run holds the project lock until it finishes, fails or is
/// dropped.
///
/// # Example
/// ```ignore
/// let mut ctx = AnalysisContext::open("/data/cohort-a")?;
/// for progress in run_pipeline(&mut ctx, StageOptions::default())? {
///     let progress = progress?;
///     println!("{} {}/{}", progress.stage, progress.completed, progress.total);
/// }
/// ```
pub fn run_pipeline(
    ctx: &mut AnalysisContext,
    options: StageOptions,
) -> Result<PipelineRun<'_>, AnalysisError> {
    options.validate()?;
    let lock = if options.save {
        Some(ctx.store().lock()?)
    } else {
        None
    };
    info!(stages = PIPELINE.len(), save = options.save, overwrite = options.overwrite, "pipeline started");

    let manifest = RunManifest::new(&options);
    Ok(PipelineRun {
        ctx,
        options,
        next: 0,
        failed: false,
        lock,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TableKey;
    use crate::store::LOCK_FILE_NAME;
    use crate::testing::ProjectFixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_progress_sequence() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();

        let progress: Vec<StageProgress> = run_pipeline(&mut ctx, StageOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let names: Vec<&str> = progress.iter().map(|p| p.stage.name()).collect();
        assert_eq!(
            names,
            vec![
                "activity",
                "cage_occupancy",
                "chasings",
                "ranking",
                "pairwise_meetings",
                "incohort_sociability",
                "time_alone",
            ]
        );
        for (i, p) in progress.iter().enumerate() {
            assert_eq!(p.completed, i + 1);
            assert_eq!(p.total, 7);
            assert!(!p.cache_hit);
        }
        assert_eq!(progress[6].percent(), 100.0);

        let store = fixture.store();
        for key in TableKey::ALL {
            assert!(store.exists(key.as_str()), "{} not written", key);
        }
        assert!(!store.root().join(LOCK_FILE_NAME).exists());

        let raw = fs::read_to_string(store.root().join(MANIFEST_FILE_NAME)).unwrap();
        let manifest: RunManifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(manifest.stages.len(), 7);
        assert!(manifest.finished_at.is_some());
    }

    #[test]
    fn test_tables_dense_across_hours_and_phases() {
        use crate::time::Phase;
        use crate::types::{PairwiseMeetingRow, TimeAloneRow};

        let fixture = ProjectFixture::across_dusk();
        let mut ctx = fixture.context();
        let options = StageOptions::default().with_save(false);
        for progress in run_pipeline(&mut ctx, options.clone()).unwrap() {
            progress.unwrap();
        }

        // Hours 18 and 19; light occurrence 1 and dark occurrence 2
        let (hours, occurrences, groups) = (2, 2, 2);
        let (animals, cages, positions) = (3, 2, 3);
        let (pairs, ordered_pairs) = (3, 6);
        let mut rows = |key: TableKey| ctx.load(key, &options).unwrap().num_rows();

        assert_eq!(rows(TableKey::PhaseDurations), occurrences);
        assert_eq!(rows(TableKey::CageOccupancy), hours * animals * cages);
        assert_eq!(rows(TableKey::ActivityDf), occurrences * animals * positions);
        assert_eq!(rows(TableKey::ChasingsDf), groups * ordered_pairs);
        assert_eq!(rows(TableKey::PairwiseMeetings), occurrences * pairs * positions);
        assert_eq!(rows(TableKey::IncohortSociability), occurrences * pairs);
        assert_eq!(rows(TableKey::TimeAlone), occurrences * animals * cages);
        // No chases, so the ranking is the initial snapshot
        assert_eq!(rows(TableKey::Ranking), animals);

        let alone: Vec<TimeAloneRow> = ctx.require(TableKey::TimeAlone).unwrap();
        let seconds = |phase: Phase, animal: &str, cage: &str| {
            alone
                .iter()
                .find(|r| r.phase == phase && r.animal_id == animal && r.cage == cage)
                .map(|r| r.time_alone)
                .unwrap()
        };
        assert_eq!(seconds(Phase::Light, "m2", "cage_2"), 10);
        assert_eq!(seconds(Phase::Dark, "m2", "cage_2"), 6);
        assert_eq!(seconds(Phase::Light, "m1", "cage_1"), 2);
        assert_eq!(seconds(Phase::Dark, "m1", "cage_1"), 30);

        let meetings: Vec<PairwiseMeetingRow> = ctx.require(TableKey::PairwiseMeetings).unwrap();
        let met: Vec<(Phase, &str, &str, &str, f64)> = meetings
            .iter()
            .filter(|r| r.pairwise_encounters > 0)
            .map(|r| {
                (
                    r.phase,
                    r.position.as_str(),
                    r.animal_id.as_str(),
                    r.animal_id_2.as_str(),
                    r.time_together,
                )
            })
            .collect();
        assert_eq!(met, vec![(Phase::Dark, "cage_2", "m2", "m3", 24.0)]);
    }

    #[test]
    fn test_second_run_hits_cache() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        for progress in run_pipeline(&mut ctx, StageOptions::default()).unwrap() {
            progress.unwrap();
        }

        let mut fresh = fixture.context();
        let progress: Vec<StageProgress> = run_pipeline(&mut fresh, StageOptions::default())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(progress.iter().all(|p| p.cache_hit));
        assert_eq!(fresh.computations(TableKey::Ranking), 0);
    }

    #[test]
    fn test_run_without_saving() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let options = StageOptions::default().with_save(false);

        let completed = run_pipeline(&mut ctx, options)
            .unwrap()
            .filter(|p| p.is_ok())
            .count();
        assert_eq!(completed, 7);

        let store = fixture.store();
        assert!(!store.exists("ranking"));
        assert!(!store.root().join(MANIFEST_FILE_NAME).exists());
    }

    #[test]
    fn test_locked_project_is_rejected() {
        let fixture = ProjectFixture::new();
        let _held = fixture.store().lock().unwrap();
        let mut ctx = fixture.context();

        assert!(matches!(
            run_pipeline(&mut ctx, StageOptions::default()),
            Err(AnalysisError::ProjectLocked(_))
        ));
    }

    #[test]
    fn test_stops_after_failed_stage() {
        let fixture = ProjectFixture::new();
        fs::remove_file(fixture.store().path("padded_df")).unwrap();
        let mut ctx = fixture.context();

        let mut run = run_pipeline(&mut ctx, StageOptions::default()).unwrap();
        assert!(matches!(
            run.next(),
            Some(Err(AnalysisError::MissingArtifact { .. }))
        ));
        assert!(run.next().is_none());
        assert!(!run.holds_lock());
        drop(run);

        assert!(!fixture.store().exists("cage_occupancy"));
        assert!(!fixture.store().root().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_invalid_options_fail_before_any_stage() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let options = StageOptions::default().with_minimum_time(f64::NAN);

        assert!(matches!(
            run_pipeline(&mut ctx, options),
            Err(AnalysisError::InvalidOption(_))
        ));
    }
}

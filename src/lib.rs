//! EcoHab analytics - batch engine for EcoHab antenna telemetry
//!
//! Turns the raw occupancy table (`binary_df`) and the padded dwell sequence
//! (`padded_df`) of a project into derived behavioral tables:
//! cage occupancy → activity → chasings → dominance ranking → pairwise
//! meetings → in-cohort sociability → time alone.
//!
//! ## Modules
//!
//! - **Time**: phase labels, day index and phase occurrence counter
//! - **Joins**: interval-overlap and lagged self-joins over the padded sequence
//! - **Rating**: Plackett–Luce ranking over chasing matches
//! - **Registry**: table keys, stage dispatch and the cache-aware context
//! - **Pipeline**: ordered run with per-stage progress
//!
//! ```ignore
//! use ecohab_analytics::{run_pipeline, AnalysisContext};
//!
//! let mut ctx = AnalysisContext::open("/data/cohort-a")?;
//! let options = ctx.default_options();
//! for progress in run_pipeline(&mut ctx, options)? {
//!     println!("{:?}", progress?);
//! }
//! ```

pub mod config;
pub mod error;
pub mod grid;
pub mod joins;
pub mod metrics;
pub mod pipeline;
pub mod rating;
pub mod registry;
pub mod store;
pub mod table;
pub mod time;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ChasingWindow, ConfigSource, ProjectConfig, StageOptions};
pub use error::AnalysisError;
pub use pipeline::{run_pipeline, PipelineRun, RunManifest, StageProgress, PIPELINE};
pub use rating::{PlackettLuce, RankingSeed, Rating, RatingLedger};
pub use registry::{AnalysisContext, Stage, TableKey};
pub use store::ArtifactStore;
pub use time::{Phase, PhaseBoundaries, PhaseClock};

/// Engine version recorded in run manifests
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in run manifests
pub const PRODUCER_NAME: &str = "ecohab-analytics";

//! Wall-clock duration of every phase occurrence in the run

use crate::config::StageOptions;
use crate::error::AnalysisError;
use crate::registry::{AnalysisContext, TableKey};
use crate::types::PhaseDurationRow;

pub fn calculate_phase_durations(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<PhaseDurationRow>, AnalysisError> {
    ctx.cached(TableKey::PhaseDurations, options, |ctx| {
        let window = ctx.observation_window()?;
        let clock = ctx.clock()?;
        Ok(clock
            .occurrences(window.last)
            .into_iter()
            .map(|occurrence| PhaseDurationRow {
                duration_seconds: occurrence.duration_seconds(),
                phase: occurrence.phase,
                phase_count: occurrence.phase_count,
                day: occurrence.day,
                start: occurrence.start,
                end: occurrence.end,
            })
            .collect())
    })
}

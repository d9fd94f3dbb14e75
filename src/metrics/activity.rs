//! Time and visits per position, per phase occurrence

use std::collections::HashMap;

use tracing::warn;

use crate::config::{ProjectConfig, StageOptions};
use crate::error::AnalysisError;
use crate::grid::{animal_position_grid, observed, GridDomain, PhaseKey};
use crate::registry::{AnalysisContext, TableKey};
use crate::types::{ActivityRow, PaddedEvent};

pub fn calculate_activity(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<ActivityRow>, AnalysisError> {
    ctx.cached(TableKey::ActivityDf, options, |ctx| {
        let padded: Vec<PaddedEvent> = ctx.require(TableKey::PaddedDf)?;
        Ok(activity_table(ctx.config(), &padded))
    })
}

fn activity_table(config: &ProjectConfig, padded: &[PaddedEvent]) -> Vec<ActivityRow> {
    let key_of = |row: &PaddedEvent| PhaseKey {
        phase: row.phase,
        day: row.day,
        phase_count: row.phase_count,
    };

    // Directional tunnel labels collapse onto the physical tunnel
    let mut totals: HashMap<(PhaseKey, &str, &str), (f64, i64)> = HashMap::new();
    for row in padded {
        let position = config.physical_position(&row.position);
        let entry = totals
            .entry((key_of(row), position, row.animal_id.as_str()))
            .or_default();
        entry.0 += row.time_spent;
        entry.1 += 1;
    }

    let grid = animal_position_grid(config, GridDomain::Positions);
    let mut rows = Vec::new();
    let mut matched = 0;
    for key in observed(padded, key_of) {
        for (animal, position) in &grid {
            let (time_in_position, visits_to_position) = totals
                .get(&(key, position.as_str(), animal.as_str()))
                .copied()
                .unwrap_or_default();
            matched += visits_to_position;
            rows.push(ActivityRow {
                phase: key.phase,
                day: key.day,
                phase_count: key.phase_count,
                position: position.clone(),
                animal_id: animal.clone(),
                time_in_position,
                visits_to_position,
            });
        }
    }

    let dropped = padded.len() as i64 - matched;
    if dropped > 0 {
        warn!(rows = dropped, "padded rows outside the configured animals or positions");
    }
    rows
}

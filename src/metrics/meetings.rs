//! Time spent together per animal pair and cage

use std::collections::HashMap;

use crate::config::{ProjectConfig, StageOptions};
use crate::error::AnalysisError;
use crate::grid::{observed, unordered_pairs, PhaseKey};
use crate::joins::{pairwise_overlaps, Meeting};
use crate::registry::{AnalysisContext, TableKey};
use crate::types::{PaddedEvent, PairwiseMeetingRow};

pub fn calculate_pairwise_meetings(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<PairwiseMeetingRow>, AnalysisError> {
    ctx.cached(TableKey::PairwiseMeetings, options, |ctx| {
        let padded: Vec<PaddedEvent> = ctx.require(TableKey::PaddedDf)?;
        let meetings = pairwise_overlaps(ctx.config(), &padded, options.minimum_time)?;
        Ok(meeting_table(ctx.config(), &padded, &meetings))
    })
}

fn meeting_table(
    config: &ProjectConfig,
    padded: &[PaddedEvent],
    meetings: &[Meeting],
) -> Vec<PairwiseMeetingRow> {
    let mut totals: HashMap<(PhaseKey, &str, &str, &str), (f64, i64)> = HashMap::new();
    for meeting in meetings {
        let entry = totals
            .entry((
                meeting.key,
                meeting.position.as_str(),
                meeting.animal_id.as_str(),
                meeting.animal_id_2.as_str(),
            ))
            .or_default();
        entry.0 += meeting.overlap;
        entry.1 += 1;
    }

    let keys = observed(padded, |row| PhaseKey {
        phase: row.phase,
        day: row.day,
        phase_count: row.phase_count,
    });
    let pairs = unordered_pairs(&config.animal_ids);
    let positions = config.positions();

    let mut rows = Vec::with_capacity(keys.len() * pairs.len() * positions.len());
    for key in keys {
        for (a, b) in &pairs {
            for position in &positions {
                let (time_together, pairwise_encounters) = totals
                    .get(&(key, position.as_str(), a.as_str(), b.as_str()))
                    .copied()
                    .unwrap_or_default();
                rows.push(PairwiseMeetingRow {
                    phase: key.phase,
                    day: key.day,
                    phase_count: key.phase_count,
                    position: position.clone(),
                    animal_id: a.clone(),
                    animal_id_2: b.clone(),
                    time_together,
                    pairwise_encounters,
                });
            }
        }
    }
    rows
}

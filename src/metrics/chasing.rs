//! Chasing counts per ordered pair, plus the match stream fed to ranking

use std::collections::HashMap;

use tracing::info;

use crate::config::{ProjectConfig, StageOptions};
use crate::error::AnalysisError;
use crate::grid::{observed, ordered_pairs, PhaseKey};
use crate::joins::{detect_chases, Chase};
use crate::registry::{AnalysisContext, TableKey};
use crate::types::{ChasingRow, MatchRow, PaddedEvent};

/// Detect chases and write both `chasings_df` and `match_df`.
pub fn calculate_chasings(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<ChasingRow>, AnalysisError> {
    ctx.cached(TableKey::ChasingsDf, options, |ctx| {
        let padded: Vec<PaddedEvent> = ctx.require(TableKey::PaddedDf)?;
        let chases = detect_chases(ctx.config(), &padded, options.chasing_window);
        info!(chases = chases.len(), "chasing events detected");

        let matches: Vec<MatchRow> = chases
            .iter()
            .map(|chase| MatchRow {
                loser: chase.chased.clone(),
                winner: chase.chaser.clone(),
                datetime: chase.at,
            })
            .collect();
        ctx.publish(TableKey::MatchDf, &matches, options.save)?;

        Ok(chasing_table(ctx.config(), &padded, &chases))
    })
}

fn chasing_table(config: &ProjectConfig, padded: &[PaddedEvent], chases: &[Chase]) -> Vec<ChasingRow> {
    let mut counts: HashMap<(PhaseKey, u32, &str, &str), i64> = HashMap::new();
    for chase in chases {
        *counts
            .entry((chase.key, chase.hour, chase.chaser.as_str(), chase.chased.as_str()))
            .or_default() += 1;
    }

    let groups = observed(padded, |row| {
        (
            PhaseKey {
                phase: row.phase,
                day: row.day,
                phase_count: row.phase_count,
            },
            row.hour(),
        )
    });
    let pairs = ordered_pairs(&config.animal_ids);

    let mut rows = Vec::with_capacity(groups.len() * pairs.len());
    for (key, hour) in groups {
        for (chaser, chased) in &pairs {
            rows.push(ChasingRow {
                phase: key.phase,
                day: key.day,
                phase_count: key.phase_count,
                hour,
                chaser: chaser.clone(),
                chased: chased.clone(),
                chasings: counts
                    .get(&(key, hour, chaser.as_str(), chased.as_str()))
                    .copied()
                    .unwrap_or(0),
            });
        }
    }
    rows
}

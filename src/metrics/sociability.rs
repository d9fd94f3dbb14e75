//! In-cohort sociability
//!
//! For a pair (a, b) and a phase occurrence of duration D:
//!
//! ```text
//! proportion_together = sum over positions of time_together / D
//! chance              = sum over positions of t_a * t_b / D^2
//! sociability         = proportion_together - chance
//! ```
//!
//! where `t_x` is the time animal x spent at the position during the
//! occurrence. Positions are the cages followed by the physical tunnels;
//! meetings only happen in cages, but tunnel dwell still adds to chance.

use std::collections::HashMap;

use crate::config::{ProjectConfig, StageOptions};
use crate::error::AnalysisError;
use crate::grid::unordered_pairs;
use crate::metrics::phase_durations::calculate_phase_durations;
use crate::registry::{AnalysisContext, TableKey};
use crate::time::Phase;
use crate::types::{ActivityRow, IncohortSociabilityRow, PairwiseMeetingRow, PhaseDurationRow};

pub fn calculate_incohort_sociability(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<IncohortSociabilityRow>, AnalysisError> {
    ctx.cached(TableKey::IncohortSociability, options, |ctx| {
        let durations = calculate_phase_durations(ctx, options)?;
        let meetings: Vec<PairwiseMeetingRow> = ctx.require(TableKey::PairwiseMeetings)?;
        let activity: Vec<ActivityRow> = ctx.require(TableKey::ActivityDf)?;
        Ok(sociability_table(ctx.config(), &durations, &meetings, &activity))
    })
}

/// Occurrences are identified by label and counter; day columns are summed over.
type Occurrence = (Phase, i64);

fn sociability_table(
    config: &ProjectConfig,
    durations: &[PhaseDurationRow],
    meetings: &[PairwiseMeetingRow],
    activity: &[ActivityRow],
) -> Vec<IncohortSociabilityRow> {
    let mut together: HashMap<(Occurrence, &str, &str), f64> = HashMap::new();
    for row in meetings {
        *together
            .entry((
                (row.phase, row.phase_count),
                row.animal_id.as_str(),
                row.animal_id_2.as_str(),
            ))
            .or_default() += row.time_together;
    }

    let mut in_position: HashMap<(Occurrence, &str, &str), f64> = HashMap::new();
    for row in activity {
        *in_position
            .entry((
                (row.phase, row.phase_count),
                row.position.as_str(),
                row.animal_id.as_str(),
            ))
            .or_default() += row.time_in_position;
    }

    let positions = config.positions();
    let pairs = unordered_pairs(&config.animal_ids);
    let mut rows = Vec::with_capacity(durations.len() * pairs.len());
    for occurrence in durations {
        let id = (occurrence.phase, occurrence.phase_count);
        let duration = occurrence.duration_seconds;

        for (a, b) in &pairs {
            let (proportion_together, sociability) = if duration > 0.0 {
                let observed = together
                    .get(&(id, a.as_str(), b.as_str()))
                    .copied()
                    .unwrap_or(0.0)
                    / duration;
                let chance: f64 = positions
                    .iter()
                    .map(|position| {
                        let t = |animal: &str| {
                            in_position
                                .get(&(id, position.as_str(), animal))
                                .copied()
                                .unwrap_or(0.0)
                        };
                        t(a) * t(b)
                    })
                    .sum::<f64>()
                    / (duration * duration);
                (observed, observed - chance)
            } else {
                (0.0, 0.0)
            };

            rows.push(IncohortSociabilityRow {
                phase: occurrence.phase,
                day: occurrence.day,
                phase_count: occurrence.phase_count,
                animal_id: a.clone(),
                animal_id_2: b.clone(),
                proportion_together,
                sociability,
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{calculate_activity, calculate_pairwise_meetings};
    use crate::testing::ProjectFixture;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sociability_from_fixture() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let options = StageOptions::default();
        calculate_activity(&mut ctx, &options).unwrap();
        calculate_pairwise_meetings(&mut ctx, &options).unwrap();
        let rows = calculate_incohort_sociability(&mut ctx, &options).unwrap();

        // One phase occurrence, three pairs
        assert_eq!(rows.len(), 3);
        let m1_m2 = rows
            .iter()
            .find(|r| r.animal_id == "m1" && r.animal_id_2 == "m2")
            .unwrap();

        // m1 and m2 also spent 1.0 s and 0.8 s in tunnel_1
        let duration = 29.0;
        let proportion = (10.0 + 18.5) / duration;
        let chance = (10.0 * 10.7 + 19.0 * 18.5 + 1.0 * 0.8) / (duration * duration);
        assert!(close(m1_m2.proportion_together, proportion));
        assert!(close(m1_m2.sociability, proportion - chance));

        // Phase durations are computed on demand
        assert_eq!(ctx.computations(TableKey::PhaseDurations), 1);
    }

    #[test]
    fn test_tunnel_time_counts_towards_chance() {
        let config = crate::testing::sample_config("/tmp/unused");
        let durations = vec![PhaseDurationRow {
            phase: Phase::Light,
            phase_count: 1,
            day: 0,
            start: crate::testing::t0(),
            end: crate::testing::secs(100.0),
            duration_seconds: 100.0,
        }];
        let in_position = |animal: &str, position: &str, seconds: f64| ActivityRow {
            phase: Phase::Light,
            day: 0,
            phase_count: 1,
            position: position.to_string(),
            animal_id: animal.to_string(),
            time_in_position: seconds,
            visits_to_position: 1,
        };
        let activity = vec![
            in_position("m1", "tunnel_1", 20.0),
            in_position("m2", "tunnel_1", 30.0),
            in_position("m1", "cage_1", 80.0),
            in_position("m2", "cage_2", 70.0),
        ];
        let rows = sociability_table(&config, &durations, &[], &activity);

        let m1_m2 = rows
            .iter()
            .find(|r| r.animal_id == "m1" && r.animal_id_2 == "m2")
            .unwrap();
        // Never in the same cage, so only the shared tunnel time is chance
        assert_eq!(m1_m2.proportion_together, 0.0);
        assert!(close(m1_m2.sociability, -(20.0 * 30.0) / (100.0 * 100.0)));
    }

    #[test]
    fn test_zero_duration_occurrence() {
        let config = crate::testing::sample_config("/tmp/unused");
        let durations = vec![PhaseDurationRow {
            phase: Phase::Light,
            phase_count: 1,
            day: 0,
            start: crate::testing::t0(),
            end: crate::testing::t0(),
            duration_seconds: 0.0,
        }];
        let rows = sociability_table(&config, &durations, &[], &[]);

        assert_eq!(rows.len(), 3);
        assert!(rows
            .iter()
            .all(|r| r.proportion_together == 0.0 && r.sociability == 0.0));
    }

    #[test]
    fn test_requires_meetings() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        calculate_activity(&mut ctx, &StageOptions::default()).unwrap();
        let err = calculate_incohort_sociability(&mut ctx, &StageOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingArtifact { .. }));
    }
}

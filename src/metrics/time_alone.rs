//! Seconds each animal was the only occupant of a cage

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::config::{ProjectConfig, StageOptions};
use crate::error::AnalysisError;
use crate::grid::{animal_position_grid, observed, GridDomain, PhaseKey};
use crate::registry::{AnalysisContext, TableKey};
use crate::time::PhaseClock;
use crate::types::{BinaryEvent, TimeAloneRow};

pub fn calculate_time_alone(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<TimeAloneRow>, AnalysisError> {
    ctx.cached(TableKey::TimeAlone, options, |ctx| {
        let events: Vec<BinaryEvent> = ctx.require(TableKey::BinaryDf)?;
        let clock = ctx.clock()?;
        Ok(time_alone_table(ctx.config(), &clock, &events))
    })
}

fn time_alone_table(
    config: &ProjectConfig,
    clock: &PhaseClock,
    events: &[BinaryEvent],
) -> Vec<TimeAloneRow> {
    let key_of = |at: DateTime<Utc>| PhaseKey {
        phase: clock.phase(at),
        day: clock.day(at),
        phase_count: clock.phase_count(at),
    };

    let mut occupants: BTreeMap<(DateTime<Utc>, &str), (usize, &str)> = BTreeMap::new();
    for event in events {
        let slot = occupants
            .entry((event.datetime, event.cage.as_str()))
            .or_insert((0, event.animal_id.as_str()));
        slot.0 += 1;
    }

    let mut alone: HashMap<(PhaseKey, &str, &str), i64> = HashMap::new();
    for ((at, cage), (count, animal)) in occupants {
        if count == 1 {
            *alone.entry((key_of(at), animal, cage)).or_default() += 1;
        }
    }

    let grid = animal_position_grid(config, GridDomain::Cages);
    let mut rows = Vec::new();
    for key in observed(events, |event| key_of(event.datetime)) {
        for (animal, cage) in &grid {
            rows.push(TimeAloneRow {
                phase: key.phase,
                day: key.day,
                phase_count: key.phase_count,
                animal_id: animal.clone(),
                cage: cage.clone(),
                time_alone: alone
                    .get(&(key, animal.as_str(), cage.as_str()))
                    .copied()
                    .unwrap_or(0),
            });
        }
    }
    rows
}

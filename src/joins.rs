//! Temporal-join engine
//!
//! Both joins are self-joins of the padded sequence scoped to a coarse time
//! group, which bounds the quadratic pairing to rows that can possibly match:
//!
//! - meetings: cage dwell intervals of two animals overlapping by more than a
//!   minimum duration, grouped by phase occurrence and cage
//! - chases: an animal entering a tunnel from a cage shortly after another
//!   animal arrived in the same tunnel, grouped by phase occurrence and hour

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::{ChasingWindow, ProjectConfig};
use crate::error::AnalysisError;
use crate::grid::PhaseKey;
use crate::rating::round3;
use crate::types::PaddedEvent;

/// A padded row paired with the same animal's preceding row
#[derive(Debug, Clone, Copy)]
pub struct Lagged<'a> {
    pub row: &'a PaddedEvent,
    pub previous: Option<&'a PaddedEvent>,
}

/// Pair every row with its predecessor for the same animal.
///
/// Rows are ordered by animal then time; ties keep input order.
pub fn lag_by_animal(rows: &[PaddedEvent]) -> Vec<Lagged<'_>> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        rows[a]
            .animal_id
            .cmp(&rows[b].animal_id)
            .then(rows[a].datetime.cmp(&rows[b].datetime))
    });

    order
        .iter()
        .enumerate()
        .map(|(n, &i)| {
            let previous = n
                .checked_sub(1)
                .map(|p| &rows[order[p]])
                .filter(|prev| prev.animal_id == rows[i].animal_id);
            Lagged {
                row: &rows[i],
                previous,
            }
        })
        .collect()
}

/// Seconds two closed intervals share, rounded to milliseconds.
/// Negative when they are disjoint.
pub fn overlap_seconds(
    a: (DateTime<Utc>, DateTime<Utc>),
    b: (DateTime<Utc>, DateTime<Utc>),
) -> f64 {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    round3((end - start).num_milliseconds() as f64 / 1000.0)
}

fn phase_key(row: &PaddedEvent) -> PhaseKey {
    PhaseKey {
        phase: row.phase,
        day: row.day,
        phase_count: row.phase_count,
    }
}

/// One qualifying overlap of two animals in the same cage
#[derive(Debug, Clone, PartialEq)]
pub struct Meeting {
    pub key: PhaseKey,
    pub position: String,
    /// Earlier animal in configuration order
    pub animal_id: String,
    pub animal_id_2: String,
    pub overlap: f64,
}

/// Every overlap of cage dwell intervals strictly longer than `minimum_time`.
///
/// Each unordered pair is emitted once, with the animals in configuration
/// order. Rows of unknown animals never pair.
pub fn pairwise_overlaps(
    config: &ProjectConfig,
    rows: &[PaddedEvent],
    minimum_time: f64,
) -> Result<Vec<Meeting>, AnalysisError> {
    type Member<'a> = (usize, &'a PaddedEvent, DateTime<Utc>);
    let mut groups: BTreeMap<(PhaseKey, &str), Vec<Member<'_>>> = BTreeMap::new();
    for row in rows.iter().filter(|r| config.is_cage(&r.position)) {
        if let Some(index) = config.animal_index(&row.animal_id) {
            groups
                .entry((phase_key(row), row.position.as_str()))
                .or_default()
                .push((index, row, row.start()?));
        }
    }

    let mut meetings = Vec::new();
    for ((key, position), members) in &groups {
        for &(ia, a, a_start) in members {
            for &(ib, b, b_start) in members {
                if ia >= ib {
                    continue;
                }
                let overlap = overlap_seconds((a_start, a.datetime), (b_start, b.datetime));
                if overlap > minimum_time {
                    meetings.push(Meeting {
                        key: *key,
                        position: position.to_string(),
                        animal_id: a.animal_id.clone(),
                        animal_id_2: b.animal_id.clone(),
                        overlap,
                    });
                }
            }
        }
    }
    Ok(meetings)
}

/// One animal following another into a tunnel
#[derive(Debug, Clone, PartialEq)]
pub struct Chase {
    pub key: PhaseKey,
    pub hour: u32,
    pub chaser: String,
    pub chased: String,
    /// When the chaser entered the tunnel
    pub at: DateTime<Utc>,
}

/// Detect chases in the padded sequence.
///
/// Row A (the chased animal, in a tunnel) and row B (the chaser) of the same
/// phase occurrence and hour form a chase when they are different animals at
/// the same tunnel label, B came into the tunnel from a cage, A's arrival
/// falls strictly inside `window` after B's tunnel entry, and A's arrival
/// precedes B's. Results are ordered by chase time.
pub fn detect_chases(
    config: &ProjectConfig,
    rows: &[PaddedEvent],
    window: ChasingWindow,
) -> Vec<Chase> {
    type Group<'a> = (Vec<&'a PaddedEvent>, Vec<Lagged<'a>>);
    let mut groups: BTreeMap<(PhaseKey, u32), Group<'_>> = BTreeMap::new();

    for row in rows.iter().filter(|r| config.is_tunnel(&r.position)) {
        groups
            .entry((phase_key(row), row.hour()))
            .or_default()
            .0
            .push(row);
    }
    for lagged in lag_by_animal(rows) {
        if let Some(group) = groups.get_mut(&(phase_key(lagged.row), lagged.row.hour())) {
            group.1.push(lagged);
        }
    }

    let mut chases = Vec::new();
    for ((key, hour), (chased, chasing)) in &groups {
        for a in chased {
            for b in chasing {
                let Some(previous) = b.previous else {
                    continue;
                };
                if a.animal_id == b.row.animal_id
                    || a.position != b.row.position
                    || !config.is_cage(&previous.position)
                    || a.datetime >= b.row.datetime
                {
                    continue;
                }
                let lead = (a.datetime - previous.datetime).num_milliseconds() as f64 / 1000.0;
                if window.contains(lead) {
                    chases.push(Chase {
                        key: *key,
                        hour: *hour,
                        chaser: b.row.animal_id.clone(),
                        chased: a.animal_id.clone(),
                        at: previous.datetime,
                    });
                }
            }
        }
    }
    chases.sort_by(|x, y| x.at.cmp(&y.at));
    chases
}

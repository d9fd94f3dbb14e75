//! Position grid builder
//!
//! Derived tables are left-joined against the full cross product of their key
//! domains so that every combination appears, with zero metrics where nothing
//! was observed.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::config::ProjectConfig;
use crate::time::{truncate_to_hour, Phase, PhaseClock};

/// Location domain of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridDomain {
    Cages,
    Positions,
}

/// One hourly time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourBucket {
    pub day: i64,
    pub hour: u32,
}

/// Phase occurrence key shared by most derived tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhaseKey {
    pub phase: Phase,
    pub day: i64,
    pub phase_count: i64,
}

/// Every (animal, location) combination, animals outermost.
pub fn animal_position_grid(config: &ProjectConfig, domain: GridDomain) -> Vec<(String, String)> {
    let locations = match domain {
        GridDomain::Cages => config.cages.clone(),
        GridDomain::Positions => config.positions(),
    };
    config
        .animal_ids
        .iter()
        .flat_map(|animal| {
            locations
                .iter()
                .map(move |location| (animal.clone(), location.clone()))
        })
        .collect()
}

/// Hour buckets from `first` to `last`, both truncated to the hour, inclusive.
pub fn hour_buckets(clock: &PhaseClock, first: DateTime<Utc>, last: DateTime<Utc>) -> Vec<HourBucket> {
    let mut buckets = Vec::new();
    let end = truncate_to_hour(last);
    let mut current = truncate_to_hour(first);
    while current <= end {
        buckets.push(HourBucket {
            day: clock.day(current),
            hour: clock.hour(current),
        });
        current += Duration::hours(1);
    }
    buckets
}

/// Unordered animal pairs in configuration order, no self-pairs.
pub fn unordered_pairs(animal_ids: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (i, a) in animal_ids.iter().enumerate() {
        for b in &animal_ids[i + 1..] {
            pairs.push((a.clone(), b.clone()));
        }
    }
    pairs
}

/// Ordered animal pairs, no self-pairs.
pub fn ordered_pairs(animal_ids: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for a in animal_ids {
        for b in animal_ids {
            if a != b {
                pairs.push((a.clone(), b.clone()));
            }
        }
    }
    pairs
}

/// Distinct keys observed in a table, sorted.
pub fn observed<K: Ord + Copy, T>(rows: &[T], key: impl Fn(&T) -> K) -> Vec<K> {
    rows.iter()
        .map(key)
        .collect::<BTreeSet<K>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_config;
    use crate::time::PhaseBoundaries;
    use chrono::{NaiveTime, TimeZone};

    #[test]
    fn test_animal_position_grid_sizes() {
        let config = sample_config("/tmp/unused");
        let cages = animal_position_grid(&config, GridDomain::Cages);
        let positions = animal_position_grid(&config, GridDomain::Positions);

        assert_eq!(cages.len(), config.animal_ids.len() * config.cages.len());
        assert_eq!(positions.len(), config.animal_ids.len() * config.positions().len());
        assert_eq!(cages[0], ("m1".to_string(), "cage_1".to_string()));
    }

    #[test]
    fn test_hour_buckets_cover_truncated_bounds() {
        let clock = PhaseClock::new(
            PhaseBoundaries::new(
                NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            ),
            Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap(),
        );
        let buckets = hour_buckets(
            &clock,
            Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 1, 5, 0).unwrap(),
        );

        assert_eq!(
            buckets,
            vec![
                HourBucket { day: 0, hour: 22 },
                HourBucket { day: 0, hour: 23 },
                HourBucket { day: 1, hour: 0 },
                HourBucket { day: 1, hour: 1 },
            ]
        );
    }

    #[test]
    fn test_pairs() {
        let ids: Vec<String> = ["m1", "m2", "m3"].iter().map(|s| s.to_string()).collect();
        let unordered = unordered_pairs(&ids);
        assert_eq!(unordered.len(), 3);
        assert!(unordered.iter().all(|(a, b)| a < b));

        let ordered = ordered_pairs(&ids);
        assert_eq!(ordered.len(), 6);
        assert!(ordered.iter().all(|(a, b)| a != b));
    }
}

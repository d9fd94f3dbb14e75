//! Seconds per animal per cage in every hour of the run

use std::collections::HashMap;

use tracing::warn;

use crate::config::{ProjectConfig, StageOptions};
use crate::error::AnalysisError;
use crate::grid::{animal_position_grid, hour_buckets, GridDomain};
use crate::registry::{AnalysisContext, ObservationWindow, TableKey};
use crate::time::PhaseClock;
use crate::types::{BinaryEvent, CageOccupancyRow};

pub fn calculate_cage_occupancy(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<CageOccupancyRow>, AnalysisError> {
    ctx.cached(TableKey::CageOccupancy, options, |ctx| {
        let events: Vec<BinaryEvent> = ctx.require(TableKey::BinaryDf)?;
        let window = ctx.observation_window()?;
        let clock = ctx.clock()?;
        Ok(occupancy_table(ctx.config(), &clock, window, &events))
    })
}

fn occupancy_table(
    config: &ProjectConfig,
    clock: &PhaseClock,
    window: ObservationWindow,
    events: &[BinaryEvent],
) -> Vec<CageOccupancyRow> {
    // Raw events have one-second resolution, so a row count is a duration
    let mut seconds: HashMap<(i64, u32, &str, &str), i64> = HashMap::new();
    for event in events {
        let key = (
            clock.day(event.datetime),
            clock.hour(event.datetime),
            event.cage.as_str(),
            event.animal_id.as_str(),
        );
        *seconds.entry(key).or_default() += 1;
    }

    let grid = animal_position_grid(config, GridDomain::Cages);
    let mut rows = Vec::new();
    let mut matched = 0;
    for bucket in hour_buckets(clock, window.first, window.last) {
        for (animal, cage) in &grid {
            let time_spent = seconds
                .get(&(bucket.day, bucket.hour, cage.as_str(), animal.as_str()))
                .copied()
                .unwrap_or(0);
            matched += time_spent;
            rows.push(CageOccupancyRow {
                day: bucket.day,
                hour: bucket.hour,
                cage: cage.clone(),
                animal_id: animal.clone(),
                time_spent,
            });
        }
    }

    let dropped = events.len() as i64 - matched;
    if dropped > 0 {
        warn!(rows = dropped, "binary events outside the configured animals or cages");
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ProjectFixture;

    #[test]
    fn test_dense_hourly_grid() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let rows = calculate_cage_occupancy(&mut ctx, &StageOptions::default()).unwrap();

        // One hour bucket, three animals, two cages
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.day == 0 && r.hour == 8));

        let get = |animal: &str, cage: &str| {
            rows.iter()
                .find(|r| r.animal_id == animal && r.cage == cage)
                .map(|r| r.time_spent)
        };
        assert_eq!(get("m1", "cage_1"), Some(10));
        assert_eq!(get("m2", "cage_1"), Some(11));
        assert_eq!(get("m2", "cage_2"), Some(18));
        assert_eq!(get("m3", "cage_2"), Some(30));
        assert_eq!(get("m3", "cage_1"), Some(0));
    }

    #[test]
    fn test_reads_upstream_column_encodings() {
        use arrow::array::ArrayRef;
        use arrow::compute::cast;
        use arrow::datatypes::{DataType, TimeUnit};
        use arrow::record_batch::RecordBatch;

        let fixture = ProjectFixture::new();
        let options = StageOptions::default().with_save(false);
        let expected = calculate_cage_occupancy(&mut fixture.context(), &options).unwrap();

        // Microsecond naive timestamps, 32-bit days and dictionary ids
        let store = fixture.store();
        let batch = store.read_batch("binary_df").unwrap().unwrap();
        let columns: Vec<(String, ArrayRef)> = batch
            .schema()
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| {
                let target = match field.name().as_str() {
                    "datetime" => DataType::Timestamp(TimeUnit::Microsecond, None),
                    "day" => DataType::Int32,
                    "animal_id" => DataType::Dictionary(
                        Box::new(DataType::Int32),
                        Box::new(DataType::Utf8),
                    ),
                    _ => array.data_type().clone(),
                };
                (field.name().clone(), cast(array, &target).unwrap())
            })
            .collect();
        let reencoded = RecordBatch::try_from_iter(columns).unwrap();
        assert_eq!(
            reencoded.schema().field_with_name("datetime").unwrap().data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        store.write_batch("binary_df", &reencoded).unwrap();

        let rows = calculate_cage_occupancy(&mut fixture.context(), &options).unwrap();
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_missing_binary_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx =
            AnalysisContext::open(crate::testing::sample_config(dir.path())).unwrap();
        let err = calculate_cage_occupancy(&mut ctx, &StageOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingArtifact { .. }));
    }
}

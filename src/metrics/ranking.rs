//! Dominance ranking replayed over the match stream

use tracing::warn;

use crate::config::StageOptions;
use crate::error::AnalysisError;
use crate::rating::{PlackettLuce, RatingLedger};
use crate::registry::{AnalysisContext, TableKey};
use crate::types::{MatchRow, RankingRow};

/// Rating history: one row per animal after every match.
///
/// With no matches the table holds the starting ratings, stamped with the
/// first observation of the run.
pub fn calculate_ranking(
    ctx: &mut AnalysisContext,
    options: &StageOptions,
) -> Result<Vec<RankingRow>, AnalysisError> {
    ctx.cached(TableKey::Ranking, options, |ctx| {
        let mut matches: Vec<MatchRow> = ctx.require(TableKey::MatchDf)?;
        matches.sort_by(|a, b| a.datetime.cmp(&b.datetime));
        let clock = ctx.clock()?;

        let mut ledger = RatingLedger::new(PlackettLuce::default(), &ctx.config().animal_ids);
        if let Some(seeds) = &options.prev_ranking {
            ledger.seed(seeds);
        }

        if matches.is_empty() {
            warn!("no matches to rank; reporting starting ratings");
            return Ok(ledger.snapshot(clock.origin(), &clock));
        }
        ledger.replay(&matches, &clock)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::calculate_chasings;
    use crate::rating::{RankingSeed, DEFAULT_MU};
    use crate::testing::{secs, ProjectFixture};

    #[test]
    fn test_single_match_history() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let options = StageOptions::default();
        calculate_chasings(&mut ctx, &options).unwrap();
        let rows = calculate_ranking(&mut ctx, &options).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.datetime == secs(10.7) && r.hour == 8));
        let ordinal = |animal: &str| rows.iter().find(|r| r.animal_id == animal).unwrap().ordinal;
        assert!(ordinal("m2") > ordinal("m3"));
        assert!(ordinal("m1") < ordinal("m3"));
    }

    #[test]
    fn test_empty_match_stream() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let options = StageOptions::default().with_chasing_window(0.5, 1.0);
        calculate_chasings(&mut ctx, &options).unwrap();
        let rows = calculate_ranking(&mut ctx, &options).unwrap();

        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.mu, DEFAULT_MU);
            assert_eq!(row.ordinal, 0.0);
            assert_eq!(row.datetime, secs(0.0));
        }
    }

    #[test]
    fn test_seeded_ranking() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let options = StageOptions::default()
            .with_save(false)
            .with_chasing_window(0.5, 1.0)
            .with_prev_ranking(vec![RankingSeed {
                animal_id: "m3".to_string(),
                mu: 30.0,
                sigma: 2.0,
            }]);
        calculate_chasings(&mut ctx, &options).unwrap();
        let rows = calculate_ranking(&mut ctx, &options).unwrap();

        let m3 = rows.iter().find(|r| r.animal_id == "m3").unwrap();
        assert_eq!(m3.mu, 30.0);
        assert_eq!(m3.ordinal, 24.0);
    }

    #[test]
    fn test_ranking_requires_matches() {
        let fixture = ProjectFixture::new();
        let mut ctx = fixture.context();
        let err = calculate_ranking(&mut ctx, &StageOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingArtifact { ref table, .. } if table == "match_df"));
    }
}

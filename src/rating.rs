//! Plackett–Luce rating engine
//!
//! Every chasing event is a match won by the chaser. Ratings are Bayesian
//! (mu, sigma) estimates updated one match at a time in chronological order;
//! the ordinal `mu - 3 sigma` is the dominance score reported per animal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AnalysisError;
use crate::time::PhaseClock;
use crate::types::{MatchRow, RankingRow};

pub const DEFAULT_MU: f64 = 25.0;
pub const DEFAULT_SIGMA: f64 = DEFAULT_MU / 3.0;

/// Number of standard deviations subtracted in the ordinal
const ORDINAL_Z: f64 = 3.0;

/// Skill estimate of one animal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub mu: f64,
    pub sigma: f64,
}

impl Rating {
    pub fn new(mu: f64, sigma: f64) -> Self {
        Self { mu, sigma }
    }

    /// Conservative skill estimate
    pub fn ordinal(&self) -> f64 {
        self.mu - ORDINAL_Z * self.sigma
    }
}

/// Round to three decimals, as reported in ranking tables.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Plackett–Luce model parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlackettLuce {
    pub mu: f64,
    pub sigma: f64,
    pub beta: f64,
    pub kappa: f64,
    /// Additive dynamics factor applied to sigma before each update
    pub tau: f64,
    /// Never let a match increase an animal's sigma
    pub limit_sigma: bool,
    /// Weight team members by their distance from the strongest member
    pub balance: bool,
}

impl Default for PlackettLuce {
    fn default() -> Self {
        Self {
            mu: DEFAULT_MU,
            sigma: DEFAULT_SIGMA,
            beta: DEFAULT_MU / 6.0,
            kappa: 0.0001,
            tau: DEFAULT_MU / 300.0,
            limit_sigma: true,
            balance: true,
        }
    }
}

struct TeamRating {
    mu: f64,
    sigma_sq: f64,
    rank: u32,
}

impl PlackettLuce {
    /// Prior rating for a new animal
    pub fn rating(&self) -> Rating {
        Rating::new(self.mu, self.sigma)
    }

    /// Rate one game. `ranks[i]` is the finishing place of `teams[i]`;
    /// lower is better and equal values are ties.
    pub fn rate(&self, teams: &[Vec<Rating>], ranks: &[u32]) -> Result<Vec<Vec<Rating>>, AnalysisError> {
        if teams.len() != ranks.len() {
            return Err(AnalysisError::InvalidOption(format!(
                "{} teams but {} ranks",
                teams.len(),
                ranks.len()
            )));
        }
        if teams.iter().any(|team| team.is_empty()) {
            return Err(AnalysisError::InvalidOption("empty team".to_string()));
        }

        let inflated: Vec<Vec<Rating>> = teams
            .iter()
            .map(|team| {
                team.iter()
                    .map(|r| Rating::new(r.mu, (r.sigma * r.sigma + self.tau * self.tau).sqrt()))
                    .collect()
            })
            .collect();

        let team_ratings: Vec<TeamRating> = inflated
            .iter()
            .zip(ranks)
            .map(|(team, &rank)| self.team_rating(team, rank))
            .collect();

        let c = team_ratings
            .iter()
            .map(|t| t.sigma_sq + self.beta * self.beta)
            .sum::<f64>()
            .sqrt();

        let sum_q: Vec<f64> = team_ratings
            .iter()
            .map(|q| {
                team_ratings
                    .iter()
                    .filter(|i| i.rank >= q.rank)
                    .map(|i| (i.mu / c).exp())
                    .sum()
            })
            .collect();

        let ties: Vec<f64> = team_ratings
            .iter()
            .map(|q| team_ratings.iter().filter(|i| i.rank == q.rank).count() as f64)
            .collect();

        let mut rated = Vec::with_capacity(teams.len());
        for (i, team_i) in team_ratings.iter().enumerate() {
            let strength = (team_i.mu / c).exp();
            let mut omega = 0.0;
            let mut delta = 0.0;

            for (q, team_q) in team_ratings.iter().enumerate() {
                if team_q.rank > team_i.rank {
                    continue;
                }
                let quotient = strength / sum_q[q];
                delta += quotient * (1.0 - quotient) / ties[q];
                if q == i {
                    omega += (1.0 - quotient) / ties[q];
                } else {
                    omega -= quotient / ties[q];
                }
            }

            omega *= team_i.sigma_sq / c;
            let gamma = team_i.sigma_sq.sqrt() / c;
            delta *= gamma * team_i.sigma_sq / (c * c);

            let updated: Vec<Rating> = inflated[i]
                .iter()
                .zip(&teams[i])
                .map(|(player, original)| {
                    let share = player.sigma * player.sigma / team_i.sigma_sq;
                    let mu = player.mu + share * omega;
                    let mut sigma =
                        player.sigma * (1.0 - share * delta).max(self.kappa).sqrt();
                    if self.limit_sigma {
                        sigma = sigma.min(original.sigma);
                    }
                    Rating::new(mu, sigma)
                })
                .collect();
            rated.push(updated);
        }
        Ok(rated)
    }

    /// One-versus-one match; returns the updated (winner, loser).
    pub fn rate_match(&self, winner: Rating, loser: Rating) -> Result<(Rating, Rating), AnalysisError> {
        let rated = self.rate(&[vec![loser], vec![winner]], &[1, 0])?;
        Ok((rated[1][0], rated[0][0]))
    }

    fn team_rating(&self, team: &[Rating], rank: u32) -> TeamRating {
        let max_ordinal = team
            .iter()
            .map(Rating::ordinal)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut mu = 0.0;
        let mut sigma_sq = 0.0;
        for player in team {
            let weight = if self.balance && team.len() > 1 {
                1.0 + (max_ordinal - player.ordinal()) / (max_ordinal + self.kappa)
            } else {
                1.0
            };
            mu += player.mu * weight;
            sigma_sq += (player.sigma * weight).powi(2);
        }
        TeamRating { mu, sigma_sq, rank }
    }
}

/// Rating carried over from a previous recording of the same animals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSeed {
    pub animal_id: String,
    pub mu: f64,
    pub sigma: f64,
}

impl RankingSeed {
    /// Last rating of every animal in a ranking history.
    pub fn from_history(rows: &[RankingRow]) -> Vec<Self> {
        let mut order: Vec<&str> = Vec::new();
        let mut last: HashMap<&str, &RankingRow> = HashMap::new();
        for row in rows {
            let key = row.animal_id.as_str();
            let newer = last
                .get(key)
                .map_or(true, |seen| row.datetime >= seen.datetime);
            if !last.contains_key(key) {
                order.push(key);
            }
            if newer {
                last.insert(key, row);
            }
        }

        order
            .into_iter()
            .filter_map(|animal| last.get(animal))
            .map(|row| RankingSeed {
                animal_id: row.animal_id.clone(),
                mu: row.mu,
                sigma: row.sigma,
            })
            .collect()
    }
}

/// Current rating of every configured animal, advanced match by match
#[derive(Debug, Clone)]
pub struct RatingLedger {
    model: PlackettLuce,
    animals: Vec<String>,
    ratings: Vec<Rating>,
    last_match: Option<DateTime<Utc>>,
}

impl RatingLedger {
    pub fn new(model: PlackettLuce, animal_ids: &[String]) -> Self {
        Self {
            model,
            animals: animal_ids.to_vec(),
            ratings: vec![model.rating(); animal_ids.len()],
            last_match: None,
        }
    }

    /// Replace priors with carried-over ratings.
    pub fn seed(&mut self, seeds: &[RankingSeed]) {
        for seed in seeds {
            match self.index(&seed.animal_id) {
                Some(i) => self.ratings[i] = Rating::new(seed.mu, seed.sigma),
                None => warn!(animal = %seed.animal_id, "ignoring seed for unknown animal"),
            }
        }
    }

    pub fn rating(&self, animal_id: &str) -> Option<Rating> {
        self.index(animal_id).map(|i| self.ratings[i])
    }

    /// Ratings of all animals in configuration order
    pub fn ratings(&self) -> impl Iterator<Item = (&str, Rating)> {
        self.animals
            .iter()
            .map(String::as_str)
            .zip(self.ratings.iter().copied())
    }

    /// Apply one match. Matches must arrive in non-decreasing time order.
    pub fn apply(&mut self, game: &MatchRow) -> Result<(), AnalysisError> {
        if let Some(previous) = self.last_match {
            if game.datetime < previous {
                return Err(AnalysisError::UnorderedMatches {
                    previous,
                    next: game.datetime,
                });
            }
        }

        let winner = self
            .index(&game.winner)
            .ok_or_else(|| AnalysisError::UnknownAnimal(game.winner.clone()))?;
        let loser = self
            .index(&game.loser)
            .ok_or_else(|| AnalysisError::UnknownAnimal(game.loser.clone()))?;
        if winner == loser {
            return Err(AnalysisError::InvalidOption(format!(
                "{} cannot win a match against itself",
                game.winner
            )));
        }

        let (won, lost) = self.model.rate_match(self.ratings[winner], self.ratings[loser])?;
        self.ratings[winner] = won;
        self.ratings[loser] = lost;
        self.last_match = Some(game.datetime);
        Ok(())
    }

    /// Apply every match and record a snapshot of all animals after each.
    pub fn replay(
        &mut self,
        matches: &[MatchRow],
        clock: &PhaseClock,
    ) -> Result<Vec<RankingRow>, AnalysisError> {
        let mut rows = Vec::with_capacity(matches.len() * self.animals.len());
        for game in matches {
            self.apply(game)?;
            rows.extend(self.snapshot(game.datetime, clock));
        }
        Ok(rows)
    }

    /// One ranking row per animal, tagged with `at`.
    pub fn snapshot(&self, at: DateTime<Utc>, clock: &PhaseClock) -> Vec<RankingRow> {
        self.ratings()
            .map(|(animal, rating)| RankingRow {
                animal_id: animal.to_string(),
                mu: rating.mu,
                sigma: rating.sigma,
                ordinal: round3(rating.ordinal()),
                datetime: at,
                phase: clock.phase(at),
                day: clock.day(at),
                hour: clock.hour(at),
            })
            .collect()
    }

    fn index(&self, animal_id: &str) -> Option<usize> {
        self.animals.iter().position(|a| a == animal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clock, sample_config, secs};

    fn ids() -> Vec<String> {
        vec!["m1".to_string(), "m2".to_string(), "m3".to_string()]
    }

    fn game(winner: &str, loser: &str, at: f64) -> MatchRow {
        MatchRow {
            loser: loser.to_string(),
            winner: winner.to_string(),
            datetime: secs(at),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_default_prior_ordinal_is_zero() {
        let rating = PlackettLuce::default().rating();
        assert_eq!(rating.mu, 25.0);
        assert!(close(rating.ordinal(), 0.0));
    }

    #[test]
    fn test_equal_priors_match() {
        let model = PlackettLuce::default();
        let (won, lost) = model.rate_match(model.rating(), model.rating()).unwrap();

        assert!(close(won.mu, 27.635));
        assert!(close(lost.mu, 22.365));
        assert!(won.sigma < DEFAULT_SIGMA);
        assert!(close(won.sigma, lost.sigma));
    }

    #[test]
    fn test_match_moves_only_the_two_players() {
        let config = sample_config("/tmp/unused");
        let clock = clock(&config);
        let mut ledger = RatingLedger::new(PlackettLuce::default(), &ids());

        let rows = ledger.replay(&[game("m2", "m1", 1.0)], &clock).unwrap();
        assert_eq!(rows.len(), 3);

        let by_animal: HashMap<&str, &RankingRow> =
            rows.iter().map(|r| (r.animal_id.as_str(), r)).collect();
        assert!(by_animal["m2"].ordinal > 0.0);
        assert!(by_animal["m1"].ordinal < 0.0);
        assert_eq!(by_animal["m3"].mu, DEFAULT_MU);
        assert_eq!(by_animal["m3"].sigma, DEFAULT_SIGMA);
    }

    #[test]
    fn test_order_of_matches_changes_ratings() {
        let config = sample_config("/tmp/unused");
        let clock = clock(&config);

        let mut forward = RatingLedger::new(PlackettLuce::default(), &ids());
        forward
            .replay(&[game("m1", "m2", 1.0), game("m2", "m3", 2.0)], &clock)
            .unwrap();

        let mut reversed = RatingLedger::new(PlackettLuce::default(), &ids());
        reversed
            .replay(&[game("m2", "m3", 1.0), game("m1", "m2", 2.0)], &clock)
            .unwrap();

        assert_ne!(forward.rating("m2"), reversed.rating("m2"));
    }

    #[test]
    fn test_unordered_matches_are_rejected() {
        let config = sample_config("/tmp/unused");
        let mut ledger = RatingLedger::new(PlackettLuce::default(), &ids());

        let result = ledger.replay(
            &[game("m1", "m2", 5.0), game("m2", "m3", 4.0)],
            &clock(&config),
        );
        assert!(matches!(result, Err(AnalysisError::UnorderedMatches { .. })));
    }

    #[test]
    fn test_unknown_animal_is_rejected() {
        let mut ledger = RatingLedger::new(PlackettLuce::default(), &ids());
        assert!(matches!(
            ledger.apply(&game("m9", "m1", 1.0)),
            Err(AnalysisError::UnknownAnimal(_))
        ));
    }

    #[test]
    fn test_seed_from_history_uses_last_row() {
        let config = sample_config("/tmp/unused");
        let clock = clock(&config);
        let mut ledger = RatingLedger::new(PlackettLuce::default(), &ids());
        let history = ledger
            .replay(&[game("m1", "m2", 1.0), game("m1", "m3", 2.0)], &clock)
            .unwrap();

        let seeds = RankingSeed::from_history(&history);
        assert_eq!(seeds.len(), 3);

        let mut seeded = RatingLedger::new(PlackettLuce::default(), &ids());
        seeded.seed(&seeds);
        seeded.seed(&[RankingSeed {
            animal_id: "m9".to_string(),
            mu: 1.0,
            sigma: 1.0,
        }]);
        assert_eq!(seeded.rating("m1"), ledger.rating("m1"));
        assert_eq!(seeded.rating("m3"), ledger.rating("m3"));
        assert_eq!(seeded.rating("m9"), None);
    }

    #[test]
    fn test_ties_share_the_update() {
        let model = PlackettLuce::default();
        let rated = model
            .rate(&[vec![model.rating()], vec![model.rating()]], &[0, 0])
            .unwrap();
        assert!(close(rated[0][0].mu, rated[1][0].mu));
    }
}

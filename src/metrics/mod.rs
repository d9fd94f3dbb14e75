//! Derived-table stages
//!
//! Each stage reads its upstream tables through the [`AnalysisContext`],
//! computes one densified table and hands it back through the context's
//! cache, which decides whether it is persisted.
//!
//! Stage order: activity → cage_occupancy → chasings → ranking →
//! pairwise_meetings → incohort_sociability → time_alone
//!
//! [`AnalysisContext`]: crate::registry::AnalysisContext

pub mod activity;
pub mod chasing;
pub mod meetings;
pub mod occupancy;
pub mod phase_durations;
pub mod ranking;
pub mod sociability;
pub mod time_alone;

pub use activity::calculate_activity;
pub use chasing::calculate_chasings;
pub use meetings::calculate_pairwise_meetings;
pub use occupancy::calculate_cage_occupancy;
pub use phase_durations::calculate_phase_durations;
pub use ranking::calculate_ranking;
pub use sociability::calculate_incohort_sociability;
pub use time_alone::calculate_time_alone;

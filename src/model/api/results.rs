use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, common::election::LifecycleState};
use crate::store::CountCorrection;

/// One candidate's line in an election's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: ApiId,
    pub name: String,
    pub party: String,
    /// Votes counted from the vote log.
    pub votes: u64,
    /// Competition rank: tied candidates share a rank and the next rank skips.
    pub rank: u32,
}

/// The results of an election, derived from its vote log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: ApiId,
    pub title: String,
    pub state: LifecycleState,
    pub total_votes: u64,
    /// Sorted by votes, most first; ties keep candidate creation order.
    pub candidates: Vec<CandidateTally>,
    /// `None` until the election is closed. Holds every candidate sharing the
    /// top count, so a tie lists several, and is empty if nobody voted.
    pub winners: Option<Vec<ApiId>>,
    /// Whether every cached counter agreed with the log at read time.
    pub counters_consistent: bool,
}

/// A counter repaired by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub candidate_id: ApiId,
    pub cached: u64,
    pub recounted: u64,
}

impl From<CountCorrection> for Correction {
    fn from(correction: CountCorrection) -> Self {
        Self {
            candidate_id: correction.candidate_id.into(),
            cached: correction.cached,
            recounted: correction.recounted,
        }
    }
}

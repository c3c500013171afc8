use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, db::vote::Vote};

/// A vote submission. The voter and election come from the token and path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: ApiId,
}

/// Proof of an admitted vote, returned to the voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub vote_id: ApiId,
    pub election_id: ApiId,
    pub candidate_id: ApiId,
    pub cast_at: DateTime<Utc>,
}

impl From<Vote> for VoteReceipt {
    fn from(vote: Vote) -> Self {
        Self {
            vote_id: vote.id.into(),
            election_id: vote.election_id.into(),
            candidate_id: vote.candidate_id.into(),
            cast_at: vote.cast_at,
        }
    }
}

/// Whether the requesting voter has voted in an election, and for whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStatus {
    pub voted: bool,
    pub candidate_id: Option<ApiId>,
    pub cast_at: Option<DateTime<Utc>>,
}

impl From<Option<Vote>> for VoteStatus {
    fn from(vote: Option<Vote>) -> Self {
        Self {
            voted: vote.is_some(),
            candidate_id: vote.as_ref().map(|v| v.candidate_id.into()),
            cast_at: vote.map(|v| v.cast_at),
        }
    }
}

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Party recorded for candidates that do not name one.
pub const INDEPENDENT: &str = "Independent";

/// Maximum length of a candidate description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    /// Foreign key: the owning election.
    pub election_id: Id,
    /// Candidate name, unique within the election.
    pub name: String,
    /// Party affiliation.
    pub party: String,
    /// Free-text description, at most [`MAX_DESCRIPTION_LEN`] characters.
    pub description: String,
    /// Optional photo reference (e.g. a URL).
    pub photo: Option<String>,
    /// Creation order within the election. Assigned by the store.
    pub seq: u64,
    /// Denormalized vote count. A cache of the vote log, never the truth.
    pub vote_count: u64,
    /// Bumped by the MongoDB store whenever the election's voting window
    /// changes, so that the window edit and any vote transaction for this
    /// candidate write the same document and cannot both commit.
    #[serde(default)]
    pub edit_epoch: u64,
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl CandidateCore {
        pub fn example(election_id: Id, name: &str) -> Self {
            Self {
                election_id,
                name: name.to_string(),
                party: INDEPENDENT.to_string(),
                description: format!("{name} for president!"),
                photo: None,
                seq: 0,
                vote_count: 0,
                edit_epoch: 0,
            }
        }
    }
}

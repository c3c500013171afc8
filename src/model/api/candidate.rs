use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, db::candidate::Candidate};

/// A candidate specification, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    /// Defaults to "Independent" when absent or blank.
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub photo: Option<String>,
}

/// An API-friendly candidate description. The cached vote counter is not
/// exposed here; counts are only published through election results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: ApiId,
    pub name: String,
    pub party: String,
    pub description: String,
    pub photo: Option<String>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            name: candidate.candidate.name,
            party: candidate.candidate.party,
            description: candidate.candidate.description,
            photo: candidate.candidate.photo,
        }
    }
}

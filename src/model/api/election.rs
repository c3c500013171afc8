use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::{candidate::CandidateDescription, id::ApiId},
    common::election::{LifecycleState, Schedule},
    db::{candidate::Candidate, election::Election},
};

fn enabled_by_default() -> bool {
    true
}

/// An election specification, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    /// Election title.
    pub title: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Voting opens.
    pub opens_at: DateTime<Utc>,
    /// Voting closes.
    pub closes_at: DateTime<Utc>,
    /// Whether the election is switched on.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl ElectionSpec {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            enabled: self.enabled,
            opens_at: self.opens_at,
            closes_at: self.closes_at,
        }
    }
}

/// A partial update to an election. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectionPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
    pub enabled: Option<bool>,
}

impl ElectionPatch {
    /// Apply this patch on top of the given election.
    pub fn apply_to(self, election: &mut Election) {
        if let Some(title) = self.title {
            election.title = title.trim().to_string();
        }
        if let Some(description) = self.description {
            election.description = description;
        }
        if let Some(opens_at) = self.opens_at {
            election.schedule.opens_at = opens_at;
        }
        if let Some(closes_at) = self.closes_at {
            election.schedule.closes_at = closes_at;
        }
        if let Some(enabled) = self.enabled {
            election.schedule.enabled = enabled;
        }
    }
}

/// A summary of an election, shorter than the full `ElectionDescription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSummary {
    pub id: ApiId,
    pub title: String,
    /// Lifecycle state at the time of the request.
    pub state: LifecycleState,
    pub enabled: bool,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

impl ElectionSummary {
    pub fn new(election: &Election, now: DateTime<Utc>) -> Self {
        Self {
            id: election.id.into(),
            title: election.title.clone(),
            state: election.lifecycle(now),
            enabled: election.schedule.enabled,
            opens_at: election.schedule.opens_at,
            closes_at: election.schedule.closes_at,
        }
    }
}

/// An API-friendly election description, including its candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    #[serde(flatten)]
    pub summary: ElectionSummary,
    pub description: String,
    /// Candidates in creation order.
    pub candidates: Vec<CandidateDescription>,
}

impl ElectionDescription {
    pub fn new(election: &Election, candidates: Vec<Candidate>, now: DateTime<Utc>) -> Self {
        Self {
            summary: ElectionSummary::new(election, now),
            description: election.description.clone(),
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::Duration;

    use super::*;

    impl ElectionSpec {
        pub fn current_example() -> Self {
            Self {
                title: "Club Treasurer".to_string(),
                description: "Pick who looks after the money.".to_string(),
                opens_at: Utc::now() - Duration::days(1),
                closes_at: Utc::now() + Duration::days(1),
                enabled: true,
            }
        }

        pub fn future_example() -> Self {
            Self {
                opens_at: Utc::now() + Duration::days(1),
                closes_at: Utc::now() + Duration::days(2),
                ..Self::current_example()
            }
        }

        pub fn past_example() -> Self {
            Self {
                opens_at: Utc::now() - Duration::days(2),
                closes_at: Utc::now() - Duration::days(1),
                ..Self::current_example()
            }
        }
    }
}

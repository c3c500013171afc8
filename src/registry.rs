//! Administration of elections and candidates.
//!
//! Validation happens here; the guards that depend on the vote log (no date
//! changes or deletions once votes exist) are enforced atomically by the
//! store.

use crate::error::{Entity, Error, Result};
use crate::model::{
    api::{
        candidate::CandidateSpec,
        election::{ElectionPatch, ElectionSpec},
    },
    common::election::Schedule,
    db::{
        candidate::{Candidate, NewCandidate, INDEPENDENT, MAX_DESCRIPTION_LEN},
        election::{Election, NewElection},
    },
    mongodb::Id,
};
use crate::store::VoteStore;

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::bad_request("Election title must not be empty"));
    }
    Ok(())
}

fn validate_schedule(schedule: &Schedule) -> Result<()> {
    if !schedule.is_well_formed() {
        return Err(Error::bad_request(format!(
            "Election must close after it opens ({} is not after {})",
            schedule.closes_at, schedule.opens_at
        )));
    }
    Ok(())
}

/// Create an election on behalf of the admin `creator`.
pub async fn create_election(store: &dyn VoteStore, spec: ElectionSpec, creator: Id) -> Result<Election> {
    validate_title(&spec.title)?;
    let schedule = spec.schedule();
    validate_schedule(&schedule)?;

    let election = store
        .insert_election(NewElection {
            title: spec.title.trim().to_string(),
            description: spec.description,
            schedule,
            created_by: creator,
        })
        .await?;
    info!("Created election {} ({})", election.id, election.title);
    Ok(election)
}

/// Apply a partial update to an election.
///
/// Title, description and the enabled flag may always change. The voting
/// window may not change once the election holds votes.
pub async fn update_election(store: &dyn VoteStore, id: Id, patch: ElectionPatch) -> Result<Election> {
    let mut election = store
        .election(id)
        .await?
        .ok_or(Error::NotFound(Entity::Election(id)))?;

    patch.apply_to(&mut election);
    validate_title(&election.title)?;
    validate_schedule(&election.schedule)?;

    store.update_election(&election).await?;
    info!("Updated election {id}");
    Ok(election)
}

/// Delete an election and its candidates. Refused once it holds votes.
pub async fn delete_election(store: &dyn VoteStore, id: Id) -> Result<()> {
    store.delete_election(id).await?;
    info!("Deleted election {id}");
    Ok(())
}

/// Add a candidate to an election.
pub async fn create_candidate(
    store: &dyn VoteStore,
    election_id: Id,
    spec: CandidateSpec,
) -> Result<Candidate> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(Error::bad_request("Candidate name must not be empty"));
    }
    if spec.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(Error::bad_request(format!(
            "Candidate description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    let party = spec
        .party
        .as_deref()
        .map(str::trim)
        .filter(|party| !party.is_empty())
        .unwrap_or(INDEPENDENT);

    let candidate = store
        .insert_candidate(NewCandidate {
            election_id,
            name: name.to_string(),
            party: party.to_string(),
            description: spec.description,
            photo: spec.photo,
            seq: 0,
            vote_count: 0,
            edit_epoch: 0,
        })
        .await?;
    info!("Added candidate {} to election {election_id}", candidate.id);
    Ok(candidate)
}

/// Remove a candidate from an election. Refused once it holds votes.
pub async fn delete_candidate(store: &dyn VoteStore, election_id: Id, candidate_id: Id) -> Result<()> {
    let belongs = store
        .candidate(candidate_id)
        .await?
        .map_or(false, |candidate| candidate.election_id == election_id);
    if !belongs {
        return Err(Error::NotFound(Entity::Candidate(candidate_id)));
    }
    store.delete_candidate(candidate_id).await?;
    info!("Removed candidate {candidate_id} from election {election_id}");
    Ok(())
}

//! Vote admission.
//!
//! Admission checks run in a fixed order and the first failing check decides
//! the outcome. The only concurrency control for duplicate votes is the
//! store's (voter, election) uniqueness constraint, so the `vote_of`
//! pre-check here is an early exit, not a guarantee.

use chrono::{DateTime, Utc};

use crate::error::{Entity, Error, Result};
use crate::model::{
    common::election::LifecycleState,
    db::vote::{NewVote, Vote},
    mongodb::Id,
};
use crate::store::VoteStore;

/// Admit a vote by `voter_id` for `candidate_id` in `election_id`, as
/// evaluated at `now`.
///
/// Checks, in order:
/// 1. the election exists, else `NotFound(election)`;
/// 2. the election is open at `now`, else `NotOpen(state)`;
/// 3. the candidate exists and belongs to the election, else
///    `NotFound(candidate)`;
/// 4. the voter holds no vote in the election, else `AlreadyVoted`.
///
/// On success the vote record and the counter increment are written as one
/// unit by the store. Nothing is retried here: a caller unsure whether a vote
/// went through should ask [`has_voted`].
pub async fn admit_vote(
    store: &dyn VoteStore,
    voter_id: Id,
    election_id: Id,
    candidate_id: Id,
    now: DateTime<Utc>,
) -> Result<Vote> {
    let election = store
        .election(election_id)
        .await?
        .ok_or(Error::NotFound(Entity::Election(election_id)))?;

    let state = election.lifecycle(now);
    if state != LifecycleState::Open {
        debug!("Rejected vote in election {election_id}: election is {state}");
        return Err(Error::NotOpen(state));
    }

    let belongs = store
        .candidate(candidate_id)
        .await?
        .map_or(false, |candidate| candidate.election_id == election_id);
    if !belongs {
        debug!("Rejected vote in election {election_id}: no candidate {candidate_id}");
        return Err(Error::NotFound(Entity::Candidate(candidate_id)));
    }

    if store.vote_of(voter_id, election_id).await?.is_some() {
        debug!("Rejected repeat vote in election {election_id}");
        return Err(Error::AlreadyVoted);
    }

    let vote = store
        .record_vote(NewVote {
            voter_id,
            election_id,
            candidate_id,
            cast_at: now,
        })
        .await?;
    debug!("Admitted vote {} in election {election_id}", vote.id);
    Ok(vote)
}

/// The vote `voter_id` holds in `election_id`, if any.
///
/// Fails with `NotFound(election)` if the election does not exist.
pub async fn has_voted(store: &dyn VoteStore, voter_id: Id, election_id: Id) -> Result<Option<Vote>> {
    if store.election(election_id).await?.is_none() {
        return Err(Error::NotFound(Entity::Election(election_id)));
    }
    store.vote_of(voter_id, election_id).await
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, NewElection},
    };
    use crate::store::MemoryStore;

    async fn seed(store: &MemoryStore, election: NewElection) -> (Election, Candidate, Candidate) {
        let election = store.insert_election(election).await.unwrap();
        let c1 = store
            .insert_candidate(NewCandidate::example(election.id, "Alice"))
            .await
            .unwrap();
        let c2 = store
            .insert_candidate(NewCandidate::example(election.id, "Bob"))
            .await
            .unwrap();
        (election, c1, c2)
    }

    #[backend_test]
    async fn admission_follows_the_voting_window(store: MemoryStore) {
        let election = NewElection::fixed_example();
        let t0 = election.schedule.opens_at;
        let (election, c1, _) = seed(&store, election).await;

        let early = admit_vote(&store, Id::new(), election.id, c1.id, t0 - Duration::seconds(1)).await;
        assert!(matches!(early, Err(Error::NotOpen(LifecycleState::Upcoming))));

        let voter = Id::new();
        let vote = admit_vote(&store, voter, election.id, c1.id, t0 + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(vote.voter_id, voter);
        assert_eq!(vote.candidate_id, c1.id);

        let late = admit_vote(
            &store,
            Id::new(),
            election.id,
            c1.id,
            t0 + Duration::hours(1) + Duration::seconds(1),
        )
        .await;
        assert!(matches!(late, Err(Error::NotOpen(LifecycleState::Closed))));
        assert_eq!(store.vote_records(), 1);
    }

    #[backend_test]
    async fn window_bounds_are_inclusive(store: MemoryStore) {
        let election = NewElection::fixed_example();
        let (opens_at, closes_at) = (election.schedule.opens_at, election.schedule.closes_at);
        let (election, c1, _) = seed(&store, election).await;

        admit_vote(&store, Id::new(), election.id, c1.id, opens_at)
            .await
            .unwrap();
        admit_vote(&store, Id::new(), election.id, c1.id, closes_at)
            .await
            .unwrap();
    }

    #[backend_test]
    async fn second_vote_is_already_voted(store: MemoryStore) {
        let (election, c1, c2) = seed(&store, NewElection::open_example()).await;
        let voter = Id::new();

        admit_vote(&store, voter, election.id, c1.id, Utc::now())
            .await
            .unwrap();
        let again = admit_vote(&store, voter, election.id, c2.id, Utc::now()).await;
        assert!(matches!(again, Err(Error::AlreadyVoted)));

        let c2 = store.candidate(c2.id).await.unwrap().unwrap();
        assert_eq!(c2.vote_count, 0);
        let resubmit = admit_vote(&store, voter, election.id, c1.id, Utc::now()).await;
        assert!(matches!(resubmit, Err(Error::AlreadyVoted)));
        assert_eq!(store.vote_records(), 1);
    }

    #[backend_test]
    async fn checks_run_in_order(store: MemoryStore) {
        let mut closed = NewElection::open_example();
        closed.schedule.closes_at = Utc::now() - Duration::hours(1);
        closed.schedule.opens_at = Utc::now() - Duration::hours(2);
        let (closed, _, _) = seed(&store, closed).await;
        let (open, c1, _) = seed(&store, NewElection::open_example()).await;

        // Missing election beats everything else.
        let missing = admit_vote(&store, Id::new(), Id::new(), c1.id, Utc::now()).await;
        assert!(matches!(missing, Err(Error::NotFound(Entity::Election(_)))));

        // A closed election is reported before a bogus candidate.
        let bogus = Id::new();
        let result = admit_vote(&store, Id::new(), closed.id, bogus, Utc::now()).await;
        assert!(matches!(result, Err(Error::NotOpen(LifecycleState::Closed))));

        // A candidate from another election is not found here.
        let (_, foreign, _) = seed(&store, NewElection::open_example()).await;
        let result = admit_vote(&store, Id::new(), open.id, foreign.id, Utc::now()).await;
        assert!(matches!(
            result,
            Err(Error::NotFound(Entity::Candidate(id))) if id == foreign.id
        ));
        assert_eq!(store.vote_records(), 0);
    }

    #[backend_test]
    async fn disabled_election_rejects_votes(store: MemoryStore) {
        let mut election = NewElection::open_example();
        election.schedule.enabled = false;
        let (election, c1, _) = seed(&store, election).await;

        let result = admit_vote(&store, Id::new(), election.id, c1.id, Utc::now()).await;
        assert!(matches!(result, Err(Error::NotOpen(LifecycleState::Inactive))));
    }

    #[backend_test]
    async fn concurrent_attempts_admit_exactly_one(store: MemoryStore) {
        let (election, c1, c2) = seed(&store, NewElection::open_example()).await;
        let voter = Id::new();

        let attempts: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let candidate = if i % 2 == 0 { c1.id } else { c2.id };
                rocket::tokio::spawn(async move {
                    admit_vote(&store, voter, election.id, candidate, Utc::now()).await
                })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(Error::AlreadyVoted) => {}
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(store.vote_records(), 1);

        let counts: u64 = store
            .candidates(election.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.vote_count)
            .sum();
        assert_eq!(counts, 1);
    }

    #[backend_test]
    async fn has_voted_reports_the_choice(store: MemoryStore) {
        let (election, _, c2) = seed(&store, NewElection::open_example()).await;
        let voter = Id::new();

        assert_eq!(has_voted(&store, voter, election.id).await.unwrap(), None);
        admit_vote(&store, voter, election.id, c2.id, Utc::now())
            .await
            .unwrap();
        let vote = has_voted(&store, voter, election.id).await.unwrap().unwrap();
        assert_eq!(vote.candidate_id, c2.id);

        let missing = has_voted(&store, voter, Id::new()).await;
        assert!(matches!(missing, Err(Error::NotFound(Entity::Election(_)))));
    }
}

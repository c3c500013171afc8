use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Entity, Error, Result};
use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, NewElection},
        vote::{NewVote, Vote},
    },
    mongodb::Id,
};

use super::{CountCorrection, TallySnapshot, VoteStore};

/// Everything the in-memory store holds.
#[derive(Debug, Default)]
struct Tables {
    elections: Vec<Election>,
    candidates: HashMap<Id, Candidate>,
    votes: Vec<Vote>,
    /// Unique index over (voter, election), pointing into `votes`.
    ballots: HashMap<(Id, Id), usize>,
    /// Next candidate sequence number per election.
    sequences: HashMap<Id, u64>,
}

impl Tables {
    fn election_index(&self, id: Id) -> Option<usize> {
        self.elections.iter().position(|e| e.id == id)
    }

    fn election_has_votes(&self, election_id: Id) -> bool {
        self.votes.iter().any(|v| v.election_id == election_id)
    }

    fn count_for(&self, election_id: Id) -> HashMap<Id, u64> {
        let mut counts = HashMap::new();
        for vote in self.votes.iter().filter(|v| v.election_id == election_id) {
            *counts.entry(vote.candidate_id).or_insert(0) += 1;
        }
        counts
    }

    fn candidates_of(&self, election_id: Id) -> Vec<Candidate> {
        let mut candidates: Vec<_> = self
            .candidates
            .values()
            .filter(|c| c.election_id == election_id)
            .cloned()
            .collect();
        candidates.sort_by_key(|c| c.seq);
        candidates
    }
}

/// A [`VoteStore`] held entirely in process memory.
///
/// Each operation takes the table lock exactly once, which plays the part
/// the database's own write atomicity plays for [`super::MongoStore`].
/// Cloning yields another handle on the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vote records held, across all elections.
    pub fn vote_records(&self) -> usize {
        self.tables.read().votes.len()
    }

    /// Overwrite a cached counter without touching the log, simulating the
    /// aftermath of a partial failure.
    #[cfg(test)]
    pub fn corrupt_vote_count(&self, candidate_id: Id, vote_count: u64) {
        if let Some(candidate) = self.tables.write().candidates.get_mut(&candidate_id) {
            candidate.vote_count = vote_count;
        }
    }
}

#[rocket::async_trait]
impl VoteStore for MemoryStore {
    async fn insert_election(&self, election: NewElection) -> Result<Election> {
        let election = Election {
            id: Id::new(),
            election,
        };
        self.tables.write().elections.push(election.clone());
        Ok(election)
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        let tables = self.tables.read();
        Ok(tables.election_index(id).map(|i| tables.elections[i].clone()))
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        Ok(self.tables.read().elections.clone())
    }

    async fn update_election(&self, election: &Election) -> Result<()> {
        let mut tables = self.tables.write();
        let index = tables
            .election_index(election.id)
            .ok_or(Error::NotFound(Entity::Election(election.id)))?;
        let window_changed = !tables.elections[index]
            .schedule
            .same_window(&election.schedule);
        if window_changed && tables.election_has_votes(election.id) {
            return Err(Error::conflict(format!(
                "Election {} holds votes; its dates can no longer change",
                election.id
            )));
        }
        tables.elections[index] = election.clone();
        Ok(())
    }

    async fn delete_election(&self, id: Id) -> Result<()> {
        let mut tables = self.tables.write();
        let index = tables
            .election_index(id)
            .ok_or(Error::NotFound(Entity::Election(id)))?;
        if tables.election_has_votes(id) {
            return Err(Error::conflict(format!(
                "Election {id} holds votes and cannot be deleted"
            )));
        }
        tables.elections.remove(index);
        tables.candidates.retain(|_, c| c.election_id != id);
        tables.sequences.remove(&id);
        Ok(())
    }

    async fn insert_candidate(&self, mut candidate: NewCandidate) -> Result<Candidate> {
        let mut tables = self.tables.write();
        if tables.election_index(candidate.election_id).is_none() {
            return Err(Error::NotFound(Entity::Election(candidate.election_id)));
        }
        let name_taken = tables
            .candidates
            .values()
            .any(|c| c.election_id == candidate.election_id && c.name == candidate.name);
        if name_taken {
            return Err(Error::conflict(format!(
                "Candidate name '{}' is already used in election {}",
                candidate.name, candidate.election_id
            )));
        }
        let next = tables.sequences.entry(candidate.election_id).or_insert(0);
        candidate.seq = *next;
        *next += 1;
        candidate.vote_count = 0;
        let candidate = Candidate {
            id: Id::new(),
            candidate,
        };
        tables.candidates.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.tables.read().candidates.get(&id).cloned())
    }

    async fn candidates(&self, election_id: Id) -> Result<Vec<Candidate>> {
        Ok(self.tables.read().candidates_of(election_id))
    }

    async fn delete_candidate(&self, id: Id) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.candidates.contains_key(&id) {
            return Err(Error::NotFound(Entity::Candidate(id)));
        }
        if tables.votes.iter().any(|v| v.candidate_id == id) {
            return Err(Error::conflict(format!(
                "Candidate {id} holds votes and cannot be deleted"
            )));
        }
        tables.candidates.remove(&id);
        Ok(())
    }

    async fn record_vote(&self, vote: NewVote) -> Result<Vote> {
        let mut tables = self.tables.write();
        let key = (vote.voter_id, vote.election_id);
        if tables.ballots.contains_key(&key) {
            return Err(Error::AlreadyVoted);
        }
        let candidate = tables
            .candidates
            .get_mut(&vote.candidate_id)
            .filter(|c| c.election_id == vote.election_id)
            .ok_or(Error::NotFound(Entity::Candidate(vote.candidate_id)))?;
        candidate.vote_count += 1;
        let vote = Vote { id: Id::new(), vote };
        let index = tables.votes.len();
        tables.votes.push(vote.clone());
        tables.ballots.insert(key, index);
        Ok(vote)
    }

    async fn vote_of(&self, voter_id: Id, election_id: Id) -> Result<Option<Vote>> {
        let tables = self.tables.read();
        Ok(tables
            .ballots
            .get(&(voter_id, election_id))
            .map(|&i| tables.votes[i].clone()))
    }

    async fn tally_snapshot(&self, election_id: Id) -> Result<TallySnapshot> {
        let tables = self.tables.read();
        Ok(TallySnapshot {
            candidates: tables.candidates_of(election_id),
            log_counts: tables.count_for(election_id),
        })
    }

    async fn reconcile_counts(&self, election_id: Id) -> Result<Vec<CountCorrection>> {
        let mut tables = self.tables.write();
        let counts = tables.count_for(election_id);
        let mut corrections = Vec::new();
        for candidate in tables
            .candidates
            .values_mut()
            .filter(|c| c.election_id == election_id)
        {
            let recounted = counts.get(&candidate.id).copied().unwrap_or(0);
            if candidate.vote_count != recounted {
                corrections.push(CountCorrection {
                    candidate_id: candidate.id,
                    cached: candidate.vote_count,
                    recounted,
                });
                candidate.vote_count = recounted;
            }
        }
        Ok(corrections)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::db::election::ElectionCore;

    async fn seeded() -> (MemoryStore, Election, Candidate, Candidate) {
        let store = MemoryStore::new();
        let election = store
            .insert_election(ElectionCore::open_example())
            .await
            .unwrap();
        let alice = store
            .insert_candidate(NewCandidate::example(election.id, "Alice"))
            .await
            .unwrap();
        let bob = store
            .insert_candidate(NewCandidate::example(election.id, "Bob"))
            .await
            .unwrap();
        (store, election, alice, bob)
    }

    fn vote(voter_id: Id, election: &Election, candidate: &Candidate) -> NewVote {
        NewVote {
            voter_id,
            election_id: election.id,
            candidate_id: candidate.id,
            cast_at: Utc::now(),
        }
    }

    #[rocket::async_test]
    async fn candidates_come_back_in_creation_order() {
        let (store, election, alice, bob) = seeded().await;
        let carol = store
            .insert_candidate(NewCandidate::example(election.id, "Carol"))
            .await
            .unwrap();
        let ids: Vec<_> = store
            .candidates(election.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![alice.id, bob.id, carol.id]);
        assert_eq!((alice.seq, bob.seq, carol.seq), (0, 1, 2));
    }

    #[rocket::async_test]
    async fn duplicate_candidate_name_conflicts() {
        let (store, election, _, _) = seeded().await;
        let result = store
            .insert_candidate(NewCandidate::example(election.id, "Alice"))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[rocket::async_test]
    async fn second_vote_is_rejected_and_changes_nothing() {
        let (store, election, alice, bob) = seeded().await;
        let voter = Id::new();
        store.record_vote(vote(voter, &election, &alice)).await.unwrap();
        let result = store.record_vote(vote(voter, &election, &bob)).await;
        assert!(matches!(result, Err(Error::AlreadyVoted)));
        assert_eq!(store.vote_records(), 1);
        assert_eq!(store.candidate(bob.id).await.unwrap().unwrap().vote_count, 0);
        assert_eq!(store.candidate(alice.id).await.unwrap().unwrap().vote_count, 1);
    }

    #[rocket::async_test]
    async fn vote_for_foreign_candidate_writes_nothing() {
        let (store, election, _, _) = seeded().await;
        let other = store
            .insert_election(ElectionCore::open_example())
            .await
            .unwrap();
        let stranger = store
            .insert_candidate(NewCandidate::example(other.id, "Stranger"))
            .await
            .unwrap();
        let result = store.record_vote(vote(Id::new(), &election, &stranger)).await;
        assert!(matches!(
            result,
            Err(Error::NotFound(Entity::Candidate(id))) if id == stranger.id
        ));
        assert_eq!(store.vote_records(), 0);
    }

    #[rocket::async_test]
    async fn reconciliation_repairs_drift_only() {
        let (store, election, alice, bob) = seeded().await;
        store.record_vote(vote(Id::new(), &election, &alice)).await.unwrap();
        store.record_vote(vote(Id::new(), &election, &alice)).await.unwrap();
        store.corrupt_vote_count(alice.id, 7);

        let corrections = store.reconcile_counts(election.id).await.unwrap();
        assert_eq!(
            corrections,
            vec![CountCorrection {
                candidate_id: alice.id,
                cached: 7,
                recounted: 2
            }]
        );
        assert_eq!(store.candidate(alice.id).await.unwrap().unwrap().vote_count, 2);
        assert_eq!(store.candidate(bob.id).await.unwrap().unwrap().vote_count, 0);
        assert_eq!(store.vote_records(), 2);
    }

    #[rocket::async_test]
    async fn date_changes_blocked_once_votes_exist() {
        let (store, mut election, alice, _) = seeded().await;
        election.title = "Renamed before voting".to_string();
        store.update_election(&election).await.unwrap();

        store.record_vote(vote(Id::new(), &election, &alice)).await.unwrap();

        election.title = "Renamed during voting".to_string();
        election.schedule.enabled = false;
        store.update_election(&election).await.unwrap();

        election.schedule.closes_at = election.schedule.closes_at + chrono::Duration::hours(1);
        let result = store.update_election(&election).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        let stored = store.election(election.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Renamed during voting");
        assert!(!stored.schedule.enabled);
    }

    #[rocket::async_test]
    async fn deletion_cascades_only_without_votes() {
        let (store, election, alice, bob) = seeded().await;
        store.record_vote(vote(Id::new(), &election, &alice)).await.unwrap();

        assert!(matches!(
            store.delete_candidate(alice.id).await,
            Err(Error::Conflict(_))
        ));
        store.delete_candidate(bob.id).await.unwrap();
        assert!(matches!(
            store.delete_election(election.id).await,
            Err(Error::Conflict(_))
        ));

        let empty = store
            .insert_election(ElectionCore::open_example())
            .await
            .unwrap();
        let doomed = store
            .insert_candidate(NewCandidate::example(empty.id, "Doomed"))
            .await
            .unwrap();
        store.delete_election(empty.id).await.unwrap();
        assert!(store.election(empty.id).await.unwrap().is_none());
        assert!(store.candidate(doomed.id).await.unwrap().is_none());
    }
}

use std::collections::HashMap;

use mongodb::{
    bson::{doc, from_document, Document},
    error::Error as DbError,
    options::{FindOptions, SessionOptions},
    Client, ClientSession, Database,
};
use rocket::futures::{
    future::{BoxFuture, FutureExt},
    TryStreamExt,
};
use serde::Deserialize;

use crate::error::{Entity, Error, Result};
use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, NewElection},
        vote::{NewVote, Vote},
    },
    mongodb::{
        is_duplicate_key_error, is_transient_transaction_error, is_unknown_commit_result, Coll,
        Counter, Id,
    },
};

use super::{CountCorrection, TallySnapshot, VoteStore};

/// One row of the per-candidate vote aggregation.
#[derive(Debug, Deserialize)]
struct TallyRow {
    #[serde(rename = "_id")]
    candidate_id: Id,
    count: u64,
}

/// Pipeline counting the vote records of an election, grouped by candidate.
fn tally_pipeline(election_id: Id) -> Vec<Document> {
    vec![
        doc! { "$match": { "election_id": election_id } },
        doc! { "$group": { "_id": "$candidate_id", "count": { "$sum": 1 } } },
    ]
}

fn creation_order() -> FindOptions {
    FindOptions::builder().sort(doc! { "seq": 1 }).build()
}

/// A [`VoteStore`] backed by MongoDB.
///
/// Requires a replica set (or sharded cluster), since every multi-document
/// operation runs in a transaction.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
    counters: Coll<Counter>,
    txn_attempts: u32,
}

impl MongoStore {
    /// Wrap the given database. Indexes must already exist, see
    /// [`crate::model::mongodb::ensure_indexes_exist`].
    pub fn new(client: Client, db: &Database, txn_attempts: u32) -> Self {
        Self {
            client,
            elections: Coll::from_db(db),
            candidates: Coll::from_db(db),
            votes: Coll::from_db(db),
            counters: Coll::from_db(db),
            txn_attempts: txn_attempts.max(1),
        }
    }

    /// Run `body` inside a transaction, retrying the whole thing on transient
    /// errors (e.g. write conflicts with a concurrent transaction) and the
    /// commit alone when its outcome is unknown. Errors produced by `body`
    /// itself abort the transaction and are returned as-is.
    async fn transaction<T, F>(&self, mut body: F) -> Result<T>
    where
        F: for<'s> FnMut(&'s mut ClientSession) -> BoxFuture<'s, Result<T>>,
    {
        let mut session = self.client.start_session(None).await?;
        let mut attempt = 1;
        loop {
            session.start_transaction(None).await?;
            let outcome = match body(&mut session).await {
                Ok(value) => self.commit(&mut session).await.map(|()| value),
                Err(err) => {
                    if let Err(abort_err) = session.abort_transaction().await {
                        trace!("Abort after failed transaction body also failed: {abort_err}");
                    }
                    Err(err)
                }
            };
            match outcome {
                Err(Error::Db(ref e))
                    if is_transient_transaction_error(e) && attempt < self.txn_attempts =>
                {
                    debug!("Transient transaction error (attempt {attempt}), retrying: {e}");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn commit(&self, session: &mut ClientSession) -> Result<()> {
        let mut attempt = 1;
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e) if is_unknown_commit_result(&e) && attempt < self.txn_attempts => {
                    debug!("Commit result unknown (attempt {attempt}), retrying commit: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[rocket::async_trait]
impl VoteStore for MongoStore {
    async fn insert_election(&self, election: NewElection) -> Result<Election> {
        let election = Election {
            id: Id::new(),
            election,
        };
        self.elections.insert_one(&election, None).await?;
        Ok(election)
    }

    async fn election(&self, id: Id) -> Result<Option<Election>> {
        Ok(self.elections.find_one(id.as_doc(), None).await?)
    }

    async fn elections(&self) -> Result<Vec<Election>> {
        // Object IDs lead with their creation timestamp.
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        Ok(self
            .elections
            .find(None, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn update_election(&self, election: &Election) -> Result<()> {
        let (elections, candidates, votes) = (
            self.elections.clone(),
            self.candidates.clone(),
            self.votes.clone(),
        );
        let election = election.clone();
        self.transaction(move |session| {
            let (elections, candidates, votes) =
                (elections.clone(), candidates.clone(), votes.clone());
            let election = election.clone();
            async move {
                let current = elections
                    .find_one_with_session(election.id.as_doc(), None, session)
                    .await?
                    .ok_or(Error::NotFound(Entity::Election(election.id)))?;
                if !current.schedule.same_window(&election.schedule) {
                    let filter = doc! { "election_id": election.id };
                    let has_votes = votes
                        .find_one_with_session(filter.clone(), None, session)
                        .await?
                        .is_some();
                    if has_votes {
                        return Err(Error::conflict(format!(
                            "Election {} holds votes; its dates can no longer change",
                            election.id
                        )));
                    }
                    // Write to every candidate so that a vote transaction
                    // racing with this one hits a write conflict.
                    let touch = doc! { "$inc": { "edit_epoch": 1_i64 } };
                    candidates
                        .update_many_with_session(filter, touch, None, session)
                        .await?;
                }
                elections
                    .replace_one_with_session(election.id.as_doc(), &election, None, session)
                    .await?;
                Ok(())
            }
            .boxed()
        })
        .await
    }

    async fn delete_election(&self, id: Id) -> Result<()> {
        let (elections, candidates, votes, counters) = (
            self.elections.clone(),
            self.candidates.clone(),
            self.votes.clone(),
            self.counters.clone(),
        );
        self.transaction(move |session| {
            let (elections, candidates, votes, counters) = (
                elections.clone(),
                candidates.clone(),
                votes.clone(),
                counters.clone(),
            );
            async move {
                let filter = doc! { "election_id": id };
                let has_votes = votes
                    .find_one_with_session(filter.clone(), None, session)
                    .await?
                    .is_some();
                if has_votes {
                    return Err(Error::conflict(format!(
                        "Election {id} holds votes and cannot be deleted"
                    )));
                }
                // Deleting the candidates conflicts with any in-flight vote.
                candidates
                    .delete_many_with_session(filter, None, session)
                    .await?;
                counters
                    .delete_one_with_session(id.as_doc(), None, session)
                    .await?;
                let result = elections
                    .delete_one_with_session(id.as_doc(), None, session)
                    .await?;
                if result.deleted_count == 0 {
                    return Err(Error::NotFound(Entity::Election(id)));
                }
                Ok(())
            }
            .boxed()
        })
        .await
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let (elections, candidates, counters) = (
            self.elections.clone(),
            self.candidates.clone(),
            self.counters.clone(),
        );
        self.transaction(move |session| {
            let (elections, candidates, counters) =
                (elections.clone(), candidates.clone(), counters.clone());
            let mut candidate = candidate.clone();
            async move {
                let election_id = candidate.election_id;
                if elections
                    .find_one_with_session(election_id.as_doc(), None, session)
                    .await?
                    .is_none()
                {
                    return Err(Error::NotFound(Entity::Election(election_id)));
                }
                // The counter write also makes this conflict with a concurrent
                // deletion of the election.
                candidate.seq = Counter::next(&counters, election_id, session).await?;
                candidate.vote_count = 0;
                candidate.edit_epoch = 0;
                let candidate = Candidate {
                    id: Id::new(),
                    candidate,
                };
                match candidates
                    .insert_one_with_session(&candidate, None, session)
                    .await
                {
                    Ok(_) => Ok(candidate),
                    Err(e) if is_duplicate_key_error(&e) => Err(Error::conflict(format!(
                        "Candidate name '{}' is already used in election {}",
                        candidate.name, election_id
                    ))),
                    Err(e) => Err(e.into()),
                }
            }
            .boxed()
        })
        .await
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.candidates.find_one(id.as_doc(), None).await?)
    }

    async fn candidates(&self, election_id: Id) -> Result<Vec<Candidate>> {
        Ok(self
            .candidates
            .find(doc! { "election_id": election_id }, creation_order())
            .await?
            .try_collect()
            .await?)
    }

    async fn delete_candidate(&self, id: Id) -> Result<()> {
        let (candidates, votes) = (self.candidates.clone(), self.votes.clone());
        self.transaction(move |session| {
            let (candidates, votes) = (candidates.clone(), votes.clone());
            async move {
                let has_votes = votes
                    .find_one_with_session(doc! { "candidate_id": id }, None, session)
                    .await?
                    .is_some();
                if has_votes {
                    return Err(Error::conflict(format!(
                        "Candidate {id} holds votes and cannot be deleted"
                    )));
                }
                let result = candidates
                    .delete_one_with_session(id.as_doc(), None, session)
                    .await?;
                if result.deleted_count == 0 {
                    return Err(Error::NotFound(Entity::Candidate(id)));
                }
                Ok(())
            }
            .boxed()
        })
        .await
    }

    async fn record_vote(&self, vote: NewVote) -> Result<Vote> {
        let (candidates, votes) = (self.candidates.clone(), self.votes.clone());
        self.transaction(move |session| {
            let (candidates, votes) = (candidates.clone(), votes.clone());
            let vote = Vote {
                id: Id::new(),
                vote: vote.clone(),
            };
            async move {
                // The unique (voter_id, election_id) index decides who votes first.
                match votes.insert_one_with_session(&vote, None, session).await {
                    Ok(_) => {}
                    Err(e) if is_duplicate_key_error(&e) => return Err(Error::AlreadyVoted),
                    Err(e) => return Err(e.into()),
                }
                let filter = doc! {
                    "_id": vote.candidate_id,
                    "election_id": vote.election_id,
                };
                let update = doc! { "$inc": { "vote_count": 1_i64 } };
                let result = candidates
                    .update_one_with_session(filter, update, None, session)
                    .await?;
                if result.matched_count != 1 {
                    return Err(Error::NotFound(Entity::Candidate(vote.candidate_id)));
                }
                Ok(vote)
            }
            .boxed()
        })
        .await
    }

    async fn vote_of(&self, voter_id: Id, election_id: Id) -> Result<Option<Vote>> {
        let filter = doc! {
            "voter_id": voter_id,
            "election_id": election_id,
        };
        Ok(self.votes.find_one(filter, None).await?)
    }

    async fn tally_snapshot(&self, election_id: Id) -> Result<TallySnapshot> {
        // Read candidates and votes from the same point in time.
        let session_options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(session_options)).await?;

        let mut candidates = Vec::new();
        let mut cursor = self
            .candidates
            .find_with_session(
                doc! { "election_id": election_id },
                creation_order(),
                &mut session,
            )
            .await?;
        while let Some(candidate) = cursor.next(&mut session).await {
            candidates.push(candidate?);
        }

        let mut log_counts = HashMap::new();
        let mut cursor = self
            .votes
            .aggregate_with_session(tally_pipeline(election_id), None, &mut session)
            .await?;
        while let Some(row) = cursor.next(&mut session).await {
            let row: TallyRow = from_document(row?).map_err(DbError::from)?;
            log_counts.insert(row.candidate_id, row.count);
        }

        Ok(TallySnapshot {
            candidates,
            log_counts,
        })
    }

    async fn reconcile_counts(&self, election_id: Id) -> Result<Vec<CountCorrection>> {
        let (candidates, votes) = (self.candidates.clone(), self.votes.clone());
        self.transaction(move |session| {
            let (candidates, votes) = (candidates.clone(), votes.clone());
            async move {
                let mut counts = HashMap::new();
                let mut cursor = votes
                    .aggregate_with_session(tally_pipeline(election_id), None, session)
                    .await?;
                while let Some(row) = cursor.next(session).await {
                    let row: TallyRow = from_document(row?).map_err(DbError::from)?;
                    counts.insert(row.candidate_id, row.count);
                }

                let mut current = Vec::new();
                let mut cursor = candidates
                    .find_with_session(doc! { "election_id": election_id }, None, session)
                    .await?;
                while let Some(candidate) = cursor.next(session).await {
                    current.push(candidate?);
                }

                // Writing a counter that a concurrent vote also increments is a
                // write conflict, so the whole recount is retried rather than
                // losing that increment.
                let mut corrections = Vec::new();
                for candidate in current {
                    let recounted = counts.get(&candidate.id).copied().unwrap_or(0);
                    if candidate.vote_count == recounted {
                        continue;
                    }
                    let update = doc! { "$set": { "vote_count": recounted as i64 } };
                    candidates
                        .update_one_with_session(candidate.id.as_doc(), update, None, session)
                        .await?;
                    corrections.push(CountCorrection {
                        candidate_id: candidate.id,
                        cached: candidate.vote_count,
                        recounted,
                    });
                }
                Ok(corrections)
            }
            .boxed()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rocket::tokio;

    use super::*;
    use crate::model::db::election::ElectionCore;

    async fn seeded(store: &MongoStore) -> (Election, Candidate, Candidate) {
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
        (election, alice, bob)
    }

    fn vote(voter_id: Id, election: &Election, candidate: &Candidate) -> NewVote {
        NewVote {
            voter_id,
            election_id: election.id,
            candidate_id: candidate.id,
            cast_at: Utc::now(),
        }
    }

    #[backend_test(mongo)]
    async fn unique_index_turns_duplicates_into_already_voted(store: MongoStore, db: Database) {
        let (election, alice, bob) = seeded(&store).await;
        let voter = Id::new();
        store.record_vote(vote(voter, &election, &alice)).await.unwrap();
        let result = store.record_vote(vote(voter, &election, &bob)).await;
        assert!(matches!(result, Err(Error::AlreadyVoted)));

        let votes = Coll::<Vote>::from_db(&db);
        assert_eq!(votes.count_documents(None, None).await.unwrap(), 1);
        let bob = store.candidate(bob.id).await.unwrap().unwrap();
        assert_eq!(bob.vote_count, 0);
    }

    #[backend_test(mongo)]
    async fn concurrent_duplicates_leave_one_vote(store: MongoStore, db: Database) {
        let (election, alice, bob) = seeded(&store).await;
        let voter = Id::new();
        let attempts = (0..8).map(|i| {
            let store = store.clone();
            let target = if i % 2 == 0 { &alice } else { &bob };
            let vote = vote(voter, &election, target);
            tokio::spawn(async move { store.record_vote(vote).await })
        });
        let mut admitted = 0;
        for handle in attempts.collect::<Vec<_>>() {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(Error::AlreadyVoted) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(admitted, 1);

        let votes = Coll::<Vote>::from_db(&db);
        assert_eq!(votes.count_documents(None, None).await.unwrap(), 1);
        let snapshot = store.tally_snapshot(election.id).await.unwrap();
        let cached: u64 = snapshot.candidates.iter().map(|c| c.vote_count).sum();
        assert_eq!(cached, 1);
    }

    #[backend_test(mongo)]
    async fn reconcile_restores_counter_from_log(store: MongoStore, db: Database) {
        let (election, alice, _) = seeded(&store).await;
        store.record_vote(vote(Id::new(), &election, &alice)).await.unwrap();
        Coll::<Candidate>::from_db(&db)
            .update_one(alice.id.as_doc(), doc! { "$set": { "vote_count": 9_i64 } }, None)
            .await
            .unwrap();

        let corrections = store.reconcile_counts(election.id).await.unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].recounted, 1);
        let snapshot = store.tally_snapshot(election.id).await.unwrap();
        assert_eq!(snapshot.log_counts.get(&alice.id), Some(&1));
        assert_eq!(snapshot.candidates[0].vote_count, 1);
    }

    #[backend_test(mongo)]
    async fn duplicate_candidate_name_conflicts(store: MongoStore, db: Database) {
        let (election, _, _) = seeded(&store).await;
        let result = store
            .insert_candidate(NewCandidate::example(election.id, "Alice"))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        let candidates = Coll::<Candidate>::from_db(&db);
        let count = candidates
            .count_documents(doc! { "election_id": election.id }, None)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[backend_test(mongo)]
    async fn date_changes_blocked_once_votes_exist(store: MongoStore) {
        let (election, alice, bob) = seeded(&store).await;
        let mut election = store.election(election.id).await.unwrap().unwrap();
        election.schedule.closes_at = election.schedule.closes_at + chrono::Duration::hours(1);
        store.update_election(&election).await.unwrap();
        // Moving the window writes to every candidate of the election.
        let alice_now = store.candidate(alice.id).await.unwrap().unwrap();
        let bob_now = store.candidate(bob.id).await.unwrap().unwrap();
        assert_eq!((alice_now.edit_epoch, bob_now.edit_epoch), (1, 1));

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
        assert_eq!(
            stored.schedule.closes_at,
            election.schedule.closes_at - chrono::Duration::hours(1)
        );
    }

    #[backend_test(mongo)]
    async fn deletion_cascades_only_without_votes(store: MongoStore, db: Database) {
        let (election, alice, _) = seeded(&store).await;
        store.record_vote(vote(Id::new(), &election, &alice)).await.unwrap();
        let result = store.delete_election(election.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(store.election(election.id).await.unwrap().is_some());

        let (empty, first, second) = seeded(&store).await;
        store.delete_election(empty.id).await.unwrap();
        assert!(store.election(empty.id).await.unwrap().is_none());
        assert!(store.candidate(first.id).await.unwrap().is_none());
        assert!(store.candidate(second.id).await.unwrap().is_none());
        let counters = Coll::<Counter>::from_db(&db);
        assert!(counters.find_one(empty.id.as_doc(), None).await.unwrap().is_none());

        let result = store.delete_election(empty.id).await;
        assert!(matches!(result, Err(Error::NotFound(Entity::Election(_)))));
    }

    #[backend_test(mongo)]
    async fn candidate_with_votes_survives_deletion(store: MongoStore) {
        let (election, alice, _) = seeded(&store).await;
        store.record_vote(vote(Id::new(), &election, &alice)).await.unwrap();
        let result = store.delete_candidate(alice.id).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        let alice = store.candidate(alice.id).await.unwrap().unwrap();
        assert_eq!(alice.vote_count, 1);
    }
}

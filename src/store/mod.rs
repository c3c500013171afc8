//! The durable store the voting core runs against.
//!
//! Every operation whose correctness depends on atomicity is a single method
//! of [`VoteStore`], so that each backend can make it atomic in its own way.
//! The core never locks anything itself.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::error::Result;
use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, NewElection},
        vote::{NewVote, Vote},
    },
    mongodb::Id,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// A consistent view of an election's candidates alongside the vote log
/// aggregated per candidate.
#[derive(Debug, Clone, Default)]
pub struct TallySnapshot {
    /// Candidates in creation order.
    pub candidates: Vec<Candidate>,
    /// Number of vote records per candidate ID.
    pub log_counts: HashMap<Id, u64>,
}

/// A change made to a candidate's cached counter by reconciliation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CountCorrection {
    pub candidate_id: Id,
    /// The counter value before reconciliation.
    pub cached: u64,
    /// The number of vote records found in the log.
    pub recounted: u64,
}

#[rocket::async_trait]
pub trait VoteStore: Send + Sync {
    /// Insert a new election, returning it with its assigned ID.
    async fn insert_election(&self, election: NewElection) -> Result<Election>;

    async fn election(&self, id: Id) -> Result<Option<Election>>;

    /// All elections, oldest first.
    async fn elections(&self) -> Result<Vec<Election>>;

    /// Overwrite a stored election.
    ///
    /// Fails with `NotFound` if it doesn't exist, and with `Conflict` if the
    /// voting window changes while the election holds any vote. The check and
    /// the write are atomic with respect to vote recording.
    async fn update_election(&self, election: &Election) -> Result<()>;

    /// Delete an election together with its candidates.
    ///
    /// Fails with `NotFound` if it doesn't exist, and with `Conflict` if it
    /// holds any vote.
    async fn delete_election(&self, id: Id) -> Result<()>;

    /// Insert a candidate, assigning its ID and creation sequence number and
    /// zeroing its counter.
    ///
    /// Fails with `NotFound` if the election doesn't exist, and with
    /// `Conflict` if the name is already taken within the election.
    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate>;

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>>;

    /// The candidates of an election, in creation order.
    async fn candidates(&self, election_id: Id) -> Result<Vec<Candidate>>;

    /// Delete a candidate.
    ///
    /// Fails with `NotFound` if it doesn't exist, and with `Conflict` if any
    /// vote record names it.
    async fn delete_candidate(&self, id: Id) -> Result<()>;

    /// Record a vote and increment the chosen candidate's counter as one
    /// atomic unit.
    ///
    /// Fails with `AlreadyVoted` when the (voter, election) uniqueness
    /// constraint rejects the insert, and with `NotFound` if the candidate
    /// vanished or belongs to another election. On failure nothing is written.
    async fn record_vote(&self, vote: NewVote) -> Result<Vote>;

    /// The vote cast by a voter in an election, if any.
    async fn vote_of(&self, voter_id: Id, election_id: Id) -> Result<Option<Vote>>;

    /// Read the candidates and the aggregated vote log of an election from
    /// one consistent snapshot.
    async fn tally_snapshot(&self, election_id: Id) -> Result<TallySnapshot>;

    /// Set every candidate counter of the election to the number of vote
    /// records naming that candidate, returning the counters that changed.
    ///
    /// Safe to run concurrently with vote recording. Never touches votes.
    async fn reconcile_counts(&self, election_id: Id) -> Result<Vec<CountCorrection>>;
}

/// A shareable handle on whichever [`VoteStore`] the server was configured
/// with. This is what lives in Rocket's managed state.
#[derive(Clone)]
pub struct Store(Arc<dyn VoteStore>);

impl Store {
    pub fn new(store: impl VoteStore + 'static) -> Self {
        Self(Arc::new(store))
    }
}

impl Deref for Store {
    type Target = dyn VoteStore;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Store {
    type Error = ();

    /// Get the store from the managed state.
    ///
    /// Panics iff the [`Store`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let store = req.guard::<&State<Store>>().await.unwrap();
        request::Outcome::Success(store.inner().clone())
    }
}

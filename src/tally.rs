//! Results and counter reconciliation.
//!
//! Counts published to readers always come from the vote log. The cached
//! per-candidate counters are only compared against it, and repaired by
//! [`reconcile_tally`].

use chrono::{DateTime, Utc};

use crate::error::{Entity, Error, Result};
use crate::model::{
    api::{
        id::ApiId,
        results::{CandidateTally, ElectionResults},
    },
    common::election::LifecycleState,
    mongodb::Id,
};
use crate::store::{CountCorrection, VoteStore};

/// Compute the results of an election as of `now`.
pub async fn results(
    store: &dyn VoteStore,
    election_id: Id,
    now: DateTime<Utc>,
) -> Result<ElectionResults> {
    let election = store
        .election(election_id)
        .await?
        .ok_or(Error::NotFound(Entity::Election(election_id)))?;
    let snapshot = store.tally_snapshot(election_id).await?;

    let mut counters_consistent = true;
    let mut counted: Vec<_> = snapshot
        .candidates
        .into_iter()
        .map(|candidate| {
            let votes = snapshot.log_counts.get(&candidate.id).copied().unwrap_or(0);
            if candidate.vote_count != votes {
                warn!(
                    "Counter for candidate {} in election {election_id} reads {} but the log holds {votes}",
                    candidate.id, candidate.vote_count
                );
                counters_consistent = false;
            }
            (candidate, votes)
        })
        .collect();
    // Stable, so equal counts keep creation order.
    counted.sort_by(|(_, a), (_, b)| b.cmp(a));

    let total_votes = snapshot.log_counts.values().sum();
    let ranks = competition_ranks(counted.iter().map(|(_, votes)| *votes));
    let candidates: Vec<_> = counted
        .into_iter()
        .zip(ranks)
        .map(|((candidate, votes), rank)| CandidateTally {
            candidate_id: candidate.id.into(),
            name: candidate.candidate.name,
            party: candidate.candidate.party,
            votes,
            rank,
        })
        .collect();

    let state = election.lifecycle(now);
    let winners = (state == LifecycleState::Closed).then(|| top_candidates(&candidates));

    Ok(ElectionResults {
        election_id: election_id.into(),
        title: election.election.title,
        state,
        total_votes,
        candidates,
        winners,
        counters_consistent,
    })
}

/// Reset every candidate counter of an election to its count in the vote
/// log, returning the counters that changed.
pub async fn reconcile_tally(store: &dyn VoteStore, election_id: Id) -> Result<Vec<CountCorrection>> {
    if store.election(election_id).await?.is_none() {
        return Err(Error::NotFound(Entity::Election(election_id)));
    }
    let corrections = store.reconcile_counts(election_id).await?;
    for correction in &corrections {
        warn!(
            "Reconciled candidate {} in election {election_id}: counter {} -> {}",
            correction.candidate_id, correction.cached, correction.recounted
        );
    }
    if corrections.is_empty() {
        info!("Counters of election {election_id} already match the vote log");
    }
    Ok(corrections)
}

/// Ranks for counts sorted in descending order.
fn competition_ranks(sorted_counts: impl Iterator<Item = u64>) -> Vec<u32> {
    let mut ranks = Vec::new();
    let mut previous = None;
    let mut rank = 0;
    for (position, votes) in (1..).zip(sorted_counts) {
        if previous != Some(votes) {
            rank = position;
            previous = Some(votes);
        }
        ranks.push(rank);
    }
    ranks
}

/// Candidates sharing the top count, or none if nobody voted.
fn top_candidates(sorted: &[CandidateTally]) -> Vec<ApiId> {
    match sorted.first() {
        Some(top) if top.votes > 0 => sorted
            .iter()
            .take_while(|tally| tally.votes == top.votes)
            .map(|tally| tally.candidate_id)
            .collect(),
        _ => Vec::new(),
    }
}

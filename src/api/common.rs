use chrono::{DateTime, Utc};

use crate::error::{Entity, Error, Result};
use crate::model::{
    common::election::LifecycleState,
    db::election::Election,
    mongodb::Id,
};
use crate::store::VoteStore;

/// Get an election by ID, or fail with `NotFound`.
pub async fn election_by_id(store: &dyn VoteStore, id: Id) -> Result<Election> {
    store
        .election(id)
        .await?
        .ok_or(Error::NotFound(Entity::Election(id)))
}

/// Get an election the public may see: switched-off elections are reported as
/// missing.
pub async fn visible_election_by_id(
    store: &dyn VoteStore,
    id: Id,
    now: DateTime<Utc>,
) -> Result<Election> {
    let election = election_by_id(store, id).await?;
    if election.lifecycle(now) == LifecycleState::Inactive {
        return Err(Error::NotFound(Entity::Election(id)));
    }
    Ok(election)
}

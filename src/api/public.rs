use chrono::Utc;
use rocket::{serde::json::Json, Route};

use crate::error::{Entity, Error, Result};
use crate::model::{
    api::{
        election::{ElectionDescription, ElectionSummary},
        results::ElectionResults,
    },
    common::election::LifecycleState,
    mongodb::Id,
};
use crate::store::Store;
use crate::tally;

use super::common::visible_election_by_id;

pub fn routes() -> Vec<Route> {
    routes![elections, election, election_results]
}

#[get("/elections", rank = 2)]
async fn elections(store: Store) -> Result<Json<Vec<ElectionSummary>>> {
    let now = Utc::now();
    let summaries = store
        .elections()
        .await?
        .iter()
        .map(|election| ElectionSummary::new(election, now))
        .filter(|summary| summary.state != LifecycleState::Inactive)
        .collect();
    Ok(Json(summaries))
}

#[get("/elections/<election_id>", rank = 2)]
async fn election(election_id: Id, store: Store) -> Result<Json<ElectionDescription>> {
    let now = Utc::now();
    let election = visible_election_by_id(&*store, election_id, now).await?;
    let candidates = store.candidates(election_id).await?;
    Ok(Json(ElectionDescription::new(&election, candidates, now)))
}

#[get("/elections/<election_id>/results", rank = 2)]
async fn election_results(election_id: Id, store: Store) -> Result<Json<ElectionResults>> {
    let results = tally::results(&*store, election_id, Utc::now()).await?;
    if results.state == LifecycleState::Inactive {
        return Err(Error::NotFound(Entity::Election(election_id)));
    }
    Ok(Json(results))
}

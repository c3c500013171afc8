use chrono::Utc;
use rocket::{serde::json::Json, Route};

use crate::error::Result;
use crate::model::{
    api::{
        auth::{Admin, AuthToken},
        candidate::{CandidateDescription, CandidateSpec},
        election::{ElectionDescription, ElectionPatch, ElectionSpec, ElectionSummary},
        results::{Correction, ElectionResults},
    },
    mongodb::Id,
};
use crate::registry;
use crate::store::Store;
use crate::tally;

use super::common::election_by_id;

pub fn routes() -> Vec<Route> {
    routes![
        elections,
        election,
        election_results,
        create_election,
        modify_election,
        delete_election,
        create_candidate,
        delete_candidate,
        reconcile,
    ]
}

#[get("/elections", rank = 1)]
async fn elections(_token: AuthToken<Admin>, store: Store) -> Result<Json<Vec<ElectionSummary>>> {
    let now = Utc::now();
    let summaries = store
        .elections()
        .await?
        .iter()
        .map(|election| ElectionSummary::new(election, now))
        .collect();
    Ok(Json(summaries))
}

#[get("/elections/<election_id>", rank = 1)]
async fn election(
    _token: AuthToken<Admin>,
    election_id: Id,
    store: Store,
) -> Result<Json<ElectionDescription>> {
    let election = election_by_id(&*store, election_id).await?;
    let candidates = store.candidates(election_id).await?;
    Ok(Json(ElectionDescription::new(&election, candidates, Utc::now())))
}

#[get("/elections/<election_id>/results", rank = 1)]
async fn election_results(
    _token: AuthToken<Admin>,
    election_id: Id,
    store: Store,
) -> Result<Json<ElectionResults>> {
    let results = tally::results(&*store, election_id, Utc::now()).await?;
    Ok(Json(results))
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    token: AuthToken<Admin>,
    spec: Json<ElectionSpec>,
    store: Store,
) -> Result<Json<ElectionDescription>> {
    let election = registry::create_election(&*store, spec.0, token.id).await?;
    Ok(Json(ElectionDescription::new(&election, Vec::new(), Utc::now())))
}

#[patch("/elections/<election_id>", data = "<patch>", format = "json")]
async fn modify_election(
    _token: AuthToken<Admin>,
    election_id: Id,
    patch: Json<ElectionPatch>,
    store: Store,
) -> Result<Json<ElectionDescription>> {
    let election = registry::update_election(&*store, election_id, patch.0).await?;
    let candidates = store.candidates(election_id).await?;
    Ok(Json(ElectionDescription::new(&election, candidates, Utc::now())))
}

#[delete("/elections/<election_id>")]
async fn delete_election(_token: AuthToken<Admin>, election_id: Id, store: Store) -> Result<()> {
    registry::delete_election(&*store, election_id).await
}

#[post("/elections/<election_id>/candidates", data = "<spec>", format = "json")]
async fn create_candidate(
    _token: AuthToken<Admin>,
    election_id: Id,
    spec: Json<CandidateSpec>,
    store: Store,
) -> Result<Json<CandidateDescription>> {
    let candidate = registry::create_candidate(&*store, election_id, spec.0).await?;
    Ok(Json(candidate.into()))
}

#[delete("/elections/<election_id>/candidates/<candidate_id>")]
async fn delete_candidate(
    _token: AuthToken<Admin>,
    election_id: Id,
    candidate_id: Id,
    store: Store,
) -> Result<()> {
    registry::delete_candidate(&*store, election_id, candidate_id).await
}

#[post("/elections/<election_id>/reconcile")]
async fn reconcile(
    _token: AuthToken<Admin>,
    election_id: Id,
    store: Store,
) -> Result<Json<Vec<Correction>>> {
    let corrections = tally::reconcile_tally(&*store, election_id).await?;
    Ok(Json(corrections.into_iter().map(Into::into).collect()))
}

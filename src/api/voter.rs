use chrono::Utc;
use rocket::{serde::json::Json, Route};

use crate::ballot_box::{admit_vote, has_voted};
use crate::error::Result;
use crate::model::{
    api::{
        auth::{AuthToken, Voter},
        vote::{VoteReceipt, VoteRequest, VoteStatus},
    },
    mongodb::Id,
};
use crate::store::Store;

pub fn routes() -> Vec<Route> {
    routes![cast_vote, vote_status]
}

#[post("/elections/<election_id>/vote", data = "<vote>", format = "json")]
async fn cast_vote(
    token: AuthToken<Voter>,
    election_id: Id,
    vote: Json<VoteRequest>,
    store: Store,
) -> Result<Json<VoteReceipt>> {
    let vote = admit_vote(
        &*store,
        token.id,
        election_id,
        vote.candidate_id.into(),
        Utc::now(),
    )
    .await?;
    Ok(Json(vote.into()))
}

#[get("/elections/<election_id>/vote")]
async fn vote_status(
    token: AuthToken<Voter>,
    election_id: Id,
    store: Store,
) -> Result<Json<VoteStatus>> {
    let vote = has_voted(&*store, token.id, election_id).await?;
    Ok(Json(vote.into()))
}

use rocket::{http::Status, response::status::Custom, serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;

mod admin;
mod common;
mod public;
mod voter;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(public::routes());
    routes.extend(voter::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Render failures that never reached a handler (no matching route, missing
/// credentials, malformed bodies) in the same JSON shape as handler errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> Custom<Json<ErrorBody>> {
    let error = match status.code {
        401 => "unauthorized",
        404 => "not_found",
        400 | 422 => "bad_request",
        500..=599 => "server_error",
        _ => "error",
    };
    Custom(
        status,
        Json(ErrorBody {
            error,
            message: status.reason_lossy().to_string(),
            entity: None,
            state: None,
        }),
    )
}

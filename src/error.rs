use std::fmt::{Display, Formatter};

use jsonwebtoken::errors::Error as JwtError;
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::{common::election::LifecycleState, mongodb::Id};

pub type Result<T> = std::result::Result<T, Error>;

/// The kind of record a [`Error::NotFound`] refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Entity {
    Election(Id),
    Candidate(Id),
}

impl Entity {
    fn kind(&self) -> &'static str {
        match self {
            Self::Election(_) => "election",
            Self::Candidate(_) => "candidate",
        }
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Election(id) | Self::Candidate(id) => write!(f, "{} {}", self.kind(), id),
        }
    }
}

/// Every failure the backend can report. The first four variants are the
/// structured outcomes of the voting core; none of them is ever retried or
/// swallowed internally.
#[derive(Debug, Error)]
pub enum Error {
    /// The election or candidate does not exist, or the candidate belongs
    /// to a different election.
    #[error("Not found: {0}")]
    NotFound(Entity),
    /// The election was not accepting votes when the request was evaluated.
    #[error("Election is not open: it is {0}")]
    NotOpen(LifecycleState),
    /// The voter already holds a vote in this election.
    #[error("Voter has already voted in this election")]
    AlreadyVoted,
    /// An administrative change was refused because votes exist.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
}

impl Error {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound(_) => Status::NotFound,
            Self::NotOpen(_) => Status::Forbidden,
            Self::AlreadyVoted | Self::Conflict(_) => Status::Conflict,
            Self::BadRequest(_) => Status::BadRequest,
            Self::Db(_) => Status::InternalServerError,
            Self::Jwt(_) => Status::Unauthorized,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotOpen(_) => "not_open",
            Self::AlreadyVoted => "already_voted",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::Db(_) => "storage",
            Self::Jwt(_) => "token",
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let message = match err {
            // Don't leak storage internals to clients.
            Error::Db(_) => "Internal storage error".to_string(),
            other => other.to_string(),
        };
        Self {
            error: err.kind(),
            message,
            entity: match err {
                Error::NotFound(entity) => Some(entity.kind()),
                _ => None,
            },
            state: match err {
                Error::NotOpen(state) => Some(*state),
                _ => None,
            },
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        Custom(status, Json(ErrorBody::from(&self))).respond_to(req)
    }
}

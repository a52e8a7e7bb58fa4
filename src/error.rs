use std::fmt::Display;

use jsonwebtoken::errors::Error as JwtError;
use log::{debug, error};
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::mongodb::is_transient_error;
use crate::tally::TallyDefect;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Business-rule rejections on the voting path. These are always reported
/// to the voter with their specific reason and are never retried.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteError {
    #[error("The selected candidate is not standing in this election")]
    InvalidCandidate,
    #[error("This election does not exist")]
    InvalidElection,
    #[error("You are not registered to vote in this election")]
    NotRegistered,
    #[error("You are not eligible to vote in this election")]
    NotEligible,
    #[error("Voting for this election has not opened yet")]
    ElectionNotStarted,
    #[error("Voting for this election has closed")]
    ElectionEnded,
    #[error("You have already voted in this election")]
    AlreadyVoted,
    #[error("A vote has already been recorded for you in this election")]
    DuplicateVote,
    #[error("The vote ledger is temporarily unavailable, please check your receipt before trying again")]
    LedgerUnavailable,
}

impl VoteError {
    /// Stable machine-readable code, used by the UI to pick a localised message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCandidate => "INVALID_CANDIDATE",
            Self::InvalidElection => "INVALID_ELECTION",
            Self::NotRegistered => "NOT_REGISTERED",
            Self::NotEligible => "NOT_ELIGIBLE",
            Self::ElectionNotStarted => "ELECTION_NOT_STARTED",
            Self::ElectionEnded => "ELECTION_ENDED",
            Self::AlreadyVoted => "ALREADY_VOTED",
            Self::DuplicateVote => "DUPLICATE_VOTE",
            Self::LedgerUnavailable => "LEDGER_UNAVAILABLE",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::InvalidCandidate => Status::BadRequest,
            Self::InvalidElection => Status::NotFound,
            Self::NotRegistered
            | Self::NotEligible
            | Self::ElectionNotStarted
            | Self::ElectionEnded => Status::Forbidden,
            Self::AlreadyVoted | Self::DuplicateVote => Status::Conflict,
            Self::LedgerUnavailable => Status::ServiceUnavailable,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Tally(#[from] TallyDefect),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("Transient storage failure: {0}")]
    Transient(String),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: impl Display) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Status(Status::Conflict, msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Status(Status::Unauthorized, msg.into())
    }

    /// Is this a storage failure that may succeed if the operation is repeated?
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Db(e) => is_transient_error(e),
            _ => false,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Vote(e) => e.status(),
            Self::Tally(_) | Self::Db(_) | Self::Transient(_) => Status::InternalServerError,
            Self::Jwt(_) => Status::Unauthorized,
            Self::Status(status, _) => *status,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Vote(e) => e.code(),
            Self::Tally(_) => "TALLY_DEFECT",
            Self::Db(_) | Self::Transient(_) => "STORAGE_ERROR",
            Self::Jwt(_) => "UNAUTHORIZED",
            Self::Status(status, _) => match status.code {
                401 => "UNAUTHORIZED",
                403 => "FORBIDDEN",
                404 => "NOT_FOUND",
                409 => "CONFLICT",
                _ if status.code >= 500 => "INTERNAL_ERROR",
                _ => "BAD_REQUEST",
            },
        }
    }
}

/// JSON body attached to every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        // Internal details are logged, not exposed.
        let message = if status.code >= 500 && !matches!(self, Self::Vote(_)) {
            error!("{} {}: {self}", req.method(), req.uri());
            "Internal server error".to_string()
        } else {
            debug!("{} {} rejected: {self}", req.method(), req.uri());
            self.to_string()
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            message,
        };
        Custom(status, Json(body)).respond_to(req)
    }
}

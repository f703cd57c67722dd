use std::fmt;

use crate::db::schema::{BallotId, BallotState, DrawId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    Ballot,
    Draw,
    DrawType,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Ballot => "ballot",
            Entity::Draw => "draw",
            Entity::DrawType => "draw type",
        })
    }
}

/// Outcome of a rejected lottery operation.
///
/// Everything except `Unavailable` is deterministic: repeating the call against
/// the same state fails the same way, so only `Unavailable` is ever retried.
#[derive(Debug)]
pub enum LotteryError {
    Validation { field: &'static str, message: String },
    NotFound { entity: Entity, id: i64 },
    Forbidden { ballot: BallotId },
    InvalidState { ballot: BallotId, state: BallotState },
    DrawClosed { draw: DrawId },
    AlreadyClosed { draw: DrawId },
    Unavailable(anyhow::Error),
    Internal(anyhow::Error),
}

impl LotteryError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        LotteryError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: Entity, id: i64) -> Self {
        LotteryError::NotFound { entity, id }
    }

    pub fn internal(message: &str) -> Self {
        LotteryError::Internal(anyhow::Error::msg(message.to_owned()))
    }

    pub fn code(&self) -> &'static str {
        match self {
            LotteryError::Validation { .. } => "validation_error",
            LotteryError::NotFound { .. } => "not_found",
            LotteryError::Forbidden { .. } => "forbidden",
            LotteryError::InvalidState { .. } => "invalid_state",
            LotteryError::DrawClosed { .. } => "draw_closed",
            LotteryError::AlreadyClosed { .. } => "already_closed",
            LotteryError::Unavailable(_) => "unavailable",
            LotteryError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            LotteryError::Validation { .. } => 400,
            LotteryError::NotFound { .. } => 404,
            LotteryError::Forbidden { .. } => 403,
            LotteryError::InvalidState { .. } => 409,
            LotteryError::DrawClosed { .. } => 409,
            LotteryError::AlreadyClosed { .. } => 200,
            LotteryError::Unavailable(_) => 503,
            LotteryError::Internal(_) => 500,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LotteryError::Unavailable(_))
    }
}

impl fmt::Display for LotteryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotteryError::Validation { field, message } => write!(f, "invalid {}: {}", field, message),
            LotteryError::NotFound { entity, id } => write!(f, "{} {} does not exist", entity, id),
            LotteryError::Forbidden { ballot } => write!(f, "ballot {} belongs to another user", ballot),
            LotteryError::InvalidState { ballot, state } => write!(f, "ballot {} is already {}", ballot, state),
            LotteryError::DrawClosed { draw } => write!(f, "draw {} no longer accepts ballots", draw),
            LotteryError::AlreadyClosed { draw } => write!(f, "draw {} has already been resolved", draw),
            LotteryError::Unavailable(e) => write!(f, "lottery store unavailable, try again later: {}", e),
            LotteryError::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl std::error::Error for LotteryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LotteryError::Unavailable(e) | LotteryError::Internal(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for LotteryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                LotteryError::Unavailable(e.into())
            }
            _ => LotteryError::Internal(e.into()),
        }
    }
}

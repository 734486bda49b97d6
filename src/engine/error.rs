use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    /// The request carries no authenticated user.
    Unauthorized,
    /// The user has no profile or is not in any tent.
    NoTent,
    /// `start >= end`.
    InvalidRange { start: Ms, end: Ms },
    /// The log rejected the write; nothing was applied.
    Transaction(String),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidJoinCode(String),
    NotMember(Ulid),
    Invalid(&'static str),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Unauthorized => write!(f, "unauthorized"),
            EngineError::NoTent => write!(f, "no tent found"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} must be before end {end}")
            }
            EngineError::Transaction(e) => write!(f, "transaction failed: {e}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidJoinCode(code) => write!(f, "invalid join code: {code}"),
            EngineError::NotMember(tent_id) => write!(f, "not a member of tent {tent_id}"),
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

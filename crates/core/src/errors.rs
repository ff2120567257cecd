use thiserror::Error;

use crate::domain::job::JobStatus;
use crate::intent::Intent;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid job transition from {from:?} to {to:?}")]
    InvalidJobTransition { from: JobStatus, to: JobStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// The model produced output the parser cannot decode. Distinct from an
/// incomplete action payload, which is a normal conversational state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("model output is not well-formed structured data: {detail}")]
    Malformed { detail: String },
    #[error("model output carries no intent")]
    MissingIntent,
    #[error("model output names unknown intent `{0}`")]
    UnknownIntent(String),
    #[error("webhook data for {intent:?} does not match its schema: {detail}")]
    InvalidPayload { intent: Intent, detail: String },
}

/// Defensive re-check failure while shaping the external payload. Indicates a
/// registry/schema mismatch or a parser bug; fatal for the request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("required field `{field}` absent for {intent:?}")]
    MissingField { intent: Intent, field: &'static str },
    #[error("intent {intent:?} carries no action payload")]
    NotActionable { intent: Intent },
}

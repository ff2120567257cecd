//! Core domain logic for merchat: conversation types, token budgeting, the
//! intent schema registry, model-output parsing, and webhook payload mapping.
//! Everything here is pure and synchronous; I/O lives in `merchat-agent`.

pub mod budget;
pub mod config;
pub mod domain;
pub mod errors;
pub mod intent;
pub mod parser;
pub mod webhook;

pub use budget::TokenBudgeter;
pub use domain::catalog::{CatalogRecord, SemanticDocument};
pub use domain::conversation::{
    CompanyId, ConversationContext, ConversationTurn, SessionId, TurnRole, UserId,
};
pub use domain::customer::Customer;
pub use domain::job::{BackgroundJob, JobId, JobStatus};
pub use errors::{DomainError, MappingError, ParseError};
pub use intent::{ActionData, Intent, IntentSchema};
pub use parser::{ActionOutcome, ParsedModelResponse, ResponseParser};
pub use webhook::{ConversationMeta, WebhookMapper, WebhookPayload};

//! Async orchestration for merchat: the customer-message pipeline around the
//! pure logic in `merchat-core`.
//!
//! The flow per message:
//! 1. **Budgeting** - trim the transcript to the token budget
//! 2. **Context assembly** (`context`) - merge catalog and knowledge-base
//!    lookups into one bounded block
//! 3. **Model call** (`collaborators::ModelProvider`) - timeout plus one
//!    immediate retry
//! 4. **Parse and route** (`runtime`) - reply, inline webhook dispatch, or a
//!    background job (`jobs`)
//!
//! # Safety Principle
//!
//! The model is strictly a translator. It NEVER decides prices or stock
//! levels; those come only from the catalog, and every outbound payload goes
//! through the allow-list mapper in `merchat-core`.

pub mod collaborators;
pub mod context;
pub mod jobs;
pub mod prompt;
pub mod runtime;
pub mod sink;
pub mod telemetry;

pub use collaborators::{
    CatalogStore, ConversationStore, ModelProvider, SemanticIndex, UpstreamError, WebhookSink,
};
pub use context::{AssembledContext, ContextAssembler};
pub use jobs::{InMemoryJobStore, JobError, JobManager, JobStore, ProgressHandle};
pub use runtime::{AgentError, MessageOutcome, Orchestrator};
pub use sink::HttpWebhookSink;

//! Interfaces to the external collaborators the pipeline composes: the
//! structured catalog, the vector-search index, the model provider, the
//! backend webhook, and the conversation store. The core treats all of them
//! as opaque.

use async_trait::async_trait;
use thiserror::Error;

use merchat_core::{CatalogRecord, CompanyId, ConversationTurn, SemanticDocument, SessionId};
use merchat_core::WebhookPayload;

/// A collaborator timed out or answered with a failure. Transient by
/// definition: recovery is degradation or one immediate retry, decided by
/// the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("{source_name} timed out")]
    Timeout { source_name: &'static str },
    #[error("{source_name} unavailable: {detail}")]
    Unavailable { source_name: &'static str, detail: String },
}

/// Exact/keyword match over the authoritative catalog, bounded result count.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn query(
        &self,
        company_id: &CompanyId,
        text: &str,
        limit: usize,
    ) -> Result<Vec<CatalogRecord>, UpstreamError>;
}

/// Nearest-neighbor search over the document index, bounded `k`.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn search(
        &self,
        company_id: &CompanyId,
        text: &str,
        k: usize,
    ) -> Result<Vec<SemanticDocument>, UpstreamError>;
}

/// Single prompt-in/text-out call against the language model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, UpstreamError>;
}

/// External HTTP dispatch of a validated action payload. One immediate
/// attempt; retry policy belongs to the caller's caller.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<(), UpstreamError>;
}

/// Append-only transcript storage keyed by session. The core never deletes
/// history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn history(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConversationTurn>, UpstreamError>;

    async fn append(
        &self,
        session_id: &SessionId,
        turns: &[ConversationTurn],
    ) -> Result<(), UpstreamError>;
}

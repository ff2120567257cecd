//! Merges the two disjoint context sources into one bounded block.
//!
//! Catalog data is exact and must never be crowded out by larger but less
//! precise semantic snippets, so the catalog block always comes first and
//! only the semantic block is truncated under pressure. Either lookup may
//! fail or time out independently; the other side still produces context.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use merchat_core::config::ContextConfig;
use merchat_core::{CatalogRecord, CompanyId, SemanticDocument};

use crate::collaborators::{CatalogStore, SemanticIndex, UpstreamError};

pub const CATALOG_HEADER: &str = "CATALOG DATA (authoritative; exact prices and stock):";
pub const SEMANTIC_HEADER: &str = "KNOWLEDGE BASE (supplementary; approximate matches):";
const BLOCK_SEPARATOR: &str = "\n\n";

/// Derived per request; `combined` always holds the catalog block before the
/// semantic block and never exceeds the configured cap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembledContext {
    pub catalog_block: String,
    pub semantic_block: String,
    pub combined: String,
    pub truncated: bool,
}

pub struct ContextAssembler {
    catalog: Arc<dyn CatalogStore>,
    semantic: Arc<dyn SemanticIndex>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        semantic: Arc<dyn SemanticIndex>,
        config: ContextConfig,
    ) -> Self {
        Self { catalog, semantic, config }
    }

    pub async fn assemble(&self, company_id: &CompanyId, query: &str) -> AssembledContext {
        let catalog_lookup = timeout(
            Duration::from_secs(self.config.catalog_timeout_secs),
            self.catalog.query(company_id, query, self.config.catalog_limit),
        );
        let semantic_lookup = timeout(
            Duration::from_secs(self.config.semantic_timeout_secs),
            self.semantic.search(company_id, query, self.config.semantic_top_k),
        );

        let (catalog_result, semantic_result) = tokio::join!(catalog_lookup, semantic_lookup);

        let records = degrade_on_failure("catalog", catalog_result);
        let documents = degrade_on_failure("semantic_index", semantic_result);

        let catalog_block = format_catalog_block(&records);
        let semantic_block = format_semantic_block(&documents, self.config.snippet_chars);
        combine(catalog_block, semantic_block, self.config.max_context_chars)
    }
}

fn degrade_on_failure<T>(
    source_name: &'static str,
    result: Result<Result<Vec<T>, UpstreamError>, tokio::time::error::Elapsed>,
) -> Vec<T> {
    match result {
        Ok(Ok(items)) => items,
        Ok(Err(error)) => {
            warn!(
                event_name = "context.lookup_failed",
                source = source_name,
                error = %error,
                "context lookup failed; assembling without it"
            );
            Vec::new()
        }
        Err(_) => {
            warn!(
                event_name = "context.lookup_timeout",
                source = source_name,
                "context lookup timed out; assembling without it"
            );
            Vec::new()
        }
    }
}

fn format_catalog_block(records: &[CatalogRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }

    let mut block = String::from(CATALOG_HEADER);
    for record in records {
        block.push_str(&format!(
            "\n- {} (id: {}): price {:.2}, stock {}",
            record.name, record.record_id, record.price, record.quantity
        ));
    }
    block
}

fn format_semantic_block(documents: &[SemanticDocument], snippet_chars: usize) -> String {
    if documents.is_empty() {
        return String::new();
    }

    let mut block = String::from(SEMANTIC_HEADER);
    for document in documents {
        let flattened = document.content.split_whitespace().collect::<Vec<_>>().join(" ");
        let snippet = truncate_to_boundary(&flattened, snippet_chars);
        block.push_str(&format!("\n- {}: {}", document.title, snippet));
    }
    block
}

fn combine(catalog_block: String, semantic_block: String, max_chars: usize) -> AssembledContext {
    // Degenerate case: the catalog alone blows the cap. The length invariant
    // wins; the semantic block is dropped entirely.
    if catalog_block.len() > max_chars {
        let combined = truncate_to_boundary(&catalog_block, max_chars).to_string();
        return AssembledContext { catalog_block, semantic_block, combined, truncated: true };
    }

    if semantic_block.is_empty() {
        let combined = catalog_block.clone();
        return AssembledContext { catalog_block, semantic_block, combined, truncated: false };
    }

    if catalog_block.is_empty() {
        if semantic_block.len() <= max_chars {
            let combined = semantic_block.clone();
            return AssembledContext { catalog_block, semantic_block, combined, truncated: false };
        }
        let combined = truncate_to_boundary(&semantic_block, max_chars).to_string();
        return AssembledContext { catalog_block, semantic_block, combined, truncated: true };
    }

    let full_len = catalog_block.len() + BLOCK_SEPARATOR.len() + semantic_block.len();
    if full_len <= max_chars {
        let combined = format!("{catalog_block}{BLOCK_SEPARATOR}{semantic_block}");
        return AssembledContext { catalog_block, semantic_block, combined, truncated: false };
    }

    let remaining = max_chars.saturating_sub(catalog_block.len() + BLOCK_SEPARATOR.len());
    let kept_semantic = truncate_to_boundary(&semantic_block, remaining);
    let combined = if kept_semantic.is_empty() {
        catalog_block.clone()
    } else {
        format!("{catalog_block}{BLOCK_SEPARATOR}{kept_semantic}")
    };
    AssembledContext { catalog_block, semantic_block, combined, truncated: true }
}

fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use merchat_core::config::{AppConfig, ContextConfig};
    use merchat_core::{CatalogRecord, CompanyId, SemanticDocument};

    use super::{ContextAssembler, CATALOG_HEADER, SEMANTIC_HEADER};
    use crate::collaborators::{CatalogStore, SemanticIndex, UpstreamError};

    struct FixedCatalog(Vec<CatalogRecord>);

    #[async_trait]
    impl CatalogStore for FixedCatalog {
        async fn query(
            &self,
            _company_id: &CompanyId,
            _text: &str,
            limit: usize,
        ) -> Result<Vec<CatalogRecord>, UpstreamError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct FixedIndex(Vec<SemanticDocument>);

    #[async_trait]
    impl SemanticIndex for FixedIndex {
        async fn search(
            &self,
            _company_id: &CompanyId,
            _text: &str,
            k: usize,
        ) -> Result<Vec<SemanticDocument>, UpstreamError> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl SemanticIndex for FailingIndex {
        async fn search(
            &self,
            _company_id: &CompanyId,
            _text: &str,
            _k: usize,
        ) -> Result<Vec<SemanticDocument>, UpstreamError> {
            Err(UpstreamError::Unavailable {
                source_name: "semantic_index",
                detail: "connection refused".to_string(),
            })
        }
    }

    struct SlowIndex;

    #[async_trait]
    impl SemanticIndex for SlowIndex {
        async fn search(
            &self,
            _company_id: &CompanyId,
            _text: &str,
            _k: usize,
        ) -> Result<Vec<SemanticDocument>, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn config() -> ContextConfig {
        AppConfig::default().context
    }

    fn records() -> Vec<CatalogRecord> {
        vec![
            CatalogRecord {
                record_id: "sku-901".to_string(),
                name: "iPhone 15 Pro Max".to_string(),
                price: 9_899.0,
                quantity: 7,
                category: "phones".to_string(),
            },
            CatalogRecord {
                record_id: "sku-902".to_string(),
                name: "Galaxy S24 Ultra".to_string(),
                price: 7_499.0,
                quantity: 3,
                category: "phones".to_string(),
            },
        ]
    }

    fn documents() -> Vec<SemanticDocument> {
        vec![SemanticDocument {
            title: "Warranty policy".to_string(),
            content: "All phones carry a twelve month manufacturer warranty.".to_string(),
            relevance_score: 0.87,
        }]
    }

    fn assembler(
        catalog: Vec<CatalogRecord>,
        semantic: impl SemanticIndex + 'static,
        config: ContextConfig,
    ) -> ContextAssembler {
        ContextAssembler::new(Arc::new(FixedCatalog(catalog)), Arc::new(semantic), config)
    }

    fn company() -> CompanyId {
        CompanyId("acme-eletro".to_string())
    }

    #[tokio::test]
    async fn catalog_block_always_precedes_semantic_block() {
        let assembler = assembler(records(), FixedIndex(documents()), config());
        let context = assembler.assemble(&company(), "iphone stock").await;

        let catalog_at = context.combined.find(CATALOG_HEADER).expect("catalog header");
        let semantic_at = context.combined.find(SEMANTIC_HEADER).expect("semantic header");
        assert!(catalog_at < semantic_at);
        assert!(!context.truncated);
        assert!(context.combined.contains("iPhone 15 Pro Max (id: sku-901)"));
    }

    #[tokio::test]
    async fn failing_semantic_lookup_degrades_to_catalog_only() {
        let assembler = assembler(records(), FailingIndex, config());
        let context = assembler.assemble(&company(), "iphone stock").await;

        assert!(context.combined.contains(CATALOG_HEADER));
        assert!(!context.combined.contains(SEMANTIC_HEADER));
        assert!(!context.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn semantic_timeout_yields_catalog_only_untruncated() {
        let assembler = assembler(records(), SlowIndex, config());
        let context = assembler.assemble(&company(), "iphone stock").await;

        assert!(!context.truncated);
        assert_eq!(context.combined, context.catalog_block);
        assert!(context.combined.contains("stock 7"));
    }

    #[tokio::test]
    async fn semantic_block_is_truncated_before_catalog() {
        let mut tight = config();
        tight.max_context_chars = 240;
        let many_documents = (0..10)
            .map(|i| SemanticDocument {
                title: format!("Policy {i}"),
                content: "long supplementary describing text ".repeat(10),
                relevance_score: 0.5,
            })
            .collect();

        let assembler = assembler(records(), FixedIndex(many_documents), tight);
        let context = assembler.assemble(&company(), "policies").await;

        assert!(context.truncated);
        assert!(context.combined.len() <= 240);
        assert!(context.combined.starts_with(CATALOG_HEADER));
        assert!(context.combined.contains("iPhone 15 Pro Max"));
    }

    #[tokio::test]
    async fn length_cap_holds_even_for_oversize_catalog() {
        let mut tight = config();
        tight.max_context_chars = 80;
        let assembler = assembler(records(), FixedIndex(documents()), tight);
        let context = assembler.assemble(&company(), "everything").await;

        assert!(context.truncated);
        assert!(context.combined.len() <= 80);
    }

    #[tokio::test]
    async fn empty_lookups_produce_empty_context() {
        let assembler = assembler(Vec::new(), FixedIndex(Vec::new()), config());
        let context = assembler.assemble(&company(), "anything").await;

        assert!(context.combined.is_empty());
        assert!(!context.truncated);
    }
}

use serde::{Deserialize, Serialize};

/// Authoritative, exact-value record from the structured catalog store.
/// Read-only to this crate; inventory-management collaborators own writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub record_id: String,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
    pub category: String,
}

/// Approximate, descriptive match from the vector-search collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticDocument {
    pub title: String,
    pub content: String,
    pub relevance_score: f32,
}

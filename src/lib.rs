//! Business-data intelligence service library.
//!
//! [`AppState`] is the top of the dependency graph: the orchestrator
//! depends on the classifier/NL->SQL, relational, vector, knowledge, and
//! scoring engines; those in turn depend only on leaf collaborators
//! (security validator, LLM client, storage pools). Constructed once at
//! startup in `main` and shared across request tasks behind `Arc`.

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
#[cfg(test)]
mod tests;
pub mod utils;

pub use config::Config;
pub use services::{
    AuditLog, Classifier, FeedbackStore, IngestionPipeline, InsightGenerator, KnowledgeRefiner,
    KnowledgeStore, LlmClient, NlToSql, Orchestrator, RelationalStore, ScoringEngine, VectorStore,
};

/// Application shared state, constructed once in `main` and handed to the
/// router behind `Arc` so every handler clones a pointer, never the state
/// itself. Rust's type system is the dependency-injection container here;
/// there is no service-locator indirection.
pub struct AppState {
    pub config: Config,
    pub relational: Arc<RelationalStore>,
    pub vector: Arc<VectorStore>,
    pub knowledge: Arc<KnowledgeStore>,
    pub audit: Arc<AuditLog>,
    pub feedback: Arc<FeedbackStore>,
    pub ingestion: Arc<IngestionPipeline>,
    pub insight: Arc<InsightGenerator>,
    pub scoring: Arc<ScoringEngine>,
    pub refiner: Arc<KnowledgeRefiner>,
    pub orchestrator: Arc<Orchestrator>,
}

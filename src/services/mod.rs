pub mod audit;
pub mod classifier;
pub mod feedback;
pub mod ingestion;
pub mod insight;
pub mod knowledge;
pub mod llm;
pub mod orchestrator;
pub mod pii;
pub mod refinement;
pub mod relational;
pub mod scoring;
pub mod security;
pub mod templates;
pub mod vector;

pub use audit::AuditLog;
pub use classifier::{Classifier, NlToSql};
pub use feedback::FeedbackStore;
pub use ingestion::IngestionPipeline;
pub use insight::InsightGenerator;
pub use knowledge::KnowledgeStore;
pub use llm::LlmClient;
pub use orchestrator::Orchestrator;
pub use refinement::KnowledgeRefiner;
pub use relational::RelationalStore;
pub use scoring::ScoringEngine;
pub use vector::VectorStore;

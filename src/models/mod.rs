pub mod audit;
pub mod classification;
pub mod feedback;
pub mod ingestion;
pub mod insight;
pub mod knowledge;
pub mod orchestrator;
pub mod refinement;
pub mod scoring;
pub mod table;
pub mod vector;

pub use audit::{AuditEvent, AuditEventType, AuditQueryFilters};
pub use classification::{ClassificationResult, QueryType};
pub use feedback::{
    CategoryFeedbackStats, Feedback, FeedbackQueryFilters, FeedbackSummary, FeedbackType,
    NegativeFeedbackPattern, RefinementAid,
};
pub use ingestion::IngestResult;
pub use insight::{Insight, InsightPriority, InsightReport, InsightType};
pub use knowledge::{BusinessRule, KnowledgeState, Metric, RuleSeverity, ScoringFactor};
pub use orchestrator::IntelligenceResponse;
pub use refinement::{ImprovementPriority, RefinementReport, RuleModification, WeightAdjustment};
pub use scoring::{FactorPerformance, ScoreDistribution, ScoredRecord};
pub use table::{ColumnInfo, ColumnType, TableInfo};
pub use vector::{CollectionInfo, PatternResult, SimilarRecord};

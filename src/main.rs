use axum::{
    Router,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use intelligence_service::config::Config;
use intelligence_service::services::audit::AuditLog;
use intelligence_service::services::classifier::{Classifier, NlToSql};
use intelligence_service::services::feedback::FeedbackStore;
use intelligence_service::services::ingestion::IngestionPipeline;
use intelligence_service::services::insight::InsightGenerator;
use intelligence_service::services::knowledge::KnowledgeStore;
use intelligence_service::services::llm::LlmClient;
use intelligence_service::services::orchestrator::Orchestrator;
use intelligence_service::services::refinement::KnowledgeRefiner;
use intelligence_service::services::relational::{QueryResult, RelationalStore};
use intelligence_service::services::scoring::ScoringEngine;
use intelligence_service::services::templates;
use intelligence_service::services::vector::{FallbackEmbedder, VectorStore};
use intelligence_service::{db, handlers, middleware, models, AppState};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::data::upload,
        handlers::data::list_tables,
        handlers::data::table_schema,
        handlers::data::table_preview,
        handlers::data::delete_table,
        handlers::query::ask,
        handlers::query::sql,
        handlers::query::similar,
        handlers::query::score,
        handlers::query::patterns,
    ),
    components(schemas(
        models::IngestResult,
        models::ColumnInfo,
        models::ColumnType,
        models::TableInfo,
        models::IntelligenceResponse,
        models::ScoredRecord,
        models::ScoreDistribution,
        models::FactorPerformance,
        models::SimilarRecord,
        models::PatternResult,
        models::CollectionInfo,
        QueryResult,
        handlers::data::TableSummary,
        handlers::query::AskRequest,
        handlers::query::SqlRequest,
        handlers::query::SimilarRequest,
        handlers::query::ScoreRequest,
        handlers::query::ScoreResponse,
        handlers::query::PatternsRequest,
    )),
    tags(
        (name = "Data", description = "CSV ingestion and table lifecycle"),
        (name = "Query", description = "Natural-language Q&A, raw SQL, similarity search, scoring"),
        (name = "Knowledge", description = "Scoring rubric, business rules, and refinement"),
        (name = "Insights", description = "Automated findings"),
        (name = "Feedback", description = "Ratings and outcome tracking"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("intelligence-service.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry.with(tracing_subscriber::fmt::layer().with_writer(non_blocking)).with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("intelligence-service starting up");
    tracing::info!("configuration loaded successfully");

    db::ensure_storage_layout(&config.database)?;

    let main_pool = db::connect(&config.database.main_db_path()).await?;
    let feedback_pool = db::connect(&config.database.feedback_db_path()).await?;
    let audit_pool = db::connect(&config.database.audit_db_path()).await?;
    tracing::info!("database pools created successfully");

    let template = templates::load(&config.template.name);

    let relational = Arc::new(RelationalStore::new(main_pool));
    let vector = Arc::new(VectorStore::new(config.database.vectors_dir(), Arc::new(FallbackEmbedder)).await?);
    let knowledge = Arc::new(KnowledgeStore::new(config.database.knowledge_path(), template.clone()).await?);
    let audit = Arc::new(AuditLog::new(audit_pool).await?);
    let feedback = Arc::new(FeedbackStore::new(feedback_pool).await?);

    let ingestion = Arc::new(IngestionPipeline::new(Arc::clone(&relational), Arc::clone(&vector), template.primary_key_hints.clone()));
    let insight = Arc::new(InsightGenerator::new(Arc::clone(&relational)));
    let scoring = Arc::new(ScoringEngine::new(Arc::clone(&knowledge), Arc::clone(&relational)));
    let refiner = Arc::new(KnowledgeRefiner::new(Arc::clone(&knowledge), Arc::clone(&feedback)));

    let brain_llm = LlmClient::new(&config.llm.brain_url);
    let classifier = Classifier::new(brain_llm.clone(), config.llm.temperature_classifier, config.llm.timeout_classifier_secs);
    let nl_to_sql = NlToSql::new(brain_llm.clone(), config.llm.timeout_classifier_secs);
    let orchestrator = Arc::new(Orchestrator::new(
        classifier,
        nl_to_sql,
        Arc::clone(&relational),
        Arc::clone(&vector),
        Arc::clone(&knowledge),
        Arc::clone(&scoring),
        brain_llm,
        config.llm.temperature_synthesis,
        config.llm.timeout_synthesis_secs,
    ));

    let audit_config = config.audit.clone();

    let app_state = Arc::new(AppState {
        config,
        relational,
        vector,
        knowledge,
        audit: Arc::clone(&audit),
        feedback,
        ingestion,
        insight,
        scoring,
        refiner,
        orchestrator,
    });

    if audit_config.enabled {
        let retention_days = audit_config.retention_days;
        let purge_audit = Arc::clone(&audit);
        tokio::spawn(async move {
            match purge_audit.purge(retention_days).await {
                Ok(purged) if purged > 0 => tracing::info!(purged, retention_days, "audit retention purge completed"),
                Ok(_) => {},
                Err(e) => tracing::error!(error = %e, "audit retention purge failed"),
            }
        });
    } else {
        tracing::warn!("audit logging disabled by configuration");
    }

    let data_routes = Router::new()
        .route("/data/upload", post(handlers::data::upload))
        .route("/data/tables", get(handlers::data::list_tables))
        .route("/data/tables/:name/schema", get(handlers::data::table_schema))
        .route("/data/tables/:name/preview", get(handlers::data::table_preview))
        .route("/data/tables/:name", delete(handlers::data::delete_table));

    let query_routes = Router::new()
        .route("/query/ask", post(handlers::query::ask))
        .route("/query/sql", post(handlers::query::sql))
        .route("/query/similar", post(handlers::query::similar))
        .route("/query/score", post(handlers::query::score))
        .route("/query/patterns", post(handlers::query::patterns));

    let knowledge_routes = Router::new()
        .route("/knowledge/scoring", get(handlers::knowledge::list_scoring_factors))
        .route("/knowledge/scoring/:category/:factor", put(handlers::knowledge::update_scoring_factor))
        .route("/knowledge/rules", get(handlers::knowledge::list_rules).post(handlers::knowledge::add_rule))
        .route("/knowledge/metrics", get(handlers::knowledge::list_metrics))
        .route("/knowledge/custom", post(handlers::knowledge::set_custom))
        .route("/knowledge/custom/:key", get(handlers::knowledge::get_custom))
        .route("/knowledge/prompt", get(handlers::knowledge::prompt_card))
        .route("/knowledge/refinement/analyze", get(handlers::knowledge::refinement_analyze))
        .route("/knowledge/refinement/apply", post(handlers::knowledge::refinement_apply));

    let insights_routes = Router::new()
        .route("/insights/generate", get(handlers::insights::generate))
        .route("/insights/high-priority", get(handlers::insights::high_priority))
        .route("/insights/category/:category", get(handlers::insights::by_category));

    let feedback_routes = Router::new()
        .route("/feedback/submit", post(handlers::feedback::submit))
        .route("/feedback/outcome", post(handlers::feedback::outcome))
        .route("/feedback/summary", get(handlers::feedback::summary))
        .route("/feedback/patterns", get(handlers::feedback::patterns))
        .route("/feedback/refinement", get(handlers::feedback::refinement))
        .route("/feedback/history", get(handlers::feedback::history));

    let api_routes = Router::new()
        .merge(data_routes)
        .merge(query_routes)
        .merge(knowledge_routes)
        .merge(insights_routes)
        .merge(feedback_routes)
        .with_state(Arc::clone(&app_state))
        .layer(axum_middleware::from_fn_with_state(audit_config, middleware::audit_middleware));

    let health_routes = Router::new().route("/health", get(health_check)).route("/ready", get(ready_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", app_state.config.server.host, app_state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("intelligence-service is ready to serve requests");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}

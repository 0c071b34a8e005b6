//! Automated insight generator (C10): surfaces trends, anomalies, and
//! opportunities without a user prompt, grounded in
//! `intelligence/core/insights.py::InsightGenerator`.

use serde_json::{Value, json};
use sqlx::Row;
use std::sync::Arc;

use crate::models::{Insight, InsightPriority, InsightReport, InsightType};
use crate::services::relational::RelationalStore;
use crate::services::security;
use crate::utils::ApiError;

pub struct InsightGenerator {
    relational: Arc<RelationalStore>,
}

impl InsightGenerator {
    pub fn new(relational: Arc<RelationalStore>) -> Self {
        Self { relational }
    }

    pub async fn generate_insights(&self, tables: Option<Vec<String>>) -> Result<InsightReport, ApiError> {
        let tables = match tables {
            Some(t) => t,
            None => self.relational.list_tables().await?,
        };

        let mut report = InsightReport { generated_at: chrono::Utc::now(), tables_analyzed: tables.clone(), insights: Vec::new(), summary: String::new() };

        if tables.is_empty() {
            report.summary = "No tables available for analysis.".to_string();
            return Ok(report);
        }

        for table in &tables {
            self.analyze_table(table, &mut report).await?;
        }

        report.summary = generate_summary(&report);
        Ok(report)
    }

    pub async fn get_high_priority_insights(&self, tables: Option<Vec<String>>) -> Result<Vec<Insight>, ApiError> {
        let report = self.generate_insights(tables).await?;
        Ok(report
            .insights
            .into_iter()
            .filter(|i| matches!(i.priority, InsightPriority::High | InsightPriority::Critical))
            .collect())
    }

    pub async fn get_insights_by_category(&self, category: &str, tables: Option<Vec<String>>) -> Result<Vec<Insight>, ApiError> {
        let report = self.generate_insights(tables).await?;
        Ok(report.insights.into_iter().filter(|i| i.category.as_deref() == Some(category)).collect())
    }

    async fn analyze_table(&self, table: &str, report: &mut InsightReport) -> Result<(), ApiError> {
        security::validate_table_name(table)?;
        let info = match self.relational.table_info(table).await {
            Ok(info) => info,
            Err(ApiError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };

        if info.row_count == 0 {
            return Ok(());
        }

        let numeric_columns: Vec<&str> = info
            .columns
            .iter()
            .filter(|c| matches!(c.column_type, crate::models::ColumnType::Integer | crate::models::ColumnType::Real))
            .map(|c| c.name.as_str())
            .collect();

        for column in &numeric_columns {
            self.analyze_numeric_column(table, column, info.row_count, report).await?;
        }

        let has_days_on_lot = info.columns.iter().any(|c| c.name == "days_on_lot");
        if has_days_on_lot {
            self.analyze_inventory_aging(table, report).await?;
        }

        let text_columns: Vec<&str> =
            info.columns.iter().filter(|c| matches!(c.column_type, crate::models::ColumnType::Text)).map(|c| c.name.as_str()).collect();
        self.analyze_distributions(table, &text_columns, report).await?;

        Ok(())
    }

    /// Flags a numeric column when more than 1% of rows sit above
    /// `mean + 3*stddev` (spec.md §4.10's z-score outlier rule).
    async fn analyze_numeric_column(&self, table: &str, column: &str, total_rows: i64, report: &mut InsightReport) -> Result<(), ApiError> {
        let quoted_table = security::quote_identifier(table);
        let quoted_col = security::quote_identifier(column);

        let row = sqlx::query(&format!(
            "SELECT AVG({quoted_col}) as mean, AVG({quoted_col} * {quoted_col}) - AVG({quoted_col}) * AVG({quoted_col}) as variance \
             FROM {quoted_table} WHERE {quoted_col} IS NOT NULL"
        ))
        .fetch_one(self.relational.pool())
        .await
        .map_err(ApiError::from)?;

        let mean: Option<f64> = row.try_get("mean").ok();
        let variance: Option<f64> = row.try_get("variance").ok();
        let (Some(mean), Some(variance)) = (mean, variance) else { return Ok(()) };
        if variance <= 0.0 {
            return Ok(());
        }
        let stddev = variance.sqrt();
        let threshold = mean + 3.0 * stddev;

        let outlier_count: i64 = sqlx::query(&format!("SELECT COUNT(*) FROM {quoted_table} WHERE {quoted_col} > ?"))
            .bind(threshold)
            .fetch_one(self.relational.pool())
            .await
            .map_err(ApiError::from)?
            .get(0);

        if outlier_count > 0 && outlier_count as f64 / total_rows as f64 > 0.01 {
            report.insights.push(Insight {
                insight_type: InsightType::Anomaly,
                priority: InsightPriority::Medium,
                title: format!("Outliers detected in {column}"),
                description: format!("Found {outlier_count} records with {column} values significantly above average ({threshold:.2})"),
                data_points: json!({"column": column, "outlier_count": outlier_count, "threshold": threshold, "average": mean}),
                recommendations: vec![
                    format!("Review records with {column} > {threshold:.2}"),
                    "Check if these represent data quality issues".to_string(),
                ],
                table_name: Some(table.to_string()),
                category: None,
                generated_at: chrono::Utc::now(),
            });
        }

        Ok(())
    }

    /// Aging-bucket analysis over `days_on_lot` for inventory-style tables
    /// (spec.md §4.10), using the thresholds 30/60/90 days.
    async fn analyze_inventory_aging(&self, table: &str, report: &mut InsightReport) -> Result<(), ApiError> {
        let quoted_table = security::quote_identifier(table);
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) as total, \
             SUM(CASE WHEN days_on_lot <= 30 THEN 1 ELSE 0 END) as fresh, \
             SUM(CASE WHEN days_on_lot > 30 AND days_on_lot <= 60 THEN 1 ELSE 0 END) as aged, \
             SUM(CASE WHEN days_on_lot > 60 AND days_on_lot <= 90 THEN 1 ELSE 0 END) as stale, \
             SUM(CASE WHEN days_on_lot > 90 THEN 1 ELSE 0 END) as critical \
             FROM {quoted_table}"
        ))
        .fetch_one(self.relational.pool())
        .await
        .map_err(ApiError::from)?;

        let total: i64 = row.try_get("total").unwrap_or(0);
        if total == 0 {
            return Ok(());
        }
        let fresh: i64 = row.try_get("fresh").unwrap_or(0);
        let stale: i64 = row.try_get("stale").unwrap_or(0);
        let critical: i64 = row.try_get("critical").unwrap_or(0);

        let critical_pct = critical as f64 / total as f64;
        let stale_pct = stale as f64 / total as f64;
        let fresh_pct = fresh as f64 / total as f64;

        if critical_pct > 0.1 {
            report.insights.push(Insight {
                insight_type: InsightType::Risk,
                priority: InsightPriority::High,
                title: "High aged inventory".to_string(),
                description: format!(
                    "{critical} vehicles ({:.0}%) have been on lot for over 90 days. This represents significant carrying costs.",
                    critical_pct * 100.0
                ),
                data_points: json!({"total_vehicles": total, "critical_count": critical, "critical_percentage": critical_pct, "stale_count": stale}),
                recommendations: vec![
                    "Consider price reductions on 90+ day vehicles".to_string(),
                    "Review acquisition strategy to avoid slow-moving inventory".to_string(),
                    "Analyze characteristics of aged vehicles for patterns".to_string(),
                ],
                table_name: Some(table.to_string()),
                category: Some("inventory_health".to_string()),
                generated_at: chrono::Utc::now(),
            });
        } else if stale_pct > 0.15 {
            report.insights.push(Insight {
                insight_type: InsightType::Risk,
                priority: InsightPriority::Medium,
                title: "Growing stale inventory".to_string(),
                description: format!(
                    "{stale} vehicles ({:.0}%) are between 60-90 days. Monitor closely to prevent aging further.",
                    stale_pct * 100.0
                ),
                data_points: json!({"stale_count": stale, "stale_percentage": stale_pct}),
                recommendations: vec!["Proactively market 60-90 day vehicles".to_string(), "Consider targeted promotions".to_string()],
                table_name: Some(table.to_string()),
                category: Some("inventory_health".to_string()),
                generated_at: chrono::Utc::now(),
            });
        }

        if fresh_pct > 0.7 {
            report.insights.push(Insight {
                insight_type: InsightType::Opportunity,
                priority: InsightPriority::Low,
                title: "Healthy inventory turnover".to_string(),
                description: format!("{:.0}% of inventory is under 30 days old. Good inventory velocity!", fresh_pct * 100.0),
                data_points: json!({"fresh_count": fresh, "fresh_percentage": fresh_pct}),
                recommendations: vec![
                    "Maintain current acquisition strategy".to_string(),
                    "Consider expanding inventory if demand supports it".to_string(),
                ],
                table_name: Some(table.to_string()),
                category: Some("inventory_health".to_string()),
                generated_at: chrono::Utc::now(),
            });
        }

        Ok(())
    }

    /// Flags a text column where one value accounts for over 60% of its top
    /// five values, with at least 10 samples (spec.md §4.10). Limited to the
    /// first five text columns per table to bound the number of insights.
    async fn analyze_distributions(&self, table: &str, text_columns: &[&str], report: &mut InsightReport) -> Result<(), ApiError> {
        let quoted_table = security::quote_identifier(table);
        for column in text_columns.iter().take(5) {
            let quoted_col = security::quote_identifier(column);
            let rows = sqlx::query(&format!(
                "SELECT {quoted_col} as value, COUNT(*) as cnt FROM {quoted_table} WHERE {quoted_col} IS NOT NULL \
                 GROUP BY {quoted_col} ORDER BY cnt DESC LIMIT 5"
            ))
            .fetch_all(self.relational.pool())
            .await
            .map_err(ApiError::from)?;

            if rows.len() < 2 {
                continue;
            }

            let counts: Vec<(String, i64)> =
                rows.iter().map(|r| (r.try_get::<String, _>("value").unwrap_or_default(), r.try_get::<i64, _>("cnt").unwrap_or(0))).collect();
            let total: i64 = counts.iter().map(|(_, c)| c).sum();
            let (top_value, top_count) = &counts[0];
            let top_pct = if total > 0 { *top_count as f64 / total as f64 } else { 0.0 };

            if top_pct > 0.6 && total > 10 {
                report.insights.push(Insight {
                    insight_type: InsightType::Comparison,
                    priority: InsightPriority::Low,
                    title: format!("Concentration in {column}"),
                    description: format!(
                        "'{top_value}' represents {:.0}% of values in {column}. Consider if this represents opportunity or risk.",
                        top_pct * 100.0
                    ),
                    data_points: json!({"column": column, "dominant_value": top_value, "percentage": top_pct, "total_records": total}),
                    recommendations: Vec::new(),
                    table_name: Some(table.to_string()),
                    category: None,
                    generated_at: chrono::Utc::now(),
                });
            }
        }
        Ok(())
    }
}

fn generate_summary(report: &InsightReport) -> String {
    if report.insights.is_empty() {
        return "No significant insights found in the current data.".to_string();
    }

    let high_priority = report.insights.iter().filter(|i| matches!(i.priority, InsightPriority::High | InsightPriority::Critical)).count();

    let mut parts = vec![format!("Generated {} insights from {} tables.", report.insights.len(), report.tables_analyzed.len())];
    if high_priority > 0 {
        parts.push(format!("{high_priority} high-priority items require attention."));
    }

    let risk_count = report.insights.iter().filter(|i| matches!(i.insight_type, InsightType::Risk)).count();
    let opportunity_count = report.insights.iter().filter(|i| matches!(i.insight_type, InsightType::Opportunity)).count();
    if risk_count > 0 {
        parts.push(format!("Found {risk_count} risk indicators."));
    }
    if opportunity_count > 0 {
        parts.push(format!("Identified {opportunity_count} opportunities."));
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::table::ColumnType;
    use serde_json::Map as JsonMap;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn generator_with_inventory() -> InsightGenerator {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let relational = Arc::new(RelationalStore::new(pool));

        let columns = vec![("vin".to_string(), ColumnType::Text), ("days_on_lot".to_string(), ColumnType::Integer)];
        let mut rows = Vec::new();
        for (i, days) in [5, 10, 95, 100, 110].into_iter().enumerate() {
            let mut row = JsonMap::new();
            row.insert("vin".to_string(), Value::String(format!("V{i}")));
            row.insert("days_on_lot".to_string(), Value::Number(days.into()));
            rows.push(row);
        }
        relational.replace_table("inventory", &columns, &rows).await.unwrap();

        InsightGenerator::new(relational)
    }

    #[tokio::test]
    async fn flags_high_aged_inventory() {
        let generator = generator_with_inventory().await;
        let report = generator.generate_insights(Some(vec!["inventory".to_string()])).await.unwrap();
        assert!(report.insights.iter().any(|i| i.title == "High aged inventory"));
    }

    #[tokio::test]
    async fn empty_database_reports_no_tables() {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let relational = Arc::new(RelationalStore::new(pool));
        let generator = InsightGenerator::new(relational);
        let report = generator.generate_insights(None).await.unwrap();
        assert_eq!(report.summary, "No tables available for analysis.");
    }
}

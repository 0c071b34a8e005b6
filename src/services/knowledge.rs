//! Knowledge store (C4): scoring factors, business rules, and metrics,
//! seeded from a vertical template and overlaid with a persisted JSON
//! document, grounded in `intelligence/core/knowledge.py::KnowledgeManager`.
//! Reads merge defaults with the overlay (overlay wins); writes always
//! persist the whole overlay, mirroring `save_custom`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::models::{BusinessRule, KnowledgeState, Metric, ScoringFactor};
use crate::services::templates::TemplateDefaults;
use crate::utils::ApiError;

/// On-disk overlay shape, matching `KnowledgeManager.save_custom`/`_load_custom`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct OverlayDocument {
    #[serde(default)]
    scoring_factors: HashMap<String, Vec<ScoringFactor>>,
    #[serde(default)]
    rules: Vec<BusinessRule>,
    #[serde(default)]
    custom: HashMap<String, Value>,
}

/// Reads take a shared lock over the in-memory state (spec.md §5); writers
/// hold exclusive access for the duration of the overlay write.
pub struct KnowledgeStore {
    path: PathBuf,
    state: RwLock<KnowledgeState>,
}

impl KnowledgeStore {
    pub async fn new(path: PathBuf, template: TemplateDefaults) -> Result<Self, ApiError> {
        let mut state = KnowledgeState {
            scoring_factors: template.scoring_factors,
            rules: template.rules,
            metrics: template.metrics,
            custom_knowledge: HashMap::new(),
        };

        if let Ok(raw) = tokio::fs::read_to_string(&path).await {
            match serde_json::from_str::<OverlayDocument>(&raw) {
                Ok(overlay) => apply_overlay(&mut state, overlay),
                Err(err) => tracing::warn!(error = %err, "ignoring malformed knowledge overlay"),
            }
        }

        Ok(Self { path, state: RwLock::new(state) })
    }

    pub async fn scoring_factors(&self, category: &str) -> Vec<ScoringFactor> {
        self.state.read().await.scoring_factors.get(category).cloned().unwrap_or_default()
    }

    pub async fn all_scoring_factors(&self) -> HashMap<String, Vec<ScoringFactor>> {
        self.state.read().await.scoring_factors.clone()
    }

    /// (I4) weight is clamped at zero; calculation and name are never
    /// touched by an overlay update.
    pub async fn update_scoring_factor(
        &self,
        category: &str,
        name: &str,
        weight: Option<i64>,
        description: Option<String>,
    ) -> Result<bool, ApiError> {
        let mut updated = false;
        {
            let mut state = self.state.write().await;
            if let Some(factors) = state.scoring_factors.get_mut(category) {
                for factor in factors.iter_mut() {
                    if factor.name == name {
                        if let Some(w) = weight {
                            factor.weight = w.max(0);
                        }
                        if let Some(d) = description {
                            factor.description = d;
                        }
                        updated = true;
                        break;
                    }
                }
            }
        }
        if updated {
            self.persist().await?;
        }
        Ok(updated)
    }

    pub async fn business_rules(&self) -> Vec<BusinessRule> {
        self.state.read().await.rules.clone()
    }

    pub async fn add_business_rule(&self, rule: BusinessRule) -> Result<BusinessRule, ApiError> {
        {
            let mut state = self.state.write().await;
            state.rules.push(rule.clone());
        }
        self.persist().await?;
        Ok(rule)
    }

    pub async fn metrics(&self) -> HashMap<String, Metric> {
        self.state.read().await.metrics.clone()
    }

    pub async fn metric(&self, name: &str) -> Option<Metric> {
        self.state.read().await.metrics.get(name).cloned()
    }

    pub async fn custom(&self, key: &str) -> Option<Value> {
        self.state.read().await.custom_knowledge.get(key).cloned()
    }

    pub async fn set_custom(&self, key: String, value: Value) -> Result<(), ApiError> {
        {
            let mut state = self.state.write().await;
            state.custom_knowledge.insert(key, value);
        }
        self.persist().await
    }

    /// Compact, human-readable serialization for LLM prompt injection
    /// (GLOSSARY "Knowledge card"), mirroring `export_for_prompt`.
    pub async fn export_for_prompt(&self) -> String {
        let state = self.state.read().await;
        let mut lines = vec!["## Domain Knowledge".to_string(), String::new()];

        if !state.scoring_factors.is_empty() {
            lines.push("### What Makes a Good Outcome".to_string());
            for (category, factors) in &state.scoring_factors {
                lines.push(format!("\n**{}:**", title_case(category)));
                let mut sorted = factors.clone();
                sorted.sort_by(|a, b| b.weight.cmp(&a.weight));
                for f in sorted {
                    lines.push(format!("- {} (weight: {})", f.description, f.weight));
                }
            }
        }

        if !state.rules.is_empty() {
            lines.push("\n### Business Rules".to_string());
            for rule in &state.rules {
                lines.push(format!("- **{}**: {}", rule.name, rule.description));
            }
        }

        if !state.metrics.is_empty() {
            lines.push("\n### Key Metrics".to_string());
            for (name, metric) in &state.metrics {
                let direction = if metric.lower_is_better { "lower" } else { "higher" };
                lines.push(format!(
                    "- **{}**: target {}, warning at {}, critical at {} ({} is better)",
                    name, metric.target, metric.warning, metric.critical, direction
                ));
            }
        }

        lines.join("\n")
    }

    async fn persist(&self) -> Result<(), ApiError> {
        let overlay = {
            let state = self.state.read().await;
            OverlayDocument {
                scoring_factors: state.scoring_factors.clone(),
                rules: state.rules.clone(),
                custom: state.custom_knowledge.clone(),
            }
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::storage(format!("creating knowledge dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&overlay)
            .map_err(|e| ApiError::storage(format!("serializing knowledge overlay: {e}")))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| ApiError::storage(format!("writing knowledge overlay: {e}")))
    }
}

fn apply_overlay(state: &mut KnowledgeState, overlay: OverlayDocument) {
    for (category, factors) in overlay.scoring_factors {
        let bucket = state.scoring_factors.entry(category).or_default();
        for factor in factors {
            if let Some(existing) = bucket.iter_mut().find(|f| f.name == factor.name) {
                existing.weight = factor.weight;
                existing.description = factor.description;
            } else {
                bucket.push(factor);
            }
        }
    }

    for rule in overlay.rules {
        if !state.rules.iter().any(|r| r.name == rule.name) {
            state.rules.push(rule);
        }
    }

    state.custom_knowledge.extend(overlay.custom);
}

fn title_case(category: &str) -> String {
    category
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::templates;

    #[tokio::test]
    async fn update_clamps_weight_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::new(dir.path().join("knowledge.json"), templates::load("generic"))
            .await
            .unwrap();

        let updated = store.update_scoring_factor("perfect_sale", "timely", Some(-5), None).await.unwrap();
        assert!(updated);
        let factors = store.scoring_factors("perfect_sale").await;
        let timely = factors.iter().find(|f| f.name == "timely").unwrap();
        assert_eq!(timely.weight, 0);
    }

    #[tokio::test]
    async fn overlay_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        {
            let store = KnowledgeStore::new(path.clone(), templates::load("generic")).await.unwrap();
            store.update_scoring_factor("perfect_sale", "timely", Some(99), None).await.unwrap();
        }

        let reloaded = KnowledgeStore::new(path, templates::load("generic")).await.unwrap();
        let factors = reloaded.scoring_factors("perfect_sale").await;
        let timely = factors.iter().find(|f| f.name == "timely").unwrap();
        assert_eq!(timely.weight, 99);
    }
}

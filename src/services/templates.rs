//! Vertical template loader. Per-vertical YAML bundles are an external
//! collaborator out of scope per spec.md §1; this module ships the single
//! built-in "generic" template (seed scoring factors, rules, metrics, and
//! primary-key hints) that spec.md §4.4/§4.7 assume is always available,
//! grounded in `intelligence/templates/base.py::VerticalTemplate` and the
//! `PRIMARY_KEY_HINTS`/default scoring config of
//! `intelligence/core/ingest.py` and `intelligence/core/knowledge.py`.

use std::collections::HashMap;

use crate::models::{BusinessRule, Metric, RuleSeverity, ScoringFactor};

/// Default knowledge a template seeds the knowledge store with, plus the
/// ordered primary-key hint list the ingestion pipeline (C7) consults.
#[derive(Debug, Clone)]
pub struct TemplateDefaults {
    pub name: String,
    pub scoring_factors: HashMap<String, Vec<ScoringFactor>>,
    pub rules: Vec<BusinessRule>,
    pub metrics: HashMap<String, Metric>,
    pub primary_key_hints: Vec<String>,
}

/// Loads a vertical template by name. Unknown names fall back to
/// `"generic"` rather than failing, mirroring the source's `PRIMARY_KEY_HINTS`
/// dict's `.get(template, PRIMARY_KEY_HINTS["generic"])` fallback behavior
/// extended to the whole template.
pub fn load(name: &str) -> TemplateDefaults {
    match name {
        "generic" => generic(),
        _ => {
            tracing::warn!(template = name, "unknown vertical template, using 'generic'");
            generic()
        },
    }
}

fn generic() -> TemplateDefaults {
    let mut scoring_factors = HashMap::new();
    scoring_factors.insert(
        "perfect_sale".to_string(),
        vec![
            ScoringFactor {
                name: "has_identifier".to_string(),
                description: "Record carries a primary identifier".to_string(),
                weight: 20,
                calculation: "id IS NOT NULL".to_string(),
            },
            ScoringFactor {
                name: "timely".to_string(),
                description: "Turned around in 30 days or less".to_string(),
                weight: 20,
                calculation: "days_to_close <= 30".to_string(),
            },
            ScoringFactor {
                name: "profitable".to_string(),
                description: "Margin exceeds 15% of sale price".to_string(),
                weight: 30,
                calculation: "margin / sale_price > 0.15".to_string(),
            },
            ScoringFactor {
                name: "complete".to_string(),
                description: "Record has a recorded status of closed".to_string(),
                weight: 30,
                calculation: "status = 'closed'".to_string(),
            },
        ],
    );

    let rules = vec![BusinessRule {
        name: "no_negative_margin".to_string(),
        description: "Flag records with a negative margin".to_string(),
        condition: "margin >= 0".to_string(),
        severity: RuleSeverity::Warning,
    }];

    let mut metrics = HashMap::new();
    metrics.insert(
        "days_to_close".to_string(),
        Metric {
            name: "days_to_close".to_string(),
            description: "Average days to close a record".to_string(),
            target: 30.0,
            warning: 60.0,
            critical: 90.0,
            lower_is_better: true,
        },
    );

    TemplateDefaults {
        name: "generic".to_string(),
        scoring_factors,
        rules,
        metrics,
        primary_key_hints: vec!["id".to_string(), "ID".to_string(), "Id".to_string(), "key".to_string(), "KEY".to_string()],
    }
}

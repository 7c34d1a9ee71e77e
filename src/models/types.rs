//! Type definitions for the risk-scoring pipeline
//! All core data structures shared between stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::utils::constants::{REVIEW_CONFIDENCE_FLOOR, REVIEW_SCORE_WINDOW};

// ============================================
// RAW INPUT
// ============================================

/// One raw attribute value as delivered by the upstream data service.
///
/// JSON mapping: bool -> `Flag`, number -> `Number`, string -> `Text`,
/// null -> `Missing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Missing,
}

impl FeatureValue {
    /// Numerical view of the value. Flags map to 1.0 / 0.0, numeric text is
    /// parsed, anything non-finite or unparseable is `None`.
    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            FeatureValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            FeatureValue::Number(n) => Some(*n),
            FeatureValue::Text(s) => s.trim().parse::<f64>().ok(),
            FeatureValue::Missing => None,
        };
        value.filter(|v| v.is_finite())
    }

    /// Categorical view of the value.
    pub fn as_category(&self) -> Option<String> {
        match self {
            FeatureValue::Flag(b) => Some(b.to_string()),
            FeatureValue::Number(n) if n.is_finite() => Some(n.to_string()),
            FeatureValue::Number(_) => None,
            FeatureValue::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            FeatureValue::Text(_) => None,
            FeatureValue::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FeatureValue::Missing)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Flag(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

/// Where a value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Authoritative, verified data
    Verified,
    /// Fallback / default supplied upstream or by the pipeline
    Fallback,
}

/// Raw attributes of one borrowing entity.
///
/// Provenance is tracked per feature: names listed in `fallback_features`
/// came from non-authoritative data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub entity_id: String,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
    #[serde(default)]
    pub fallback_features: BTreeSet<String>,
}

impl FeatureVector {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ..Default::default()
        }
    }

    /// Builder: add a verified value
    pub fn with(mut self, name: &str, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.to_string(), value.into());
        self
    }

    /// Builder: add a value flagged as fallback data
    pub fn with_fallback(mut self, name: &str, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.to_string(), value.into());
        self.fallback_features.insert(name.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.features.get(name).and_then(FeatureValue::as_number)
    }

    pub fn provenance(&self, name: &str) -> Provenance {
        if self.fallback_features.contains(name) {
            Provenance::Fallback
        } else {
            Provenance::Verified
        }
    }

    /// True when any present value is flagged as fallback data
    pub fn has_fallback_values(&self) -> bool {
        self.fallback_features
            .iter()
            .any(|name| self.features.contains_key(name))
    }
}

/// Post-derivation values of one row in natural units (before log / clip /
/// scaling). Consumed by scorecards and recommendation rules.
pub type FeatureContext = BTreeMap<String, f64>;

/// Per-row account of how much of the row was filled in by the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowProvenance {
    /// Present input values flagged as fallback upstream
    pub fallback_inputs: usize,
    /// Numerical cells replaced by the fitted imputer
    pub imputed: usize,
    /// Derived features that fell back to their default value
    pub defaulted_derived: usize,
    /// Number of numerical + derived columns in the row
    pub total_columns: usize,
}

impl RowProvenance {
    /// Share of the row's columns that did not come from observed data
    pub fn filled_fraction(&self) -> f64 {
        if self.total_columns == 0 {
            return 0.0;
        }
        ((self.imputed + self.defaulted_derived) as f64 / self.total_columns as f64).min(1.0)
    }

    /// Row counts as fallback-derived for uncertainty purposes
    pub fn is_fallback(&self, fraction_threshold: f64) -> bool {
        self.fallback_inputs > 0 || self.filled_fraction() >= fraction_threshold
    }
}

// ============================================
// BASE MODEL OUTPUT
// ============================================

/// Output of one base model over a batch. `scores.len()` always equals the
/// batch row count, even when the model failed (`degraded`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseModelOutput {
    pub model: String,
    pub scores: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<BTreeMap<String, f64>>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BaseModelOutput {
    /// Zero-filled placeholder for a failed model
    pub fn placeholder(model: &str, rows: usize, error: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            scores: vec![0.0; rows],
            importance: None,
            degraded: true,
            error: Some(error.into()),
        }
    }
}

// ============================================
// ASSESSMENT OUTPUT
// ============================================

/// Final risk assessment of one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub assessment_id: Uuid,
    pub entity_id: String,
    /// Overall score (0-100)
    pub score: f64,
    /// Risk band label
    pub label: String,
    /// Position of the band in the band table (0 = lowest risk)
    pub band_rank: usize,
    /// 1 - uncertainty
    pub confidence: f64,
    /// Uncertainty (0.0-1.0)
    pub uncertainty: f64,
    /// Per base model score (0-100) plus the meta-learner's own
    pub component_scores: BTreeMap<String, f64>,
    /// Base models that were replaced by placeholders for this assessment
    pub degraded_models: Vec<String>,
    pub model_version: String,
    /// Gray area: needs a human look before a decision
    pub needs_review: bool,
    pub timestamp: DateTime<Utc>,
}

impl RiskAssessment {
    /// Assemble an assessment, enforcing the bounds and the
    /// `confidence = 1 - uncertainty` relation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_id: &str,
        probability: f64,
        uncertainty: f64,
        label: &str,
        band_rank: usize,
        component_scores: BTreeMap<String, f64>,
        degraded_models: Vec<String>,
        model_version: &str,
    ) -> Self {
        let score = Self::score_from_probability(probability);
        let uncertainty = if uncertainty.is_finite() {
            uncertainty.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let confidence = 1.0 - uncertainty;
        let needs_review = REVIEW_SCORE_WINDOW.contains(&score) || confidence < REVIEW_CONFIDENCE_FLOOR;

        Self {
            assessment_id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            score,
            label: label.to_string(),
            band_rank,
            confidence,
            uncertainty,
            component_scores,
            degraded_models,
            model_version: model_version.to_string(),
            needs_review,
            timestamp: Utc::now(),
        }
    }

    /// 0-100 score of a probability; non-finite input maps to the midpoint
    pub fn score_from_probability(probability: f64) -> f64 {
        let probability = if probability.is_finite() { probability } else { 0.5 };
        (probability * 100.0).clamp(0.0, 100.0)
    }

    /// Pretty print the assessment
    pub fn summary(&self) -> String {
        let mut output = format!(
            "\n{} | Score: {:.1} | {} | Confidence: {:.0}%\n",
            self.entity_id,
            self.score,
            self.label,
            self.confidence * 100.0
        );
        output.push_str(&format!("   Model: {}\n", self.model_version));
        for (component, score) in &self.component_scores {
            output.push_str(&format!("     - {}: {:.1}\n", component, score));
        }
        if !self.degraded_models.is_empty() {
            output.push_str(&format!("   Degraded: {}\n", self.degraded_models.join(", ")));
        }
        if self.needs_review {
            output.push_str("   ⚠️ Manual review recommended\n");
        }
        output
    }
}

/// Impact level of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
    /// Good news (e.g. eligibility for better terms)
    Positive,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::High => "HIGH",
            ImpactLevel::Medium => "MEDIUM",
            ImpactLevel::Low => "LOW",
            ImpactLevel::Positive => "POSITIVE",
        }
    }
}

/// User-facing guidance produced by a matching rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub rule_id: String,
    pub title: String,
    pub description: String,
    pub impact: ImpactLevel,
}

/// Assessment plus guidance, the unit handed to the decision layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub assessment: RiskAssessment,
    pub recommendations: Vec<Recommendation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_value_json_mapping() {
        let fv: FeatureVector = serde_json::from_str(
            r#"{"entity_id":"0xabc","features":{"a":1.5,"b":true,"c":"eth","d":null},
                "fallback_features":["a"]}"#,
        )
        .unwrap();
        assert_eq!(fv.get("a"), Some(&FeatureValue::Number(1.5)));
        assert_eq!(fv.get("b"), Some(&FeatureValue::Flag(true)));
        assert_eq!(fv.get("c"), Some(&FeatureValue::Text("eth".into())));
        assert_eq!(fv.get("d"), Some(&FeatureValue::Missing));
        assert_eq!(fv.provenance("a"), Provenance::Fallback);
        assert_eq!(fv.provenance("b"), Provenance::Verified);
        assert!(fv.has_fallback_values());
    }

    #[test]
    fn test_as_number() {
        assert_eq!(FeatureValue::Flag(true).as_number(), Some(1.0));
        assert_eq!(FeatureValue::Text(" 2.5 ".into()).as_number(), Some(2.5));
        assert_eq!(FeatureValue::Text("n/a".into()).as_number(), None);
        assert_eq!(FeatureValue::Number(f64::NAN).as_number(), None);
        assert_eq!(FeatureValue::Missing.as_number(), None);
    }

    #[test]
    fn test_assessment_invariants() {
        let a = RiskAssessment::new("e1", 1.7, -0.3, "High", 3, BTreeMap::new(), vec![], "v0001");
        assert_eq!(a.score, 100.0);
        assert_eq!(a.uncertainty, 0.0);
        assert_eq!(a.confidence, 1.0);

        let b = RiskAssessment::new("e2", 0.25, 0.3, "Low", 1, BTreeMap::new(), vec![], "v0001");
        assert!((b.confidence + b.uncertainty - 1.0).abs() < 1e-12);
        assert!((b.score - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_row_provenance_fraction() {
        let p = RowProvenance {
            fallback_inputs: 0,
            imputed: 2,
            defaulted_derived: 1,
            total_columns: 6,
        };
        assert!((p.filled_fraction() - 0.5).abs() < 1e-12);
        assert!(p.is_fallback(0.5));
        assert!(!p.is_fallback(0.6));
    }
}

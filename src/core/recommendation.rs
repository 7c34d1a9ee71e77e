//! Recommendation Engine
//!
//! Rules are plain data: a tagged condition tree over the row's feature
//! context plus the assessment outputs (`risk_score`, `uncertainty`,
//! `confidence`, `band_rank`). Every matching rule fires; when none match the
//! "Maintain Current Status" fallback is emitted, so the result is never empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::errors::{AppError, AppResult};
use crate::models::types::{FeatureContext, ImpactLevel, Recommendation, RiskAssessment};
use crate::utils::constants::*;

pub const CTX_RISK_SCORE: &str = "risk_score";
pub const CTX_UNCERTAINTY: &str = "uncertainty";
pub const CTX_CONFIDENCE: &str = "confidence";
pub const CTX_BAND_RANK: &str = "band_rank";

const EQ_EPSILON: f64 = 1e-9;

// ============================================
// CONDITIONS
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    /// NaN on either side never matches
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        if lhs.is_nan() || rhs.is_nan() {
            return false;
        }
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => (lhs - rhs).abs() <= EQ_EPSILON,
            CompareOp::Ne => (lhs - rhs).abs() > EQ_EPSILON,
        }
    }
}

/// Condition tree. JSON: `{"kind": "compare", "feature": "...", "op": "lt", "value": 1.5}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Compare { feature: String, op: CompareOp, value: f64 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    Present { feature: String },
}

impl Condition {
    pub fn compare(feature: &str, op: CompareOp, value: f64) -> Self {
        Condition::Compare {
            feature: feature.to_string(),
            op,
            value,
        }
    }

    pub fn present(feature: &str) -> Self {
        Condition::Present {
            feature: feature.to_string(),
        }
    }

    /// Missing features make comparisons false
    pub fn evaluate(&self, ctx: &BTreeMap<String, f64>) -> bool {
        match self {
            Condition::Compare { feature, op, value } => {
                ctx.get(feature).map(|v| op.apply(*v, *value)).unwrap_or(false)
            }
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(ctx)),
            Condition::Not { condition } => !condition.evaluate(ctx),
            Condition::Present { feature } => ctx.get(feature).map(|v| v.is_finite()).unwrap_or(false),
        }
    }

    fn validate(&self, rule_id: &str) -> AppResult<()> {
        match self {
            Condition::Compare { value, feature, .. } if !value.is_finite() => Err(AppError::invalid_config(
                format!("rule '{}': non-finite threshold for '{}'", rule_id, feature),
            )),
            Condition::All { conditions } | Condition::Any { conditions } => {
                conditions.iter().try_for_each(|c| c.validate(rule_id))
            }
            Condition::Not { condition } => condition.validate(rule_id),
            _ => Ok(()),
        }
    }
}

// ============================================
// RULES
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRule {
    pub id: String,
    /// Lower fires first
    #[serde(default)]
    pub priority: u32,
    pub when: Condition,
    pub title: String,
    pub description: String,
    pub impact: ImpactLevel,
}

impl RecommendationRule {
    fn to_recommendation(&self) -> Recommendation {
        Recommendation {
            rule_id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            impact: self.impact,
        }
    }
}

/// Lending guidance rules
pub fn default_rules() -> Vec<RecommendationRule> {
    use CompareOp::*;
    vec![
        RecommendationRule {
            id: "add_collateral".to_string(),
            priority: 1,
            when: Condition::compare(FEATURE_COLLATERAL_RATIO, Lt, 1.5),
            title: "Add More Collateral".to_string(),
            description: "Your collateral ratio is below 1.5. Adding collateral reduces liquidation risk and improves your score.".to_string(),
            impact: ImpactLevel::High,
        },
        RecommendationRule {
            id: "improve_repayment".to_string(),
            priority: 1,
            when: Condition::compare(FEATURE_REPAYMENT_RATIO, Lt, 0.8),
            title: "Improve Repayment History".to_string(),
            description: "Repay outstanding loans on time to raise your repayment ratio above 80%.".to_string(),
            impact: ImpactLevel::High,
        },
        RecommendationRule {
            id: "increase_activity".to_string(),
            priority: 2,
            when: Condition::compare(FEATURE_TRANSACTION_COUNT, Lt, 10.0),
            title: "Increase On-Chain Activity".to_string(),
            description: "A longer transaction history gives lenders more evidence of reliable behaviour.".to_string(),
            impact: ImpactLevel::Medium,
        },
        RecommendationRule {
            id: "verify_identity".to_string(),
            priority: 2,
            when: Condition::Any {
                conditions: vec![
                    Condition::compare(FEATURE_IDENTITY_VERIFIED, Lt, 0.5),
                    Condition::Not {
                        condition: Box::new(Condition::present(FEATURE_IDENTITY_VERIFIED)),
                    },
                ],
            },
            title: "Complete Identity Verification".to_string(),
            description: "Verified identities qualify for lower rates and higher limits.".to_string(),
            impact: ImpactLevel::Medium,
        },
        RecommendationRule {
            id: "better_terms".to_string(),
            priority: 3,
            when: Condition::All {
                conditions: vec![
                    Condition::compare(CTX_RISK_SCORE, Lt, 40.0),
                    Condition::compare(FEATURE_COLLATERAL_RATIO, Ge, 2.0),
                    Condition::compare(FEATURE_REPAYMENT_RATIO, Ge, 0.9),
                ],
            },
            title: "Eligible for Better Terms".to_string(),
            description: "Your strong collateral and repayment record qualify you for reduced rates.".to_string(),
            impact: ImpactLevel::Positive,
        },
        RecommendationRule {
            id: "review_data_quality".to_string(),
            priority: 4,
            when: Condition::compare(CTX_UNCERTAINTY, Gt, 0.5),
            title: "Review Data Quality".to_string(),
            description: "Parts of this assessment relied on fallback data. Connecting more verified sources will sharpen it.".to_string(),
            impact: ImpactLevel::Low,
        },
    ]
}

// ============================================
// ENGINE
// ============================================

#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    /// Sorted by (priority, declaration order)
    rules: Vec<RecommendationRule>,
}

impl RecommendationEngine {
    pub fn new(rules: Vec<RecommendationRule>) -> AppResult<Self> {
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(AppError::invalid_config("recommendation rule with empty id"));
            }
            rule.when.validate(&rule.id)?;
        }
        let mut rules = rules;
        // stable: ties keep declaration order
        rules.sort_by_key(|r| r.priority);
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RecommendationRule] {
        &self.rules
    }

    /// Feature context extended with the assessment outputs
    pub fn evaluation_context(assessment: &RiskAssessment, context: &FeatureContext) -> BTreeMap<String, f64> {
        let mut ctx = context.clone();
        ctx.insert(CTX_RISK_SCORE.to_string(), assessment.score);
        ctx.insert(CTX_UNCERTAINTY.to_string(), assessment.uncertainty);
        ctx.insert(CTX_CONFIDENCE.to_string(), assessment.confidence);
        ctx.insert(CTX_BAND_RANK.to_string(), assessment.band_rank as f64);
        ctx
    }

    /// All matching rules in order, or the fallback
    pub fn recommend(&self, assessment: &RiskAssessment, context: &FeatureContext) -> Vec<Recommendation> {
        let ctx = Self::evaluation_context(assessment, context);
        let mut out: Vec<Recommendation> = self
            .rules
            .iter()
            .filter(|rule| rule.when.evaluate(&ctx))
            .map(RecommendationRule::to_recommendation)
            .collect();

        if out.is_empty() {
            out.push(Recommendation {
                rule_id: FALLBACK_RULE_ID.to_string(),
                title: FALLBACK_TITLE.to_string(),
                description: FALLBACK_DESCRIPTION.to_string(),
                impact: ImpactLevel::Low,
            });
        }

        debug!("💡 {} recommendation(s) for {}", out.len(), assessment.entity_id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessment(score: f64, uncertainty: f64) -> RiskAssessment {
        RiskAssessment::new("e", score / 100.0, uncertainty, "x", 0, BTreeMap::new(), vec![], "v0001")
    }

    fn ctx(pairs: &[(&str, f64)]) -> FeatureContext {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_strong_borrower_gets_better_terms() {
        let engine = RecommendationEngine::new(default_rules()).unwrap();
        let recs = engine.recommend(
            &assessment(12.0, 0.1),
            &ctx(&[
                (FEATURE_COLLATERAL_RATIO, 2.5),
                (FEATURE_REPAYMENT_RATIO, 0.95),
                (FEATURE_TRANSACTION_COUNT, 50.0),
                (FEATURE_IDENTITY_VERIFIED, 1.0),
            ]),
        );
        let titles: Vec<&str> = recs.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Eligible for Better Terms"]);
        assert_eq!(recs[0].impact, ImpactLevel::Positive);
    }

    #[test]
    fn test_weak_borrower_ordering() {
        let engine = RecommendationEngine::new(default_rules()).unwrap();
        let recs = engine.recommend(
            &assessment(90.0, 0.7),
            &ctx(&[
                (FEATURE_COLLATERAL_RATIO, 1.1),
                (FEATURE_REPAYMENT_RATIO, 0.4),
                (FEATURE_TRANSACTION_COUNT, 2.0),
            ]),
        );
        let ids: Vec<&str> = recs.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "add_collateral",
                "improve_repayment",
                "increase_activity",
                "verify_identity",
                "review_data_quality"
            ]
        );
        assert_eq!(recs[0].impact, ImpactLevel::High);
    }

    #[test]
    fn test_fallback_when_nothing_matches() {
        let engine = RecommendationEngine::new(vec![]).unwrap();
        let recs = engine.recommend(&assessment(50.0, 0.2), &FeatureContext::new());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].title, FALLBACK_TITLE);
    }

    #[test]
    fn test_missing_feature_is_false() {
        let cond = Condition::compare("nope", CompareOp::Ne, 1.0);
        assert!(!cond.evaluate(&BTreeMap::new()));
        let not = Condition::Not {
            condition: Box::new(cond),
        };
        assert!(not.evaluate(&BTreeMap::new()));
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"{
            "id": "low_band",
            "priority": 0,
            "when": {"kind": "all", "conditions": [
                {"kind": "compare", "feature": "band_rank", "op": "le", "value": 1},
                {"kind": "present", "feature": "chain_score"}
            ]},
            "title": "t", "description": "d", "impact": "positive"
        }"#;
        let rule: RecommendationRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.impact, ImpactLevel::Positive);
        assert!(rule.when.evaluate(&ctx(&[("band_rank", 1.0), ("chain_score", 3.0)])));
        assert!(!rule.when.evaluate(&ctx(&[("band_rank", 1.0)])));
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        let mut rules = default_rules();
        rules[0].when = Condition::compare("x", CompareOp::Gt, f64::NAN);
        assert!(RecommendationEngine::new(rules).is_err());
    }
}

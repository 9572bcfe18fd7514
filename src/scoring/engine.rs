use crate::models::feature_names::{FACE_SIMILARITY, TEXTRACT_CONF_AVG, VELOCITY_COUNT_24H};
use crate::models::{Decision, FeatureSet, RuleConfig, ScoreResult, Thresholds};
use crate::scoring::expr::{Context, Predicate};
use log::{debug, warn};

/// Velocity counts saturate at this many events.
const VELOCITY_SATURATION: f64 = 5.0;

pub struct Scorer;

impl Scorer {
    /// Reduce a feature vector to a score, the triggered reasons and a decision.
    pub fn score(features: &FeatureSet, rules: &RuleConfig) -> ScoreResult {
        let score = Self::weighted_score(features, rules);
        let reasons = Self::evaluate_reasons(features, rules);
        let decision = Self::decide(score, &rules.thresholds);
        debug!("Scored {:.4} -> {} with {} reasons", score, decision, reasons.len());
        ScoreResult {
            score,
            reasons,
            decision,
        }
    }

    /// Weighted mean of normalized feature values; 0 when no weight is set.
    pub fn weighted_score(features: &FeatureSet, rules: &RuleConfig) -> f64 {
        let mut score = 0.0;
        let mut total_weight = 0.0;
        for (name, weight) in &rules.weights {
            // Only reachable with a config that skipped RuleConfig::validate
            if !weight.is_finite() || *weight < 0.0 {
                continue;
            }
            score += weight * Self::normalize(name, features.value_of(name));
            total_weight += weight;
        }
        if total_weight > 0.0 {
            score / total_weight
        } else {
            0.0
        }
    }

    /// Bring a raw feature value onto the unit interval.
    pub fn normalize(name: &str, value: f64) -> f64 {
        let value = match name {
            FACE_SIMILARITY | TEXTRACT_CONF_AVG => value / 100.0,
            VELOCITY_COUNT_24H => (value / VELOCITY_SATURATION).min(1.0),
            _ => value,
        };
        value.clamp(0.0, 1.0)
    }

    /// Reasons whose predicates hold, in rule order. A predicate that fails
    /// to parse, names an unknown feature, or errors while evaluating is skipped.
    pub fn evaluate_reasons(features: &FeatureSet, rules: &RuleConfig) -> Vec<String> {
        let ctx = Context::from_features(features);
        let mut reasons = Vec::new();
        for rule in &rules.explanations {
            if rule.when.trim().is_empty() {
                continue;
            }
            let outcome = Predicate::parse(&rule.when).and_then(|p| p.evaluate(&ctx));
            match outcome {
                Ok(true) => reasons.push(rule.reason_text().to_string()),
                Ok(false) => {}
                Err(e) => warn!("Skipping explanation '{}': {}", rule.when, e),
            }
        }
        reasons
    }

    /// Reject is inclusive of its threshold, approve is exclusive.
    pub fn decide(score: f64, thresholds: &Thresholds) -> Decision {
        if score >= thresholds.reject {
            Decision::Reject
        } else if score < thresholds.approve {
            Decision::Approve
        } else {
            Decision::Review
        }
    }
}

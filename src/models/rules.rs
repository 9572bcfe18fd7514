use crate::utils::IdRiskError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_APPROVE_THRESHOLD: f64 = 0.25;
pub const DEFAULT_REJECT_THRESHOLD: f64 = 0.6;

fn default_approve() -> f64 {
    DEFAULT_APPROVE_THRESHOLD
}

fn default_reject() -> f64 {
    DEFAULT_REJECT_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_approve")]
    pub approve: f64,
    #[serde(default = "default_reject")]
    pub reject: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            approve: DEFAULT_APPROVE_THRESHOLD,
            reject: DEFAULT_REJECT_THRESHOLD,
        }
    }
}

/// A predicate over features and the reason reported when it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRule {
    #[serde(alias = "predicate", default)]
    pub when: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ExplanationRule {
    pub fn new(when: &str, reason: &str) -> Self {
        ExplanationRule {
            when: when.to_string(),
            reason: Some(reason.to_string()),
        }
    }

    /// Falls back to the predicate text when no reason is configured.
    pub fn reason_text(&self) -> &str {
        match &self.reason {
            Some(reason) if !reason.is_empty() => reason,
            _ => &self.when,
        }
    }
}

/// Declarative scoring configuration. Immutable once loaded; share it
/// behind an `Arc` between workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub explanations: Vec<ExplanationRule>,
}

impl RuleConfig {
    /// Load a rule file; `.toml` files are read as TOML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self, IdRiskError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IdRiskError::IoError(format!("Failed to read rules {}: {}", path.display(), e))
        })?;
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let rules = if is_toml {
            Self::from_toml_str(&text)?
        } else {
            Self::from_json_str(&text)?
        };
        debug!(
            "Loaded {} weights and {} explanations from {}",
            rules.weights.len(),
            rules.explanations.len(),
            path.display()
        );
        Ok(rules)
    }

    pub fn from_json_str(text: &str) -> Result<Self, IdRiskError> {
        let rules: RuleConfig = serde_json::from_str(text)
            .map_err(|e| IdRiskError::ConfigError(format!("Invalid rules document: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, IdRiskError> {
        let rules: RuleConfig = toml::from_str(text)
            .map_err(|e| IdRiskError::ConfigError(format!("Invalid rules document: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Reject configurations that would produce meaningless scores or decisions.
    pub fn validate(&self) -> Result<(), IdRiskError> {
        let mut total_weight = 0.0;
        for (name, weight) in &self.weights {
            if !weight.is_finite() {
                return Err(IdRiskError::ConfigError(format!(
                    "Weight for '{}' is not a finite number",
                    name
                )));
            }
            if *weight < 0.0 {
                return Err(IdRiskError::ConfigError(format!(
                    "Weight for '{}' is negative ({})",
                    name, weight
                )));
            }
            total_weight += weight;
        }
        if total_weight <= 0.0 {
            return Err(IdRiskError::ConfigError(
                "Total weight must be greater than zero".to_string(),
            ));
        }

        let Thresholds { approve, reject } = self.thresholds;
        for (label, value) in [("approve", approve), ("reject", reject)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(IdRiskError::ConfigError(format!(
                    "Threshold '{}' must be within [0, 1], got {}",
                    label, value
                )));
            }
        }
        if approve > reject {
            return Err(IdRiskError::ConfigError(format!(
                "Approve threshold {} exceeds reject threshold {}",
                approve, reject
            )));
        }
        Ok(())
    }

    /// Built-in balanced configuration over the "badness" features.
    pub fn default_rules() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert("blur_score".to_string(), 1.0);
        weights.insert("glare_score".to_string(), 1.0);
        weights.insert("velocity_count_24h".to_string(), 1.5);
        weights.insert("device_hash_dup".to_string(), 2.0);
        weights.insert("ip_risk_score".to_string(), 1.5);
        weights.insert("field_consistency_flags".to_string(), 1.0);

        let explanations = vec![
            ExplanationRule::new("mrz_valid == 0", "MRZ checksum mismatch"),
            ExplanationRule::new("expiry_valid == 0", "Document expired or expiry unreadable"),
            ExplanationRule::new("face_similarity < 80", "Selfie does not match document photo"),
            ExplanationRule::new("textract_conf_avg < 70", "Low OCR confidence"),
            ExplanationRule::new("blur_score > 0.6", "Document image is blurry"),
            ExplanationRule::new("glare_score > 0.3", "Glare on document image"),
            ExplanationRule::new(
                "device_hash_dup == 1 or velocity_count_24h > 3",
                "Device seen repeatedly in the last 24h",
            ),
            ExplanationRule::new("ip_risk_score == 1", "Request from a high-risk IP"),
            ExplanationRule::new("field_consistency_flags > 0", "Inconsistent document fields"),
        ];

        RuleConfig {
            weights,
            thresholds: Thresholds::default(),
            explanations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_rules_are_valid() {
        assert!(RuleConfig::default_rules().validate().is_ok());
    }

    #[test]
    fn test_shipped_rules_match_builtin() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/rules.json");
        assert_eq!(RuleConfig::load(&path).unwrap(), RuleConfig::default_rules());
    }

    #[test]
    fn test_json_rules_accept_predicate_alias() {
        let text = r#"{
            "weights": {"blur_score": 1, "glare_score": 0.5},
            "thresholds": {"approve": 0.2, "review": "0.2-0.7", "reject": 0.7},
            "explanations": [
                {"when": "blur_score > 0.5", "reason": "Blurry"},
                {"predicate": "glare_score > 0.5"}
            ]
        }"#;
        let rules = RuleConfig::from_json_str(text).unwrap();
        assert_eq!(rules.weights["blur_score"], 1.0);
        assert_eq!(rules.thresholds.approve, 0.2);
        assert_eq!(rules.explanations[0].reason_text(), "Blurry");
        assert_eq!(rules.explanations[1].reason_text(), "glare_score > 0.5");
    }

    #[test]
    fn test_missing_thresholds_use_defaults() {
        let rules = RuleConfig::from_json_str(r#"{"weights": {"blur_score": 1}}"#).unwrap();
        assert_eq!(rules.thresholds, Thresholds::default());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let text = r#"{"weights": {"blur_score": 1}, "thresholds": {"approve": 0.8, "reject": 0.3}}"#;
        let err = RuleConfig::from_json_str(text).unwrap_err();
        assert!(matches!(err, IdRiskError::ConfigError(_)));
    }

    #[test]
    fn test_bad_weights_rejected() {
        for text in [
            r#"{"weights": {"blur_score": -1}}"#,
            r#"{"weights": {"blur_score": "heavy"}}"#,
            r#"{"weights": {"blur_score": 0}}"#,
            r#"{"weights": {}}"#,
        ] {
            assert!(
                matches!(RuleConfig::from_json_str(text), Err(IdRiskError::ConfigError(_))),
                "accepted {}",
                text
            );
        }
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[weights]
glare_score = 2.0

[thresholds]
approve = 0.3
reject = 0.6

[[explanations]]
when = "glare_score > 0.4"
reason = "Glare"
"#
        )
        .unwrap();
        let rules = RuleConfig::load(file.path()).unwrap();
        assert_eq!(rules.weights["glare_score"], 2.0);
        assert_eq!(rules.explanations.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuleConfig::load(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(matches!(err, IdRiskError::IoError(_)));
    }
}

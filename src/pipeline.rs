use crate::models::*;
use crate::processing::*;
use crate::scoring::Scorer;
use crate::utils::IdRiskError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Stages a case moves through, strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStage {
    Received,
    FeaturesBuilt,
    Scored,
    Decided,
}

impl CaseStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStage::Received => "RECEIVED",
            CaseStage::FeaturesBuilt => "FEATURES_BUILT",
            CaseStage::Scored => "SCORED",
            CaseStage::Decided => "DECIDED",
        }
    }
}

impl fmt::Display for CaseStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw upstream results for a case.
#[derive(Debug, Clone)]
pub struct ReceivedCase {
    pub input: CaseInput,
}

#[derive(Debug, Clone)]
pub struct FeaturesBuiltCase {
    pub case_id: String,
    pub features: FeatureSet,
}

#[derive(Debug, Clone)]
pub struct ScoredCase {
    pub case_id: String,
    pub features: FeatureSet,
    pub result: ScoreResult,
}

/// Terminal state handed to persistence: features and result together for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct DecidedCase {
    pub case_id: String,
    pub features: FeatureSet,
    pub result: ScoreResult,
}

/// What persistence stores for a decided case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub case_id: String,
    pub features: FeatureSet,
    pub score: f64,
    pub reasons: Vec<String>,
    pub decision: Decision,
    pub status: &'static str,
    pub artifact_key: String,
    pub feature_digest: String,
}

impl ReceivedCase {
    pub fn new(input: CaseInput) -> Self {
        ReceivedCase { input }
    }

    pub fn build_features(
        self,
        aggregator: &FeatureAggregator,
        store: Option<&dyn ArtifactStore>,
        now: DateTime<Utc>,
    ) -> Result<FeaturesBuiltCase, IdRiskError> {
        let front_image = Self::front_image(&self.input, store)?;
        let inputs = FeatureInputs {
            ocr: &self.input.ocr,
            front_image: front_image.as_deref(),
            face_similarity: self.input.face_similarity,
            metadata: &self.input.metadata,
        };
        let features = aggregator.build(&inputs, now)?;
        Ok(FeaturesBuiltCase {
            case_id: self.input.case_id,
            features,
        })
    }

    // Inline bytes win over a stored artifact
    fn front_image(
        input: &CaseInput,
        store: Option<&dyn ArtifactStore>,
    ) -> Result<Option<Vec<u8>>, IdRiskError> {
        if let Some(encoded) = input.doc_front_b64.as_deref().filter(|s| !s.trim().is_empty()) {
            return decode_inline_image(encoded).map(Some);
        }
        match (input.s3_keys.front.as_deref(), store) {
            (Some(key), Some(store)) if !key.is_empty() => store.fetch(key).map(Some),
            _ => Ok(None),
        }
    }
}

impl FeaturesBuiltCase {
    pub fn score(self, rules: &RuleConfig) -> ScoredCase {
        let result = Scorer::score(&self.features, rules);
        ScoredCase {
            case_id: self.case_id,
            features: self.features,
            result,
        }
    }
}

impl ScoredCase {
    pub fn decide(self) -> DecidedCase {
        DecidedCase {
            case_id: self.case_id,
            features: self.features,
            result: self.result,
        }
    }
}

impl DecidedCase {
    pub fn artifact_key(&self) -> String {
        format!("cases/{}/artifacts/results.json", self.case_id)
    }

    /// SHA-256 over the canonical feature JSON; identical inputs give identical digests.
    pub fn feature_digest(&self) -> Result<String, IdRiskError> {
        let canonical = self.features.to_canonical_json()?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn audit_record(&self) -> Result<AuditRecord, IdRiskError> {
        Ok(AuditRecord {
            case_id: self.case_id.clone(),
            features: self.features.clone(),
            score: self.result.score,
            reasons: self.result.reasons.clone(),
            decision: self.result.decision,
            status: "PROCESSED",
            artifact_key: self.artifact_key(),
            feature_digest: self.feature_digest()?,
        })
    }
}

/// Runs cases from receipt to decision. Holds only read-only state, so one
/// pipeline can be shared by many worker threads.
pub struct DecisionPipeline {
    rules: Arc<RuleConfig>,
    velocity: Arc<dyn VelocityLookup>,
    ip_risk: Arc<dyn IpRiskList>,
    store: Option<Arc<dyn ArtifactStore>>,
    options: AggregatorOptions,
}

impl DecisionPipeline {
    /// Fails with a configuration error if the rules do not validate.
    pub fn new(
        rules: Arc<RuleConfig>,
        velocity: Arc<dyn VelocityLookup>,
        ip_risk: Arc<dyn IpRiskList>,
    ) -> Result<Self, IdRiskError> {
        rules.validate()?;
        Ok(DecisionPipeline {
            rules,
            velocity,
            ip_risk,
            store: None,
            options: AggregatorOptions::default(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_options(mut self, options: AggregatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn rules(&self) -> &RuleConfig {
        &self.rules
    }

    pub fn process(&self, input: CaseInput) -> Result<DecidedCase, IdRiskError> {
        self.process_at(input, Utc::now())
    }

    /// Process a case as of `now`. Any failure aborts the whole case; nothing
    /// partial is returned.
    pub fn process_at(&self, input: CaseInput, now: DateTime<Utc>) -> Result<DecidedCase, IdRiskError> {
        let case_id = input.case_id.clone();
        debug!("Case {} {}", case_id, CaseStage::Received);

        let aggregator = FeatureAggregator::new(self.velocity.as_ref(), self.ip_risk.as_ref())
            .with_options(self.options);
        let built = ReceivedCase::new(input)
            .build_features(&aggregator, self.store.as_deref(), now)
            .map_err(|e| IdRiskError::PipelineError {
                stage: CaseStage::Received.to_string(),
                source: Box::new(e),
            })?;
        debug!("Case {} {}", case_id, CaseStage::FeaturesBuilt);

        let scored = built.score(&self.rules);
        debug!("Case {} {}", case_id, CaseStage::Scored);

        let decided = scored.decide();
        info!(
            "Case {} {}: {} (score {:.3}, {} reasons)",
            case_id,
            CaseStage::Decided,
            decided.result.decision,
            decided.result.score,
            decided.result.reasons.len()
        );
        Ok(decided)
    }
}

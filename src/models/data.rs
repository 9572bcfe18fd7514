use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    TD1, // ID Card (85.6mm × 54.0mm)
    TD3, // Passport (125.0mm × 88.0mm)
}

impl DocumentFormat {
    pub fn mrz_lines(&self) -> usize {
        match self {
            DocumentFormat::TD1 => 3,
            DocumentFormat::TD3 => 2,
        }
    }

    pub fn mrz_chars_per_line(&self) -> usize {
        match self {
            DocumentFormat::TD1 => 30,
            DocumentFormat::TD3 => 44,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::TD1 => "TD1",
            DocumentFormat::TD3 => "TD3",
        }
    }
}

/// Outcome of an MRZ checksum validation. Fields are filled even when
/// `valid` is false, so callers must check `valid` before trusting them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MrzResult {
    pub valid: bool,
    pub format: Option<DocumentFormat>,
    pub fields: BTreeMap<String, String>,
}

impl MrzResult {
    pub fn unsupported() -> Self {
        MrzResult::default()
    }
}

/// `blur` is a sharpness value (higher = sharper); `glare` is already a badness ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageQualityMetrics {
    pub blur: f64,
    pub glare: f64,
}

/// Canonical feature names produced by the aggregator.
pub mod feature_names {
    pub const FACE_SIMILARITY: &str = "face_similarity";
    pub const TEXTRACT_CONF_AVG: &str = "textract_conf_avg";
    pub const MRZ_VALID: &str = "mrz_valid";
    pub const EXPIRY_VALID: &str = "expiry_valid";
    pub const TEMPLATE_GEOM_SCORE: &str = "template_geom_score";
    pub const BLUR_SCORE: &str = "blur_score";
    pub const GLARE_SCORE: &str = "glare_score";
    pub const VELOCITY_COUNT_24H: &str = "velocity_count_24h";
    pub const DEVICE_HASH_DUP: &str = "device_hash_dup";
    pub const IP_RISK_SCORE: &str = "ip_risk_score";
    pub const FIELD_CONSISTENCY_FLAGS: &str = "field_consistency_flags";
}

/// A single feature value. Feature files written by other tools may carry
/// strings or nulls, so those are representable and coerce to numbers on use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

impl FeatureValue {
    /// Numeric view used by the scorer: booleans are 0/1, anything unparsable is 0.
    pub fn as_number(&self) -> f64 {
        self.to_number().unwrap_or(0.0)
    }

    pub fn to_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FeatureValue::Number(n) if n.is_finite() => Some(*n),
            FeatureValue::Number(_) => None,
            FeatureValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            FeatureValue::Null => None,
        }
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        FeatureValue::Bool(value)
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        FeatureValue::Text(value.to_string())
    }
}

impl From<u64> for FeatureValue {
    fn from(value: u64) -> Self {
        FeatureValue::Number(value as f64)
    }
}

impl From<u32> for FeatureValue {
    fn from(value: u32) -> Self {
        FeatureValue::Number(f64::from(value))
    }
}

/// Named feature vector for one case. Ordered so serialization is stable
/// across re-runs of the same case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet {
    values: BTreeMap<String, FeatureValue>,
}

impl FeatureSet {
    pub fn new() -> Self {
        FeatureSet::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FeatureValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name)
    }

    /// Missing features read as 0.
    pub fn value_of(&self, name: &str) -> f64 {
        self.values.get(name).map(FeatureValue::as_number).unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FeatureValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.values)
    }
}

impl<K: Into<String>, V: Into<FeatureValue>> FromIterator<(K, V)> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut set = FeatureSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Review,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "APPROVE"),
            Decision::Review => write!(f, "REVIEW"),
            Decision::Reject => write!(f, "REJECT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub reasons: Vec<String>,
    pub decision: Decision,
}

/// What the OCR collaborator hands back for a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub confidence: BTreeMap<String, f64>,
    #[serde(default)]
    pub avg_conf: Option<f64>,
    #[serde(default)]
    pub mrz_lines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseMetadata {
    #[serde(default)]
    pub device_hash: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// Storage keys of the uploaded artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRefs {
    #[serde(default)]
    pub front: Option<String>,
    #[serde(default)]
    pub back: Option<String>,
    #[serde(default)]
    pub selfie: Option<String>,
}

/// A case as delivered by the queue, after OCR and face matching have run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseInput {
    pub case_id: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub s3_keys: ArtifactRefs,
    #[serde(default)]
    pub ocr: OcrOutput,
    #[serde(default)]
    pub face_similarity: Option<f64>,
    #[serde(default)]
    pub metadata: CaseMetadata,
    #[serde(default)]
    pub doc_front_b64: Option<String>,
}

use crate::models::feature_names::*;
use crate::models::{CaseMetadata, FeatureSet, OcrOutput};
use crate::processing::ImageQualityAnalyzer;
use crate::utils::IdRiskError;
use crate::validation::{ExpiryValidator, FormatValidator, MrzValidator};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Trailing window used for device velocity.
pub const VELOCITY_WINDOW_SECS: u64 = 24 * 3600;

/// More events than this from one device inside the window marks it as a duplicate.
pub const DEVICE_DUP_THRESHOLD: u64 = 3;

const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

/// Counts recent events for a device. Backed by the event store in
/// production and by [`InMemoryVelocityStore`] in tests.
pub trait VelocityLookup: Send + Sync {
    fn lookup(&self, device_hash: &str, window_secs: u64) -> Result<u64, IdRiskError>;
}

/// Answers whether a request IP is on the configured risk list.
pub trait IpRiskList: Send + Sync {
    fn is_risky(&self, ip: &str) -> bool;
}

impl IpRiskList for HashSet<String> {
    fn is_risky(&self, ip: &str) -> bool {
        self.contains(ip)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVelocityStore {
    events: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl InMemoryVelocityStore {
    pub fn new() -> Self {
        InMemoryVelocityStore::default()
    }

    pub fn record(&self, device_hash: &str, at: DateTime<Utc>) {
        if let Ok(mut events) = self.events.lock() {
            events.entry(device_hash.to_string()).or_default().push(at);
        }
    }

    pub fn count_since(&self, device_hash: &str, since: DateTime<Utc>) -> Result<u64, IdRiskError> {
        let events = self
            .events
            .lock()
            .map_err(|_| IdRiskError::VelocityLookupError("event store poisoned".to_string()))?;
        Ok(events
            .get(device_hash)
            .map(|ts| ts.iter().filter(|t| **t >= since).count() as u64)
            .unwrap_or(0))
    }
}

impl VelocityLookup for InMemoryVelocityStore {
    fn lookup(&self, device_hash: &str, window_secs: u64) -> Result<u64, IdRiskError> {
        let window = Duration::seconds(window_secs.min(MAX_WINDOW_SECS) as i64);
        let since = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.count_since(device_hash, since)
    }
}

/// Defaults applied when a collaborator had nothing to offer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorOptions {
    /// Badness reported for blur and glare when no front image is available.
    pub missing_image_quality: f64,
    /// Neutral score until a template-geometry matcher is wired in.
    pub template_geom_default: f64,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        AggregatorOptions {
            missing_image_quality: 0.0,
            template_geom_default: 0.5,
        }
    }
}

/// Upstream results for one case.
#[derive(Debug, Clone, Copy)]
pub struct FeatureInputs<'a> {
    pub ocr: &'a OcrOutput,
    pub front_image: Option<&'a [u8]>,
    pub face_similarity: Option<f64>,
    pub metadata: &'a CaseMetadata,
}

pub struct FeatureAggregator<'a> {
    velocity: &'a dyn VelocityLookup,
    ip_risk: &'a dyn IpRiskList,
    options: AggregatorOptions,
}

impl<'a> FeatureAggregator<'a> {
    pub fn new(velocity: &'a dyn VelocityLookup, ip_risk: &'a dyn IpRiskList) -> Self {
        FeatureAggregator {
            velocity,
            ip_risk,
            options: AggregatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AggregatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the feature vector for a case. Missing optional inputs fall back
    /// to defaults; only an undecodable front image is an error.
    pub fn build(&self, inputs: &FeatureInputs, now: DateTime<Utc>) -> Result<FeatureSet, IdRiskError> {
        let mut features = FeatureSet::new();

        features.insert(FACE_SIMILARITY, inputs.face_similarity.unwrap_or(0.0));
        features.insert(TEXTRACT_CONF_AVG, Self::average_confidence(inputs.ocr));

        let mrz = MrzValidator::validate(&inputs.ocr.mrz_lines);
        features.insert(MRZ_VALID, mrz.valid);

        features.insert(EXPIRY_VALID, ExpiryValidator::is_valid(&inputs.ocr.fields, now));

        let (blur, glare) = match inputs.front_image {
            Some(bytes) => {
                let metrics = ImageQualityAnalyzer::analyze(bytes)?;
                (1.0 - metrics.blur.min(1.0), metrics.glare.min(1.0))
            }
            None => {
                debug!("No front image, using quality default {}", self.options.missing_image_quality);
                (self.options.missing_image_quality, self.options.missing_image_quality)
            }
        };
        features.insert(BLUR_SCORE, blur);
        features.insert(GLARE_SCORE, glare);

        features.insert(TEMPLATE_GEOM_SCORE, self.options.template_geom_default);

        let (duplicate, count) = self.device_velocity(inputs.metadata.device_hash.as_deref());
        features.insert(DEVICE_HASH_DUP, duplicate);
        features.insert(VELOCITY_COUNT_24H, count);

        let ip_risky = match inputs.metadata.ip.as_deref() {
            Some(ip) if !ip.is_empty() => self.ip_risk.is_risky(ip),
            _ => false,
        };
        features.insert(IP_RISK_SCORE, if ip_risky { 1.0 } else { 0.0 });

        features.insert(
            FIELD_CONSISTENCY_FLAGS,
            FormatValidator::consistency_flags(&inputs.ocr.fields),
        );

        Ok(features)
    }

    fn average_confidence(ocr: &OcrOutput) -> f64 {
        if let Some(avg) = ocr.avg_conf.filter(|a| a.is_finite()) {
            return avg;
        }
        if ocr.confidence.is_empty() {
            return 0.0;
        }
        ocr.confidence.values().sum::<f64>() / ocr.confidence.len() as f64
    }

    fn device_velocity(&self, device_hash: Option<&str>) -> (bool, u64) {
        let device_hash = match device_hash {
            Some(hash) if !hash.is_empty() => hash,
            _ => return (false, 0),
        };
        match self.velocity.lookup(device_hash, VELOCITY_WINDOW_SECS) {
            Ok(count) => (count > DEVICE_DUP_THRESHOLD, count),
            Err(e) => {
                warn!("Velocity lookup failed, treating device as unseen: {}", e);
                (false, 0)
            }
        }
    }
}

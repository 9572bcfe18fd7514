use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use idrisk::models::{CaseInput, CaseMetadata, Decision, OcrOutput, RuleConfig};
use idrisk::processing::{InMemoryVelocityStore, VelocityLookup};
use idrisk::{DecisionPipeline, IdRiskError};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

const TD3_LINE1: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<";
const TD3_LINE2: &str = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";

struct UnavailableVelocity;

impl VelocityLookup for UnavailableVelocity {
    fn lookup(&self, _device_hash: &str, _window_secs: u64) -> Result<u64, IdRiskError> {
        Err(IdRiskError::VelocityLookupError("store offline".to_string()))
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap()
}

fn white_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 48, Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

fn clean_case(case_id: &str) -> CaseInput {
    let mut fields = BTreeMap::new();
    fields.insert("surname".to_string(), "ERIKSSON".to_string());
    fields.insert("date_of_birth".to_string(), "1974-08-12".to_string());
    fields.insert("expiry_date".to_string(), "2030-01-01".to_string());
    CaseInput {
        case_id: case_id.to_string(),
        ocr: OcrOutput {
            fields,
            avg_conf: Some(98.0),
            mrz_lines: vec![TD3_LINE1.to_string(), TD3_LINE2.to_string()],
            ..OcrOutput::default()
        },
        face_similarity: Some(95.0),
        ..CaseInput::default()
    }
}

fn pipeline_with(velocity: Arc<dyn VelocityLookup>, risky_ips: &[&str]) -> DecisionPipeline {
    let ips: HashSet<String> = risky_ips.iter().map(|s| s.to_string()).collect();
    DecisionPipeline::new(Arc::new(RuleConfig::default_rules()), velocity, Arc::new(ips)).unwrap()
}

#[test]
fn clean_document_is_approved_without_reasons() {
    let pipeline = pipeline_with(Arc::new(InMemoryVelocityStore::new()), &[]);
    let decided = pipeline.process_at(clean_case("case-clean"), now()).unwrap();

    assert_eq!(decided.features.value_of("mrz_valid"), 1.0);
    assert_eq!(decided.features.value_of("expiry_valid"), 1.0);
    assert_eq!(decided.result.score, 0.0);
    assert_eq!(decided.result.decision, Decision::Approve);
    assert!(decided.result.reasons.is_empty());
}

#[test]
fn washed_out_image_from_risky_ip_goes_to_review() {
    let pipeline = pipeline_with(Arc::new(InMemoryVelocityStore::new()), &["203.0.113.7"]);
    let mut case = clean_case("case-glare");
    case.doc_front_b64 = Some(STANDARD.encode(white_png()));
    case.metadata = CaseMetadata {
        device_hash: Some("dev-glare".to_string()),
        ip: Some("203.0.113.7".to_string()),
    };

    let decided = pipeline.process_at(case, now()).unwrap();

    assert!((decided.features.value_of("blur_score") - 1.0).abs() < 1e-9);
    assert!((decided.features.value_of("glare_score") - 1.0).abs() < 1e-9);
    // (1 + 1 + 1.5) / 8
    assert!((decided.result.score - 0.4375).abs() < 1e-9);
    assert_eq!(decided.result.decision, Decision::Review);
    assert_eq!(
        decided.result.reasons,
        vec![
            "Document image is blurry",
            "Glare on document image",
            "Request from a high-risk IP",
        ]
    );
}

#[test]
fn busy_device_is_rejected() {
    let velocity = Arc::new(InMemoryVelocityStore::new());
    for _ in 0..4 {
        velocity.record("dev-busy", Utc::now());
    }
    let pipeline = pipeline_with(velocity, &["198.51.100.1"]);
    let mut case = clean_case("case-busy");
    case.doc_front_b64 = Some(STANDARD.encode(white_png()));
    case.metadata = CaseMetadata {
        device_hash: Some("dev-busy".to_string()),
        ip: Some("198.51.100.1".to_string()),
    };

    let decided = pipeline.process_at(case, now()).unwrap();

    assert_eq!(decided.features.value_of("velocity_count_24h"), 4.0);
    assert_eq!(decided.features.value_of("device_hash_dup"), 1.0);
    assert_eq!(decided.result.decision, Decision::Reject);
    assert!(decided
        .result
        .reasons
        .contains(&"Device seen repeatedly in the last 24h".to_string()));
}

#[test]
fn redelivered_case_gives_identical_record() {
    let pipeline = pipeline_with(Arc::new(InMemoryVelocityStore::new()), &[]);
    let mut case = clean_case("case-replay");
    case.doc_front_b64 = Some(STANDARD.encode(white_png()));

    let first = pipeline.process_at(case.clone(), now()).unwrap();
    let second = pipeline.process_at(case, now()).unwrap();

    assert_eq!(first, second);
    let record = first.audit_record().unwrap();
    assert_eq!(record.feature_digest, second.feature_digest().unwrap());
    assert_eq!(record.artifact_key, "cases/case-replay/artifacts/results.json");
}

#[test]
fn stored_front_image_matches_inline_image() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("front.png"), white_png()).unwrap();
    let pipeline = pipeline_with(Arc::new(InMemoryVelocityStore::new()), &[])
        .with_store(Arc::new(idrisk::processing::LocalArtifactStore::new(dir.path())));

    let mut stored = clean_case("case-store");
    stored.s3_keys.front = Some("front.png".to_string());
    let mut inline = clean_case("case-store");
    inline.doc_front_b64 = Some(STANDARD.encode(white_png()));

    let from_store = pipeline.process_at(stored, now()).unwrap();
    let from_inline = pipeline.process_at(inline, now()).unwrap();
    assert_eq!(from_store.features, from_inline.features);

    let mut missing = clean_case("case-missing");
    missing.s3_keys.front = Some("absent.png".to_string());
    let err = pipeline.process_at(missing, now()).unwrap_err();
    assert!(!err.is_data_quality());
}

#[test]
fn velocity_outage_does_not_abort_case() {
    let pipeline = pipeline_with(Arc::new(UnavailableVelocity), &[]);
    let mut case = clean_case("case-offline");
    case.metadata.device_hash = Some("dev-1".to_string());

    let decided = pipeline.process_at(case, now()).unwrap();
    assert_eq!(decided.features.value_of("device_hash_dup"), 0.0);
    assert_eq!(decided.features.value_of("velocity_count_24h"), 0.0);
    assert_eq!(decided.result.decision, Decision::Approve);
}

#[test]
fn shared_pipeline_across_threads() {
    let pipeline = Arc::new(pipeline_with(Arc::new(InMemoryVelocityStore::new()), &[]));
    let expected = pipeline.process_at(clean_case("case-shared"), now()).unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                scope.spawn(move || pipeline.process_at(clean_case("case-shared"), now()).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

use crate::models::CaseInput;
use crate::pipeline::{AuditRecord, DecisionPipeline};
use crate::processing::InMemoryVelocityStore;
use crate::utils::IdRiskError;
use chrono::{DateTime, Utc};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Outcome of a directory run: decided cases sorted by id, plus every case that aborted.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub records: Vec<AuditRecord>,
    pub failures: Vec<(PathBuf, IdRiskError)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.records.len() + self.failures.len()
    }

    /// Err when any case aborted, so the caller can retry the run.
    pub fn check(&self) -> Result<(), IdRiskError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(IdRiskError::BatchError {
            failed: self.failures.len(),
            total: self.total(),
            data_quality: self.failures.iter().any(|(_, e)| e.is_data_quality()),
        })
    }
}

/// `*.json` files directly inside `dir`, in name order.
pub fn case_files(dir: &Path) -> Result<Vec<PathBuf>, IdRiskError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();
    Ok(paths)
}

pub fn read_case(path: &Path) -> Result<CaseInput, IdRiskError> {
    let text = fs::read_to_string(path)
        .map_err(|e| IdRiskError::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| IdRiskError::ParseError(format!("{}: {}", path.display(), e)))
}

/// Process case files on `workers` scoped threads sharing one pipeline.
/// Each decided device is recorded in `velocity` so later cases see it.
pub fn process_files(
    pipeline: &DecisionPipeline,
    velocity: &InMemoryVelocityStore,
    paths: &[PathBuf],
    workers: usize,
    now: DateTime<Utc>,
) -> BatchReport {
    let next = AtomicUsize::new(0);
    let report = Mutex::new(BatchReport::default());
    let workers = workers.clamp(1, paths.len().max(1));

    info!("Processing {} cases on {} workers", paths.len(), workers);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(path) = paths.get(index) else {
                    break;
                };
                let outcome = read_case(path).and_then(|case| {
                    let device = case.metadata.device_hash.clone();
                    let decided = pipeline.process_at(case, now)?;
                    if let Some(device) = device.filter(|d| !d.is_empty()) {
                        velocity.record(&device, Utc::now());
                    }
                    decided.audit_record()
                });
                let Ok(mut report) = report.lock() else {
                    break;
                };
                match outcome {
                    Ok(record) => report.records.push(record),
                    Err(err) => {
                        error!("{}: {}", path.display(), err);
                        report.failures.push((path.clone(), err));
                    }
                }
            });
        }
    });

    let mut report = report.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    report.records.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    report.failures.sort_by(|a, b| a.0.cmp(&b.0));
    info!(
        "Batch finished: {} decided, {} failed",
        report.records.len(),
        report.failures.len()
    );
    report
}

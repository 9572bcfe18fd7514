use serde::{Deserialize, Serialize};

/// A scored case with its ground-truth label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelledScore {
    pub score: f64,
    pub is_fraud: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub threshold: f64,
    pub matrix: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub accuracy: f64,
    pub f1: f64,
    /// None unless both classes are present.
    pub roc_auc: Option<f64>,
}

/// Evaluate a reject threshold: a sample is predicted fraud when `score >= threshold`.
pub fn evaluate(samples: &[LabelledScore], threshold: f64) -> EvaluationReport {
    let mut matrix = ConfusionMatrix::default();
    for sample in samples {
        match (sample.score >= threshold, sample.is_fraud) {
            (true, true) => matrix.true_positives += 1,
            (true, false) => matrix.false_positives += 1,
            (false, false) => matrix.true_negatives += 1,
            (false, true) => matrix.false_negatives += 1,
        }
    }

    let precision = ratio(matrix.true_positives, matrix.true_positives + matrix.false_positives);
    let recall = ratio(matrix.true_positives, matrix.true_positives + matrix.false_negatives);
    let accuracy = ratio(matrix.true_positives + matrix.true_negatives, matrix.total());
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    EvaluationReport {
        threshold,
        matrix,
        precision,
        recall,
        accuracy,
        f1,
        roc_auc: roc_auc(samples),
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Probability that a random fraud sample outscores a random genuine one (ties count half).
pub fn roc_auc(samples: &[LabelledScore]) -> Option<f64> {
    let positives: Vec<f64> = samples.iter().filter(|s| s.is_fraud).map(|s| s.score).collect();
    let negatives: Vec<f64> = samples.iter().filter(|s| !s.is_fraud).map(|s| s.score).collect();
    if positives.is_empty() || negatives.is_empty() {
        return None;
    }
    let mut wins = 0.0;
    for p in &positives {
        for n in &negatives {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    Some(wins / (positives.len() * negatives.len()) as f64)
}

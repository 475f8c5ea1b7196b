//! Per-paper scoring and corpus-level precision / recall / PPR.
//!
//! Per paper: `k` ground-truth errors, `TP` judge-confirmed matches, `FP`
//! predictions left unmatched, `FN` annotations left unmatched. `FP` and `FN`
//! are signed and never clamped: a judge that reports more matches than there
//! were predictions drives `FP` negative, which shows up in the breakdown.

use std::collections::HashMap;

use serde::Serialize;

use crate::{JudgeMatch, PaperRecord, ReviewerResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperScore {
    #[serde(rename = "doi/arxiv_id")]
    pub id: String,
    pub k_i: i64,
    #[serde(rename = "TP_i")]
    pub tp: i64,
    #[serde(rename = "FP_i")]
    pub fp: i64,
    #[serde(rename = "FN_i")]
    pub fn_: i64,
}

impl PaperScore {
    /// Precision of this paper alone; 0 on a non-positive denominator.
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Recall of this paper alone; 0 on a non-positive denominator.
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// Every ground-truth error was matched. Extra predictions do not count against it.
    pub fn is_perfect(&self) -> bool {
        self.tp == self.k_i
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    #[serde(rename = "N")]
    pub n: usize,
    pub precision_micro: f64,
    pub recall_micro: f64,
    pub precision_macro: f64,
    pub recall_macro: f64,
    #[serde(rename = "PPR")]
    pub ppr: f64,
    pub per_paper: Vec<PaperScore>,
    /// Judged papers whose match list and description list disagreed in length.
    pub judge_inconsistencies: usize,
}

fn ratio(num: i64, den: i64) -> f64 {
    if den > 0 { num as f64 / den as f64 } else { 0.0 }
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 { 0.0 } else { values.sum::<f64>() / n as f64 }
}

/// Score one paper.
///
/// `judgment` is `None` for papers that never reached the judge (reviewer
/// failure, parse failure, or no error claimed); those score `TP = FP = 0`.
pub fn score_paper(
    id: &str,
    ground_truth: usize,
    review: &ReviewerResult,
    judgment: Option<&JudgeMatch>,
) -> PaperScore {
    let k = ground_truth as i64;
    let (tp, predicted) = match judgment {
        Some(j) => {
            let tp = j.matches.len().max(j.match_descriptions.len()) as i64;
            (tp, review.errors.len() as i64)
        }
        None => (0, 0),
    };
    PaperScore {
        id: id.to_string(),
        k_i: k,
        tp,
        fp: predicted - tp,
        fn_: k - tp,
    }
}

/// Aggregate per-paper scores into corpus metrics.
pub fn aggregate(per_paper: Vec<PaperScore>, judge_inconsistencies: usize) -> MetricsReport {
    let n = per_paper.len();
    let tp: i64 = per_paper.iter().map(|s| s.tp).sum();
    let fp: i64 = per_paper.iter().map(|s| s.fp).sum();
    let fn_: i64 = per_paper.iter().map(|s| s.fn_).sum();
    let perfect = per_paper.iter().filter(|s| s.is_perfect()).count();

    MetricsReport {
        n,
        precision_micro: ratio(tp, tp + fp),
        recall_micro: ratio(tp, tp + fn_),
        precision_macro: mean(per_paper.iter().map(PaperScore::precision), n),
        recall_macro: mean(per_paper.iter().map(PaperScore::recall), n),
        ppr: if n == 0 { 0.0 } else { perfect as f64 / n as f64 },
        per_paper,
        judge_inconsistencies,
    }
}

/// Join reviewer results with dataset records and judge results, then score.
///
/// One score per reviewer result, in reviewer order. Records and judgments are
/// joined by identifier; a missing record counts as zero ground truth.
pub fn compute_metrics(
    records: &[PaperRecord],
    reviews: &[ReviewerResult],
    judgments: &[Option<JudgeMatch>],
) -> MetricsReport {
    let ground_truth: HashMap<&str, usize> = records
        .iter()
        .map(|r| (r.id.as_str(), r.ground_truth_count()))
        .collect();
    let judged: HashMap<&str, &JudgeMatch> = judgments
        .iter()
        .flatten()
        .map(|j| (j.id.as_str(), j))
        .collect();

    let mut inconsistencies = 0;
    let scores = reviews
        .iter()
        .map(|review| {
            let k = ground_truth.get(review.id.as_str()).copied().unwrap_or_else(|| {
                tracing::warn!(paper = %review.id, "no dataset record for reviewed paper");
                0
            });
            let judgment = judged.get(review.id.as_str()).copied();
            if let Some(j) = judgment
                && j.matches.len() != j.match_descriptions.len()
            {
                inconsistencies += 1;
                tracing::warn!(
                    paper = %review.id,
                    matches = j.matches.len(),
                    descriptions = j.match_descriptions.len(),
                    "judge match count disagrees with description count"
                );
            }
            score_paper(&review.id, k, review, judgment)
        })
        .collect();

    aggregate(scores, inconsistencies)
}

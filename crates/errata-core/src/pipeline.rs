//! The evaluation run: review every paper, judge the ones with claimed errors, score.
//!
//! Per paper the flow is linear: normalized record -> [`ReviewerResult`] ->
//! optional [`JudgeMatch`] -> [`PaperScore`](crate::PaperScore). A failure at
//! any stage degrades that paper's result; it never aborts the batch.

use std::collections::HashMap;

use crate::client::CompletionClient;
use crate::metrics::{MetricsReport, compute_metrics};
use crate::parse::{ResponseKind, extract};
use crate::prompt::{judge_prompt, reviewer_prompt};
use crate::retry::CallOutcome;
use crate::{JudgeMatch, PaperRecord, ProgressEvent, ReviewerResult};

/// Everything a run produced, in dataset order.
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    pub records: Vec<PaperRecord>,
    pub reviews: Vec<ReviewerResult>,
    /// Slot `i` belongs to `reviews[i]`; `None` when the paper was not judged.
    pub judgments: Vec<Option<JudgeMatch>>,
    pub report: MetricsReport,
}

/// Review papers one at a time, in order.
pub async fn review_papers(
    records: &[PaperRecord],
    client: &CompletionClient,
    model: &str,
    progress: &(dyn Fn(ProgressEvent) + Send + Sync),
) -> Vec<ReviewerResult> {
    let total = records.len();
    let mut reviews = Vec::with_capacity(total);

    for (index, record) in records.iter().enumerate() {
        progress(ProgressEvent::Reviewing {
            index,
            total,
            paper_id: record.id.clone(),
        });

        let messages = reviewer_prompt(record);
        let outcome = client.invoke_with_retry(model, &messages).await;
        let attempts = outcome.attempts();
        let response = match outcome {
            CallOutcome::Success { value, .. } => Some(value),
            CallOutcome::Exhausted { last_error, .. } => {
                tracing::warn!(paper = %record.id, attempts, error = %last_error, "reviewer gave up");
                progress(ProgressEvent::ReviewFailed {
                    index,
                    total,
                    paper_id: record.id.clone(),
                    attempts,
                    message: last_error.to_string(),
                });
                None
            }
        };

        let extracted = extract(response.as_deref(), ResponseKind::Review);
        if response.is_some() && !extracted.parsed {
            tracing::debug!(
                paper = %record.id,
                reason = extracted.parse_error.as_deref().unwrap_or(""),
                "reviewer response not parsed"
            );
        }
        progress(ProgressEvent::Reviewed {
            index,
            total,
            paper_id: record.id.clone(),
            parsed: extracted.parsed,
            has_error: extracted.has_error,
            error_count: extracted.errors.len(),
            attempts,
        });

        reviews.push(ReviewerResult {
            id: record.id.clone(),
            parsed: extracted.parsed,
            is_error: extracted.has_error,
            errors: extracted.errors,
            response,
            attempts,
        });
    }

    reviews
}

/// Judge every review with `parsed && is_error` in one batched call.
///
/// The result has one slot per review; unjudged papers hold `None`.
pub async fn judge_reviews(
    records: &[PaperRecord],
    reviews: &[ReviewerResult],
    client: &CompletionClient,
    model: &str,
    progress: &(dyn Fn(ProgressEvent) + Send + Sync),
) -> Vec<Option<JudgeMatch>> {
    let mut judgments: Vec<Option<JudgeMatch>> = vec![None; reviews.len()];
    let by_id: HashMap<&str, &PaperRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();

    // (slot in `reviews`, prompt)
    let pending: Vec<(usize, Vec<_>)> = reviews
        .iter()
        .enumerate()
        .filter(|(_, review)| review.needs_judging())
        .filter_map(|(slot, review)| {
            let record = by_id.get(review.id.as_str())?;
            Some((slot, judge_prompt(record, &review.errors)))
        })
        .collect();

    if pending.is_empty() {
        return judgments;
    }
    progress(ProgressEvent::JudgeBatch {
        pending: pending.len(),
    });

    let (slots, prompts): (Vec<usize>, Vec<_>) = pending.into_iter().unzip();
    let responses = client.batch(model, &prompts).await;

    for (slot, response) in slots.into_iter().zip(responses) {
        let id = reviews[slot].id.clone();
        let (text, error) = match response {
            Ok(text) => (Some(text), None),
            Err(e) => {
                tracing::warn!(paper = %id, error = %e, "judge call failed");
                progress(ProgressEvent::JudgeFailed {
                    paper_id: id.clone(),
                    message: e.to_string(),
                });
                (None, Some(e.to_string()))
            }
        };
        let extracted = extract(text.as_deref(), ResponseKind::Judge);
        progress(ProgressEvent::Judged {
            paper_id: id.clone(),
            parsed: extracted.parsed,
            match_count: extracted.matches.len(),
        });
        judgments[slot] = Some(
            JudgeMatch::from_matches(id, extracted.matches, extracted.parsed)
                .with_outcome(text, error),
        );
    }

    judgments
}

/// Run the full pipeline over `records`.
pub async fn run_evaluation(
    records: Vec<PaperRecord>,
    reviewer: &CompletionClient,
    reviewer_model: &str,
    judge: &CompletionClient,
    judge_model: &str,
    progress: impl Fn(ProgressEvent) + Send + Sync,
) -> EvaluationRun {
    tracing::info!(
        papers = records.len(),
        reviewer_model,
        judge_model,
        "starting evaluation"
    );
    let reviews = review_papers(&records, reviewer, reviewer_model, &progress).await;
    let judgments = judge_reviews(&records, &reviews, judge, judge_model, &progress).await;
    let report = compute_metrics(&records, &reviews, &judgments);
    tracing::info!(
        n = report.n,
        precision_micro = report.precision_micro,
        recall_micro = report.recall_micro,
        ppr = report.ppr,
        "evaluation complete"
    );

    EvaluationRun {
        records,
        reviews,
        judgments,
        report,
    }
}

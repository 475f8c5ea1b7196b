//! End-to-end tests for [`run_evaluation`] over mock backends.
//!
//! Reviewer prompts are routed by paper body, judge prompts by the predictions
//! in their payload, so no HTTP requests are made.

use std::sync::{Arc, Mutex};

use errata_core::backend::mock::{MockBackend, MockResponse};
use errata_core::normalize::{RawRow, normalize};
use errata_core::prompt::{JUDGE_SYSTEM_PROMPT, REVIEWER_SYSTEM_PROMPT};
use errata_core::{ChatMessage, CompletionClient, ProgressEvent, RetryPolicy, run_evaluation};
use serde_json::json;

fn row(id: &str, content: &str, location: &str, annotation: &str) -> RawRow {
    match json!({
        "doi/arxiv_id": id,
        "paper_content": content,
        "paper_category": "biology",
        "error_location": location,
        "error_annotation": annotation,
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn review_text(errors: &[(&str, &str)]) -> String {
    let errors: Vec<_> = errors
        .iter()
        .map(|(l, d)| json!({"location": l, "description": d}))
        .collect();
    let body = json!({"has_error": !errors.is_empty(), "errors": errors});
    format!("<analysis>checked</analysis>\n<response>\n{body}\n</response>")
}

fn judge_text(locations: &[&str]) -> String {
    let matches: Vec<_> = locations
        .iter()
        .map(|l| json!({"location": l, "description": "same flaw"}))
        .collect();
    format!("<analysis>compared</analysis><response>{}</response>", json!({"matches": matches}))
}

fn is_reviewer(msgs: &[ChatMessage]) -> bool {
    msgs.first().is_some_and(|m| m.content == REVIEWER_SYSTEM_PROMPT)
}

fn is_judge(msgs: &[ChatMessage]) -> bool {
    msgs.first().is_some_and(|m| m.content == JUDGE_SYSTEM_PROMPT)
}

fn user_text(msgs: &[ChatMessage]) -> &str {
    msgs.last().map(|m| m.content.as_str()).unwrap_or("")
}

/// P1 has two annotations and three predictions, two of them confirmed.
/// P2 has one annotation and the reviewer claims no error.
fn two_paper_rows() -> Vec<RawRow> {
    vec![
        row("P1", "paper one body", "Table 1", "totals do not add up"),
        row("P1", "paper one body", "Eq. 4", "sign error"),
        row("P2", "paper two body", "Figure 2", "axis mislabeled"),
    ]
}

fn two_paper_reviewer() -> MockBackend {
    MockBackend::new(MockResponse::Status(500)).with_router(|msgs| {
        if !is_reviewer(msgs) {
            return None;
        }
        let text = match user_text(msgs) {
            "paper one body" => review_text(&[
                ("Table 1", "columns sum wrong"),
                ("Eq. 4", "sign flipped"),
                ("Intro", "overclaims novelty"),
            ]),
            _ => review_text(&[]),
        };
        Some(MockResponse::Text(text))
    })
}

fn two_paper_judge() -> MockBackend {
    MockBackend::new(MockResponse::Status(500)).with_router(|msgs| {
        is_judge(msgs).then(|| MockResponse::Text(judge_text(&["Table 1", "Eq. 4"])))
    })
}

#[tokio::test]
async fn two_paper_run_scores_end_to_end() {
    let records = normalize(two_paper_rows());
    assert_eq!(records.len(), 2);

    let reviewer_mock = Arc::new(two_paper_reviewer());
    let judge_mock = Arc::new(two_paper_judge());
    let reviewer = CompletionClient::new(reviewer_mock.clone(), RetryPolicy::default());
    let judge = CompletionClient::new(judge_mock.clone(), RetryPolicy::default());

    let run = run_evaluation(records, &reviewer, "reviewer-m", &judge, "judge-m", |_| {}).await;

    assert_eq!(reviewer_mock.call_count(), 2);
    // Only P1 claims errors.
    assert_eq!(judge_mock.call_count(), 1);
    assert_eq!(judge_mock.calls()[0].0, "judge-m");

    let report = &run.report;
    assert_eq!(report.n, 2);
    let p1 = &report.per_paper[0];
    assert_eq!((p1.k_i, p1.tp, p1.fp, p1.fn_), (2, 2, 1, 0));
    let p2 = &report.per_paper[1];
    assert_eq!((p2.k_i, p2.tp, p2.fp, p2.fn_), (1, 0, 0, 1));
    assert!((report.precision_micro - 2.0 / 3.0).abs() < 1e-12);
    assert!((report.recall_micro - 2.0 / 3.0).abs() < 1e-12);
    assert!((report.ppr - 0.5).abs() < 1e-12);

    assert!(run.judgments[0].is_some());
    assert!(run.judgments[1].is_none());
}

#[tokio::test]
async fn judge_payload_carries_annotations_and_predictions() {
    let records = normalize(two_paper_rows());
    let judge_mock = Arc::new(two_paper_judge());
    let reviewer = CompletionClient::new(Arc::new(two_paper_reviewer()), RetryPolicy::default());
    let judge = CompletionClient::new(judge_mock.clone(), RetryPolicy::default());

    run_evaluation(records, &reviewer, "r", &judge, "j", |_| {}).await;

    let calls = judge_mock.calls();
    let payload: serde_json::Value = serde_json::from_str(user_text(&calls[0].1)).unwrap();
    assert_eq!(payload["annotations"].as_array().unwrap().len(), 2);
    assert_eq!(payload["annotations"][1]["location"], "Eq. 4");
    assert_eq!(payload["predictions"].as_array().unwrap().len(), 3);
    assert_eq!(payload["predictions"][2]["description"], "overclaims novelty");
}

#[tokio::test]
async fn failing_reviewer_is_retried_and_batch_continues() {
    let records = normalize(vec![
        row("A", "broken", "Sec 1", "flaw a"),
        row("B", "fine", "Sec 2", "flaw b"),
    ]);
    let reviewer_mock = Arc::new(MockBackend::new(MockResponse::Status(503)).with_router(
        |msgs| {
            (user_text(msgs) == "fine")
                .then(|| MockResponse::Text(review_text(&[("Sec 2", "flaw b")])))
        },
    ));
    let judge_mock = Arc::new(MockBackend::new(MockResponse::Text(judge_text(&["Sec 2"]))));
    let reviewer = CompletionClient::new(reviewer_mock.clone(), RetryPolicy::default());
    let judge = CompletionClient::new(judge_mock.clone(), RetryPolicy::default());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let run = run_evaluation(records, &reviewer, "r", &judge, "j", move |e| {
        sink.lock().unwrap().push(e);
    })
    .await;

    // Five attempts for A, one for B.
    assert_eq!(reviewer_mock.call_count(), 6);
    assert_eq!(run.reviews[0].attempts, 5);
    assert!(run.reviews[0].response.is_none());
    assert!(!run.reviews[0].parsed);
    assert!(run.reviews[0].is_error);
    assert_eq!(run.reviews[1].attempts, 1);

    // A is never judged; B is.
    assert_eq!(judge_mock.call_count(), 1);
    assert_eq!(run.report.per_paper[0].tp, 0);
    assert_eq!(run.report.per_paper[0].fp, 0);
    assert_eq!(run.report.per_paper[0].fn_, 1);
    assert_eq!(run.report.per_paper[1].tp, 1);

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::ReviewFailed { paper_id, attempts: 5, .. } if paper_id == "A"
    )));
}

#[tokio::test]
async fn unparsed_review_is_not_judged() {
    let records = normalize(vec![row("X", "body", "Sec 3", "flaw")]);
    let reviewer = CompletionClient::new(
        Arc::new(MockBackend::new(MockResponse::text("I think there is an error."))),
        RetryPolicy::default(),
    );
    let judge_mock = Arc::new(MockBackend::new(MockResponse::Text(judge_text(&["Sec 3"]))));
    let judge = CompletionClient::new(judge_mock.clone(), RetryPolicy::default());

    let run = run_evaluation(records, &reviewer, "r", &judge, "j", |_| {}).await;

    let review = &run.reviews[0];
    assert!(!review.parsed);
    assert!(review.is_error);
    assert_eq!(review.attempts, 1);
    assert_eq!(judge_mock.call_count(), 0);
    assert_eq!(run.report.per_paper[0].tp, 0);
    assert_eq!(run.report.per_paper[0].fn_, 1);
}

#[tokio::test]
async fn judge_results_stay_aligned_with_their_papers() {
    // Three papers claim errors; the middle one's judge call fails.
    let records = normalize(vec![
        row("a", "body a", "L1", "ann a"),
        row("b", "body b", "L2", "ann b"),
        row("c", "body c", "L3", "ann c"),
    ]);
    let reviewer = CompletionClient::new(
        Arc::new(MockBackend::new(MockResponse::Status(500)).with_router(|msgs| {
            let loc = match user_text(msgs) {
                "body a" => "L1",
                "body b" => "L2",
                _ => "L3",
            };
            Some(MockResponse::Text(review_text(&[(loc, "pred"), ("Other", "extra")])))
        })),
        RetryPolicy::default(),
    );
    let judge = CompletionClient::new(
        Arc::new(MockBackend::new(MockResponse::Status(500)).with_router(|msgs| {
            let payload = user_text(msgs);
            if payload.contains("\"L2\"") {
                Some(MockResponse::Status(502))
            } else if payload.contains("\"L1\"") {
                Some(MockResponse::Text(judge_text(&["L1"])))
            } else {
                Some(MockResponse::Text(judge_text(&[])))
            }
        })),
        RetryPolicy::default(),
    )
    .with_batch_concurrency(3);

    let run = run_evaluation(records, &reviewer, "r", &judge, "j", |_| {}).await;

    let ids: Vec<_> = run.judgments.iter().flatten().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(run.report.per_paper[0].tp, 1);
    assert_eq!(run.report.per_paper[0].fp, 1);
    // The failed judge call yields an unparsed, empty match list.
    let b = run.judgments[1].as_ref().unwrap();
    assert!(!b.parsed);
    assert!(b.matches.is_empty());
    assert!(b.response.is_none());
    assert_eq!(b.error.as_deref(), Some("HTTP 502: mock failure"));
    // Successful judge calls keep their raw text.
    let a = run.judgments[0].as_ref().unwrap();
    assert!(a.response.as_deref().unwrap().contains("<response>"));
    assert!(a.error.is_none());
    assert_eq!(run.report.per_paper[1].fp, 2);
    assert_eq!(run.report.per_paper[2].tp, 0);
}

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod backend;
pub mod clean;
pub mod client;
pub mod config_file;
pub mod dataset;
pub mod metrics;
pub mod normalize;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod retry;

// Re-export for convenience
pub use backend::{ChatBackend, ChatMessage, CompletionError, Role};
pub use client::CompletionClient;
pub use metrics::{MetricsReport, PaperScore, compute_metrics};
pub use parse::{ExtractedResponse, ResponseKind, UNPARSEABLE_IMPLIES_ERROR, extract};
pub use pipeline::{EvaluationRun, run_evaluation};
pub use retry::{CallOutcome, RetryPolicy};

/// Identifier column shared by every dataset row (DOI or arXiv id).
pub const ID_COLUMN: &str = "doi/arxiv_id";

/// Column holding the paper body sent to the reviewer.
pub const CONTENT_COLUMN: &str = "paper_content";

/// Columns whose values are collected into lists when rows are grouped per paper.
pub const LIST_COLUMNS: [&str; 3] = ["paper_category", "error_location", "error_annotation"];

/// One paper of the dataset, with all of its ground-truth annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperRecord {
    pub id: String,
    /// Raw paper content: either plain text or a list of content parts.
    pub content: serde_json::Value,
    pub categories: Vec<String>,
    pub error_locations: Vec<String>,
    pub error_annotations: Vec<String>,
    /// Remaining scalar columns of the source row (title, source, ...).
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PaperRecord {
    /// Number of ground-truth errors (`k_i`).
    pub fn ground_truth_count(&self) -> usize {
        self.error_annotations.len()
    }

    /// Ground-truth errors paired with their locations.
    ///
    /// Pairs positionally; a length mismatch between the two lists is
    /// reported by [`normalize::normalize`] when the record is built.
    pub fn annotations(&self) -> Vec<Annotation> {
        self.error_locations
            .iter()
            .zip(&self.error_annotations)
            .map(|(location, description)| Annotation {
                location: location.clone(),
                description: description.clone(),
            })
            .collect()
    }
}

/// A human-annotated error, as shown to the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub location: String,
    pub description: String,
}

/// An error reported by the reviewer model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub description: String,
}

/// A single match reported by the judge model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of the reviewer stage for one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewerResult {
    pub id: String,
    /// The response contained a valid `<response>` block.
    pub parsed: bool,
    /// The reviewer claims the paper contains an error.
    pub is_error: bool,
    pub errors: Vec<PredictedError>,
    /// Raw reviewer text; `None` when every attempt failed.
    pub response: Option<String>,
    pub attempts: u32,
}

impl ReviewerResult {
    /// Whether this paper goes on to the judge stage.
    pub fn needs_judging(&self) -> bool {
        self.parsed && self.is_error
    }
}

/// Outcome of the judge stage for one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeMatch {
    pub id: String,
    pub matches: Vec<MatchItem>,
    pub match_descriptions: Vec<String>,
    /// The judge response itself contained a valid `<response>` block.
    pub parsed: bool,
    /// Raw judge text; `None` when the call failed.
    pub response: Option<String>,
    /// Why the judge call failed, when it did.
    pub error: Option<String>,
}

impl JudgeMatch {
    pub fn from_matches(id: impl Into<String>, matches: Vec<MatchItem>, parsed: bool) -> Self {
        let match_descriptions = matches
            .iter()
            .map(|m| m.description.clone().unwrap_or_default())
            .collect();
        Self {
            id: id.into(),
            matches,
            match_descriptions,
            parsed,
            response: None,
            error: None,
        }
    }

    /// Attach the raw outcome of the judge call.
    pub fn with_outcome(mut self, response: Option<String>, error: Option<String>) -> Self {
        self.response = response;
        self.error = error;
        self
    }
}

/// Progress events emitted while a run is in flight.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Reviewing {
        index: usize,
        total: usize,
        paper_id: String,
    },
    Reviewed {
        index: usize,
        total: usize,
        paper_id: String,
        parsed: bool,
        has_error: bool,
        error_count: usize,
        attempts: u32,
    },
    /// Every reviewer attempt failed; the paper is scored with an absent response.
    ReviewFailed {
        index: usize,
        total: usize,
        paper_id: String,
        attempts: u32,
        message: String,
    },
    JudgeBatch {
        pending: usize,
    },
    Judged {
        paper_id: String,
        parsed: bool,
        match_count: usize,
    },
    JudgeFailed {
        paper_id: String,
        message: String,
    },
}

/// API credentials, passed explicitly to the clients that need them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub reviewer_api_key: Option<String>,
    pub judge_api_key: Option<String>,
    pub dataset_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "reviewer_api_key",
                &self.reviewer_api_key.as_ref().map(|_| "***"),
            )
            .field("judge_api_key", &self.judge_api_key.as_ref().map(|_| "***"))
            .field("dataset_token", &self.dataset_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Base URLs for the providers a model id can route to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub openai_base_url: String,
    pub openrouter_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            openai_base_url: backend::openai::OPENAI_BASE_URL.to_string(),
            openrouter_base_url: backend::openai::OPENROUTER_BASE_URL.to_string(),
        }
    }
}

/// Configuration for an evaluation run.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
    pub retry: RetryPolicy,
    /// Maximum judge requests in flight within the batched judge call.
    pub judge_concurrency: usize,
    pub timeout_secs: u64,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            endpoints: Endpoints::default(),
            retry: RetryPolicy::default(),
            judge_concurrency: 8,
            timeout_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_secrets() {
        let creds = Credentials {
            reviewer_api_key: Some("sk-reviewer".into()),
            judge_api_key: None,
            dataset_token: Some("hf_secret".into()),
        };
        let dbg = format!("{:?}", creds);
        assert!(!dbg.contains("sk-reviewer"));
        assert!(!dbg.contains("hf_secret"));
        assert!(dbg.contains("***"));
        assert!(dbg.contains("judge_api_key: None"));
    }

    #[test]
    fn judge_match_fills_missing_descriptions() {
        let jm = JudgeMatch::from_matches(
            "10.1/x",
            vec![
                MatchItem {
                    location: Some("Sec 2".into()),
                    description: Some("same flaw".into()),
                },
                MatchItem::default(),
            ],
            true,
        );
        assert_eq!(jm.match_descriptions, vec!["same flaw".to_string(), String::new()]);
    }

    #[test]
    fn annotations_pair_locations_with_descriptions() {
        let record = PaperRecord {
            id: "p".into(),
            content: serde_json::Value::Null,
            categories: vec![],
            error_locations: vec!["Table 1".into(), "Eq. 3".into()],
            error_annotations: vec!["wrong total".into(), "sign error".into()],
            extra: BTreeMap::new(),
        };
        let anns = record.annotations();
        assert_eq!(anns.len(), 2);
        assert_eq!(anns[1].location, "Eq. 3");
        assert_eq!(anns[1].description, "sign error");
        assert_eq!(record.ground_truth_count(), 2);
    }
}

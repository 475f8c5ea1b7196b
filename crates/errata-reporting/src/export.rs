use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use errata_core::metrics::MetricsReport;
use errata_core::{EvaluationRun, ID_COLUMN, JudgeMatch, PaperRecord, ReviewerResult};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The two files written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub responses: PathBuf,
    pub metrics: PathBuf,
}

/// Model id with path and version separators flattened for use in file names.
pub fn safe_model_name(model: &str) -> String {
    model.replace(['/', '.'], "_")
}

pub fn output_paths(dir: &Path, reviewer_model: &str, index: usize) -> OutputPaths {
    let safe = safe_model_name(reviewer_model);
    OutputPaths {
        responses: dir.join(format!("{safe}_resp_df_{index}.csv")),
        metrics: dir.join(format!("{safe}_metrics_{index}.csv")),
    }
}

/// Write both CSV files for `run` into `dir`, creating it if needed.
pub fn export_run(
    run: &EvaluationRun,
    dir: &Path,
    reviewer_model: &str,
    index: usize,
) -> Result<OutputPaths, ExportError> {
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let paths = output_paths(dir, reviewer_model, index);
    write_file(&paths.responses, &responses_csv(run))?;
    write_file(&paths.metrics, &metrics_csv(&run.report))?;
    tracing::info!(
        responses = %paths.responses.display(),
        metrics = %paths.metrics.display(),
        "wrote results"
    );
    Ok(paths)
}

fn write_file(path: &Path, content: &str) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(path).map_err(io_err)?;
    file.write_all(content.as_bytes()).map_err(io_err)
}

const RESPONSE_COLUMNS: [&str; 13] = [
    ID_COLUMN,
    "parsed",
    "is_error",
    "errors",
    "matches",
    "match_descriptions",
    "review_attempts",
    "review_response",
    "judge_response",
    "judge_error",
    "paper_category",
    "error_location",
    "error_annotation",
];

/// One row per reviewed paper, in review order.
///
/// Extra scalar columns from the dataset follow the fixed columns, sorted by
/// name; an extra column sharing a fixed column's name is dropped. Papers that
/// were never judged have empty judge cells.
pub fn responses_csv(run: &EvaluationRun) -> String {
    let extra_columns: Vec<&str> = {
        let mut cols: Vec<&str> = run
            .records
            .iter()
            .flat_map(|r| r.extra.keys().map(String::as_str))
            .filter(|col| !RESPONSE_COLUMNS.contains(col))
            .collect();
        cols.sort_unstable();
        cols.dedup();
        cols
    };

    let header: Vec<&str> = RESPONSE_COLUMNS
        .iter()
        .copied()
        .chain(extra_columns.iter().copied())
        .collect();
    let mut out = csv_line(header.iter().map(|h| csv_escape(h)));

    let by_id: HashMap<&str, &PaperRecord> =
        run.records.iter().map(|r| (r.id.as_str(), r)).collect();
    for (slot, review) in run.reviews.iter().enumerate() {
        let record = by_id.get(review.id.as_str()).copied();
        let judgment = run.judgments.get(slot).and_then(Option::as_ref);
        let mut cells = response_cells(review, judgment, record);
        for col in &extra_columns {
            let value = record.and_then(|r| r.extra.get(*col));
            cells.push(value.map(scalar_cell).unwrap_or_default());
        }
        out.push_str(&csv_line(cells.iter().map(|c| csv_escape(c))));
    }
    out
}

fn response_cells(
    review: &ReviewerResult,
    judgment: Option<&JudgeMatch>,
    record: Option<&PaperRecord>,
) -> Vec<String> {
    let (categories, locations, annotations) = match record {
        Some(r) => (
            json_cell(&r.categories),
            json_cell(&r.error_locations),
            json_cell(&r.error_annotations),
        ),
        None => Default::default(),
    };
    vec![
        review.id.clone(),
        review.parsed.to_string(),
        review.is_error.to_string(),
        json_cell(&review.errors),
        judgment.map(|j| json_cell(&j.matches)).unwrap_or_default(),
        judgment
            .map(|j| json_cell(&j.match_descriptions))
            .unwrap_or_default(),
        review.attempts.to_string(),
        review.response.clone().unwrap_or_default(),
        judgment
            .and_then(|j| j.response.clone())
            .unwrap_or_default(),
        judgment.and_then(|j| j.error.clone()).unwrap_or_default(),
        categories,
        locations,
        annotations,
    ]
}

/// The single-row metrics file, with the per-paper breakdown as JSON.
pub fn metrics_csv(report: &MetricsReport) -> String {
    let mut out = csv_line(
        [
            "N",
            "precision_micro",
            "recall_micro",
            "precision_macro",
            "recall_macro",
            "PPR",
            "per_paper",
        ]
        .into_iter()
        .map(String::from),
    );
    let cells = [
        report.n.to_string(),
        report.precision_micro.to_string(),
        report.recall_micro.to_string(),
        report.precision_macro.to_string(),
        report.recall_macro.to_string(),
        report.ppr.to_string(),
        json_cell(&report.per_paper),
    ];
    out.push_str(&csv_line(cells.iter().map(|c| csv_escape(c))));
    out
}

fn json_cell<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn scalar_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => json_cell(other),
    }
}

fn csv_line(cells: impl Iterator<Item = String>) -> String {
    let mut line = cells.collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

fn csv_escape(s: &str) -> String {
    if s.contains('"') || s.contains(',') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

//! Dataset loading: raw rows from a JSON / JSON Lines file or an HTTP(S) URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::PaperRecord;
use crate::normalize::RawRow;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON on line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
    #[error("row {position} is not a JSON object")]
    NotAnObject { position: usize },
    #[error("dataset must be a JSON array of rows or JSON Lines")]
    NotATable,
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("dataset download failed with HTTP {0}")]
    Status(u16),
}

/// Where the dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    File(PathBuf),
    Url(String),
}

impl DatasetSource {
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            DatasetSource::Url(s.to_string())
        } else {
            DatasetSource::File(PathBuf::from(s))
        }
    }
}

impl std::fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetSource::File(p) => write!(f, "{}", p.display()),
            DatasetSource::Url(u) => write!(f, "{}", u),
        }
    }
}

fn into_row(v: Value, position: usize) -> Result<RawRow, DatasetError> {
    match v {
        Value::Object(row) => Ok(row),
        _ => Err(DatasetError::NotAnObject { position }),
    }
}

/// Parse a JSON array of objects, or one object per line (blank lines ignored).
pub fn parse_rows(text: &str) -> Result<Vec<RawRow>, DatasetError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let value: Value =
            serde_json::from_str(trimmed).map_err(|source| DatasetError::Json { line: 1, source })?;
        let Value::Array(items) = value else {
            return Err(DatasetError::NotATable);
        };
        return items
            .into_iter()
            .enumerate()
            .map(|(i, v)| into_row(v, i))
            .collect();
    }
    if !trimmed.is_empty() && !trimmed.starts_with('{') {
        return Err(DatasetError::NotATable);
    }

    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v: Value = serde_json::from_str(line)
            .map_err(|source| DatasetError::Json { line: i + 1, source })?;
        rows.push(into_row(v, rows.len())?);
    }
    Ok(rows)
}

pub fn load_file(path: &Path) -> Result<Vec<RawRow>, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rows(&text)
}

/// Load raw rows. `token` is sent as a bearer credential for URL sources.
pub async fn load_rows(
    source: &DatasetSource,
    token: Option<&str>,
    timeout: Duration,
) -> Result<Vec<RawRow>, DatasetError> {
    match source {
        DatasetSource::File(path) => load_file(path),
        DatasetSource::Url(url) => {
            let client = reqwest::Client::new();
            let mut req = client.get(url).timeout(timeout);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(DatasetError::Status(status.as_u16()));
            }
            let text = resp.text().await?;
            tracing::info!(url = %url, bytes = text.len(), "downloaded dataset");
            parse_rows(&text)
        }
    }
}

/// The slice of papers a run evaluates: positions `p` with
/// `p % num_shards == index % num_shards`.
pub fn select_shard(records: Vec<PaperRecord>, index: usize, num_shards: usize) -> Vec<PaperRecord> {
    let num_shards = num_shards.max(1);
    let shard = index % num_shards;
    records
        .into_iter()
        .enumerate()
        .filter(|(p, _)| p % num_shards == shard)
        .map(|(_, r)| r)
        .collect()
}

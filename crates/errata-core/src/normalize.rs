//! Grouping of raw per-annotation rows into one record per paper.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::{CONTENT_COLUMN, ID_COLUMN, LIST_COLUMNS, PaperRecord};

/// A dataset row as loaded: column name to value.
pub type RawRow = Map<String, Value>;

fn is_list_column(col: &str) -> bool {
    LIST_COLUMNS.contains(&col)
}

fn identifier_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Group rows by identifier, one output row per paper, ordered by identifier.
///
/// List columns collect every row's values in source order (arrays are
/// spliced, nulls skipped); other columns keep the first non-null value.
/// Normalizing an already-normalized table returns it unchanged.
pub fn normalize_rows(rows: impl IntoIterator<Item = RawRow>) -> Vec<RawRow> {
    let mut grouped: BTreeMap<String, RawRow> = BTreeMap::new();

    for (position, row) in rows.into_iter().enumerate() {
        let Some(key) = row.get(ID_COLUMN).and_then(identifier_key) else {
            tracing::warn!(position, "skipping row without {ID_COLUMN}");
            continue;
        };
        let entry = grouped.entry(key).or_insert_with(|| {
            LIST_COLUMNS
                .iter()
                .map(|col| (col.to_string(), Value::Array(vec![])))
                .collect()
        });

        for (col, value) in row {
            if is_list_column(&col) {
                let slot = entry
                    .entry(col)
                    .or_insert_with(|| Value::Array(vec![]));
                if let Value::Array(items) = slot {
                    match value {
                        Value::Array(values) => items.extend(values),
                        Value::Null => {}
                        v => items.push(v),
                    }
                }
            } else {
                match entry.get(&col) {
                    None | Some(Value::Null) => {
                        entry.insert(col, value);
                    }
                    Some(_) => {}
                }
            }
        }
    }

    grouped.into_values().collect()
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items.iter().map(cell_string).collect(),
        Some(Value::Null) | None => vec![],
        Some(other) => vec![cell_string(other)],
    }
}

fn cell_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl PaperRecord {
    /// Build a typed record from a normalized row. `None` if the identifier is missing.
    pub fn from_row(mut row: RawRow) -> Option<Self> {
        let id = row.get(ID_COLUMN).and_then(identifier_key)?;
        row.remove(ID_COLUMN);
        let content = row.remove(CONTENT_COLUMN).unwrap_or(Value::Null);
        let categories = string_list(row.get("paper_category"));
        let error_locations = string_list(row.get("error_location"));
        let error_annotations = string_list(row.get("error_annotation"));
        for col in LIST_COLUMNS {
            row.remove(col);
        }

        if error_locations.len() != error_annotations.len() {
            tracing::warn!(
                paper = %id,
                locations = error_locations.len(),
                annotations = error_annotations.len(),
                "error_location and error_annotation differ in length"
            );
        }

        Some(Self {
            id,
            content,
            categories,
            error_locations,
            error_annotations,
            extra: row.into_iter().collect(),
        })
    }
}

/// Group raw rows and convert them into paper records.
pub fn normalize(rows: impl IntoIterator<Item = RawRow>) -> Vec<PaperRecord> {
    normalize_rows(rows)
        .into_iter()
        .filter_map(PaperRecord::from_row)
        .collect()
}

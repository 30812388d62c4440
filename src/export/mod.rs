//! CSV exports of a checkpoint joined back onto its input rows.
//!
//! Epistemic foundation:
//! - K_i: Every input row appears in the flat export, processed or not
//! - K_i: Column order is input headers, then a fixed derived set
//! - K_i: The target export has the flat schema, filtered to targets

use crate::checkpoint::Checkpoint;
use crate::models::{AltdataError, InputTable, Result, SubItem, UnitOutcome, WorkResult};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Columns appended to the input headers in the flat export.
pub const DERIVED_COLUMNS: [&str; 10] = [
    "unit_index",
    "unit_status",
    "item_name",
    "item_first_name",
    "item_last_name",
    "lookup_key",
    "item_value",
    "enrichment_status",
    "is_target",
    "error",
];

/// Columns appended to the input headers in the per-unit export.
pub const AGGREGATE_COLUMNS: [&str; 8] = [
    "unit_index",
    "unit_status",
    "total_items",
    "target_items",
    "has_target",
    "item_names",
    "item_values",
    "lookup_keys",
];

const JOIN: &str = " | ";

/// An in-memory CSV: header row plus data rows of equal width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ExportTable {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.rows.get(row)?.get(idx).map(String::as_str)
    }

    /// Rows whose `is_target` column is true, same schema.
    pub fn targets(&self) -> ExportTable {
        let Some(idx) = self.headers.iter().position(|h| h == "is_target") else {
            return ExportTable {
                headers: self.headers.clone(),
                rows: Vec::new(),
            };
        };
        ExportTable {
            headers: self.headers.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row.get(idx).is_some_and(|v| v == "true"))
                .cloned()
                .collect(),
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| AltdataError::io(format!("creating {}", parent.display()), e))?;
        }

        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| AltdataError::csv(format!("opening {}", path.display()), e))?;
        writer
            .write_record(&self.headers)
            .map_err(|e| AltdataError::csv("writing export headers", e))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|e| AltdataError::csv("writing export row", e))?;
        }
        writer
            .flush()
            .map_err(|e| AltdataError::io(format!("flushing {}", path.display()), e))?;

        info!(path = %path.display(), rows = self.rows.len(), "Wrote export");
        Ok(())
    }
}

fn unit_status(result: Option<&WorkResult>) -> &'static str {
    match result.map(|r| &r.outcome) {
        None => "unprocessed",
        Some(UnitOutcome::Success { .. }) => "success",
        Some(UnitOutcome::Failure { .. }) => "failure",
    }
}

/// Input cells for every recorded or input unit, in unit order.
///
/// Results whose index lies beyond the input are kept with blank input
/// cells.
fn units<'a>(
    checkpoint: &'a Checkpoint,
    input: &'a InputTable,
) -> Vec<(usize, Vec<String>, Option<&'a WorkResult>)> {
    let by_index: HashMap<usize, &WorkResult> =
        checkpoint.results.iter().map(|r| (r.unit_index, r)).collect();
    let blank = vec![String::new(); input.headers().len()];

    let mut units: Vec<_> = input
        .rows()
        .iter()
        .enumerate()
        .map(|(index, row)| (index, row.values.clone(), by_index.get(&index).copied()))
        .collect();

    let mut orphans: Vec<&WorkResult> = checkpoint
        .results
        .iter()
        .filter(|r| r.unit_index >= input.rows().len())
        .collect();
    if !orphans.is_empty() {
        warn!(count = orphans.len(), "Results reference rows missing from the input");
        orphans.sort_by_key(|r| r.unit_index);
        units.extend(orphans.into_iter().map(|r| (r.unit_index, blank.clone(), Some(r))));
    }
    units
}

fn item_cells(item: &SubItem) -> [String; 7] {
    [
        item.name.clone(),
        item.first_name().to_string(),
        item.last_name(),
        item.lookup_key.clone(),
        item.value.clone().unwrap_or_default(),
        item.status.as_str().to_string(),
        item.is_target.to_string(),
    ]
}

/// One row per sub-item; one row with blank item cells for units without
/// sub-items.
pub fn flatten(checkpoint: &Checkpoint, input: &InputTable) -> ExportTable {
    let mut headers = input.headers().to_vec();
    headers.extend(DERIVED_COLUMNS.iter().map(|c| c.to_string()));

    let mut rows = Vec::new();
    for (index, values, result) in units(checkpoint, input) {
        let status = unit_status(result);
        let error = result.and_then(WorkResult::error).unwrap_or_default().to_string();
        let items = result.map(WorkResult::payload).unwrap_or_default();

        let mut push = |cells: [String; 7]| {
            let mut row = values.clone();
            row.push(index.to_string());
            row.push(status.to_string());
            row.extend(cells);
            row.push(error.clone());
            rows.push(row);
        };

        if items.is_empty() {
            push(Default::default());
        } else {
            for item in items {
                push(item_cells(item));
            }
        }
    }

    ExportTable { headers, rows }
}

/// One row per unit with item counts and joined item fields.
pub fn aggregate(checkpoint: &Checkpoint, input: &InputTable) -> ExportTable {
    let mut headers = input.headers().to_vec();
    headers.extend(AGGREGATE_COLUMNS.iter().map(|c| c.to_string()));

    let rows = units(checkpoint, input)
        .into_iter()
        .map(|(index, mut row, result)| {
            let items = result.map(WorkResult::payload).unwrap_or_default();
            let targets = items.iter().filter(|i| i.is_target).count();
            let join = |f: fn(&SubItem) -> Option<&str>| {
                items
                    .iter()
                    .filter_map(f)
                    .filter(|v| !v.is_empty())
                    .collect::<Vec<_>>()
                    .join(JOIN)
            };

            row.extend([
                index.to_string(),
                unit_status(result).to_string(),
                items.len().to_string(),
                targets.to_string(),
                (targets > 0).to_string(),
                join(|i| Some(i.name.as_str())),
                join(|i| i.value.as_deref()),
                join(|i| Some(i.lookup_key.as_str())),
            ]);
            row
        })
        .collect();

    ExportTable { headers, rows }
}

/// Paths written by [`write_exports`].
#[derive(Debug, Clone, Serialize)]
pub struct ExportPaths {
    pub all: PathBuf,
    pub targets: PathBuf,
    pub by_unit: PathBuf,
    pub rows: usize,
    pub target_rows: usize,
}

/// Write the flat, target and per-unit exports with a shared timestamp.
pub fn write_exports(
    checkpoint: &Checkpoint,
    input: &InputTable,
    dir: &Path,
    prefix: &str,
) -> Result<ExportPaths> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = |kind: &str| dir.join(format!("{prefix}_{kind}_{stamp}.csv"));

    let flat = flatten(checkpoint, input);
    let targets = flat.targets();
    let paths = ExportPaths {
        all: path("all"),
        targets: path("targets"),
        by_unit: path("by_unit"),
        rows: flat.len(),
        target_rows: targets.len(),
    };

    flat.write_csv(&paths.all)?;
    targets.write_csv(&paths.targets)?;
    aggregate(checkpoint, input).write_csv(&paths.by_unit)?;
    Ok(paths)
}

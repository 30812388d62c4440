//! Input table: the ordered list of units a pipeline works through.

use crate::checkpoint::UnitSource;
use crate::models::{AltdataError, Result};
use std::fs::File;
use std::path::Path;
use tracing::info;

/// One input row, addressed by its position in the table.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    /// Display name taken from the configured name column
    pub name: String,
    /// All cell values, in header order
    pub values: Vec<String>,
}

/// CSV-backed input with a header row.
#[derive(Debug, Clone, Default)]
pub struct InputTable {
    headers: Vec<String>,
    rows: Vec<InputRow>,
}

impl InputTable {
    /// Load a CSV file, taking unit names from `name_column`.
    pub fn load(path: &Path, name_column: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| AltdataError::io("opening input file", e))?;
        let table = Self::from_reader(file, name_column)?;
        info!(count = table.rows.len(), path = %path.display(), "Loaded input rows");
        Ok(table)
    }

    /// Parse CSV from any reader.
    pub fn from_reader<R: std::io::Read>(reader: R, name_column: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| AltdataError::csv("reading input headers", e))?
            .iter()
            .map(str::to_string)
            .collect();

        let name_idx = headers
            .iter()
            .position(|h| h == name_column)
            .ok_or_else(|| {
                AltdataError::InvalidInput(format!(
                    "name column '{name_column}' not found in input headers {headers:?}"
                ))
            })?;

        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record =
                record.map_err(|e| AltdataError::csv(format!("reading input row {}", line + 1), e))?;
            let mut values: Vec<String> = record.iter().map(str::to_string).collect();
            values.resize(headers.len(), String::new());
            rows.push(InputRow {
                name: values[name_idx].clone(),
                values,
            });
        }

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[InputRow] {
        &self.rows
    }

    /// Value of `column` in `row`, empty when the column is absent.
    pub fn value<'a>(&self, row: &'a InputRow, column: &str) -> &'a str {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|idx| row.values.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl UnitSource for InputTable {
    type Unit = InputRow;

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn get(&self, index: usize) -> Option<&InputRow> {
        self.rows.get(index)
    }
}

//! Header-addressed tabular row store.
//!
//! Rows use sheet numbering: row 1 is the header, data starts at row 2.
//! Columns are 0-based indices into the header row.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::HeaderMap;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowStoreError {
    #[error("sheet `{0}` not found")]
    SheetNotFound(String),
    #[error("sheet `{0}` already exists")]
    SheetExists(String),
    #[error("row {row} is outside sheet `{sheet}`")]
    RowOutOfRange { sheet: String, row: usize },
}

/// Point-in-time copy of one sheet. Later writes are not reflected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl SheetSnapshot {
    pub fn headers(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn header_map(&self) -> HeaderMap {
        HeaderMap::from_headers(self.headers())
    }

    /// Number of the last populated row (1 when only the header exists, 0 when empty).
    pub fn last_row(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, row_number: usize) -> Option<&[String]> {
        if row_number == 0 {
            return None;
        }
        self.rows.get(row_number - 1).map(Vec::as_slice)
    }

    /// Cell text; missing cells read as blank.
    pub fn cell(&self, row_number: usize, col: usize) -> &str {
        self.row(row_number)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// `(row_number, cells)` for every row below the header.
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, r)| (idx + 1, r.as_slice()))
    }
}

/// The operations the engines need from a spreadsheet-like store.
pub trait RowStore {
    fn sheet_names(&self) -> Vec<String>;

    fn snapshot(&self, sheet: &str) -> Option<SheetSnapshot>;

    fn set_cell(&mut self, sheet: &str, row: usize, col: usize, value: &str)
        -> Result<(), RowStoreError>;

    /// Append rows after the last populated row.
    fn append_rows(&mut self, sheet: &str, rows: Vec<Vec<String>>) -> Result<(), RowStoreError>;

    fn create_sheet(&mut self, sheet: &str, headers: Vec<String>) -> Result<(), RowStoreError>;

    fn has_sheet(&self, sheet: &str) -> bool {
        self.sheet_names().iter().any(|s| s == sheet)
    }
}

/// In-memory workbook. Persisted by the storage crate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Vec<SheetSnapshot>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by fixtures: headers first, then data rows.
    pub fn with_sheet(mut self, name: &str, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        self.sheets.push(SheetSnapshot {
            name: name.to_string(),
            rows,
        });
        self
    }

    fn sheet_mut(&mut self, sheet: &str) -> Result<&mut SheetSnapshot, RowStoreError> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == sheet)
            .ok_or_else(|| RowStoreError::SheetNotFound(sheet.to_string()))
    }
}

impl RowStore for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn snapshot(&self, sheet: &str) -> Option<SheetSnapshot> {
        self.sheets.iter().find(|s| s.name == sheet).cloned()
    }

    fn set_cell(
        &mut self,
        sheet: &str,
        row: usize,
        col: usize,
        value: &str,
    ) -> Result<(), RowStoreError> {
        let target = self.sheet_mut(sheet)?;
        if row == 0 {
            return Err(RowStoreError::RowOutOfRange {
                sheet: sheet.to_string(),
                row,
            });
        }
        if target.rows.len() < row {
            target.rows.resize_with(row, Vec::new);
        }
        let cells = &mut target.rows[row - 1];
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = value.to_string();
        Ok(())
    }

    fn append_rows(&mut self, sheet: &str, rows: Vec<Vec<String>>) -> Result<(), RowStoreError> {
        let target = self.sheet_mut(sheet)?;
        while target
            .rows
            .last()
            .is_some_and(|r| target.rows.len() > 1 && r.iter().all(|c| c.is_empty()))
        {
            target.rows.pop();
        }
        target.rows.extend(rows);
        Ok(())
    }

    fn create_sheet(&mut self, sheet: &str, headers: Vec<String>) -> Result<(), RowStoreError> {
        if self.has_sheet(sheet) {
            return Err(RowStoreError::SheetExists(sheet.to_string()));
        }
        self.sheets.push(SheetSnapshot {
            name: sheet.to_string(),
            rows: vec![headers],
        });
        Ok(())
    }
}

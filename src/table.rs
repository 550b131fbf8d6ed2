//! Tabular side payloads.
//!
//! A [`Table`] holds named, typed columns in insertion order. Tables ride
//! along with a data handle either globally (catalogs shared by every
//! subunit) or attached to a single subunit.

use indexmap::IndexMap;

use crate::error::{Error, Result};

// ── Columns ──

/// One typed column of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// 16-bit signed integers (TFORM `I`).
    Int16(Vec<i16>),
    /// 32-bit signed integers (TFORM `J`).
    Int32(Vec<i32>),
    /// 64-bit signed integers (TFORM `K`).
    Int64(Vec<i64>),
    /// 32-bit floats (TFORM `E`).
    Float32(Vec<f32>),
    /// 64-bit floats (TFORM `D`).
    Float64(Vec<f64>),
    /// Fixed-width character strings (TFORM `A`), trailing blanks trimmed.
    Text(Vec<String>),
}

impl Column {
    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        match self {
            Column::Int16(v) => v.len(),
            Column::Int32(v) => v.len(),
            Column::Int64(v) => v.len(),
            Column::Float32(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    /// Returns `true` if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name used in structural summaries.
    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Int16(_) => "int16",
            Column::Int32(_) => "int32",
            Column::Int64(_) => "int64",
            Column::Float32(_) => "float32",
            Column::Float64(_) => "float64",
            Column::Text(_) => "str",
        }
    }

    /// Cell value as a float, if the column is numeric.
    pub fn get_float(&self, row: usize) -> Option<f64> {
        match self {
            Column::Int16(v) => v.get(row).map(|x| *x as f64),
            Column::Int32(v) => v.get(row).map(|x| *x as f64),
            Column::Int64(v) => v.get(row).map(|x| *x as f64),
            Column::Float32(v) => v.get(row).map(|x| *x as f64),
            Column::Float64(v) => v.get(row).copied(),
            Column::Text(_) => None,
        }
    }

    /// Cell value as text, if the column is a string column.
    pub fn get_text(&self, row: usize) -> Option<&str> {
        match self {
            Column::Text(v) => v.get(row).map(String::as_str),
            _ => None,
        }
    }
}

// ── Table ──

/// A named-column table with columns kept in insertion order.
///
/// Every column must have the same number of rows; [`Table::add_column`]
/// enforces this against the first column added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: IndexMap<String, Column>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Table {
            columns: IndexMap::new(),
        }
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows (zero for a table with no columns).
    pub fn nrows(&self) -> usize {
        self.columns
            .first()
            .map(|(_, col)| col.len())
            .unwrap_or(0)
    }

    /// Returns `true` if the table has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Add a column. Fails if the name is taken or the row count does not
    /// match the existing columns.
    pub fn add_column(&mut self, name: &str, column: Column) -> Result<()> {
        if self.columns.contains_key(name) {
            return Err(Error::StructuralConflict(String::from(name)));
        }
        if !self.columns.is_empty() && column.len() != self.nrows() {
            return Err(Error::InvalidOperation(
                "column row count does not match the table",
            ));
        }
        self.columns.insert(String::from(name), column);
        Ok(())
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterate over `(name, column)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }
}

// ── Tests ──

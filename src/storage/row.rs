//! # Row Management
use super::column::ColumnValue;
use std::collections::HashMap;

/// Represents a database row with flexible column storage.
///
/// The `Row` struct uses a `HashMap` to store column values, allowing
/// for dynamic and schema-based row representation.
#[derive(Debug, Clone)]
pub struct Row {
    /// Internal storage of column values
    pub inner: HashMap<String, ColumnValue>,
}

impl Row {
    /// Retrieves a column value as a string representation.
    pub fn get_column(&self, column: &str) -> Option<String> {
        Some(self.inner.get(column)?.to_string())
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formatted_columns: Vec<String> = self
            .inner
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value.to_string()))
            .collect();

        write!(f, "Row({})", formatted_columns.join(", "))
    }
}

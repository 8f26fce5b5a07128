use crate::error::{DashboardError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A single table value. Numbers are always finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

/// Hashable identity of a non-null cell, used as a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Number(u64),
    Text(String),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Build a numeric cell, mapping NaN and infinities to `Null`.
    pub fn number(v: f64) -> Self {
        if v.is_finite() {
            Cell::Number(v)
        } else {
            Cell::Null
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<CellKey> {
        match self {
            Cell::Null => None,
            // -0.0 and 0.0 must land in the same group
            Cell::Number(v) => Some(CellKey::Number((v + 0.0).to_bits())),
            Cell::Text(s) => Some(CellKey::Text(s.clone())),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::number(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "values")]
    pub cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Ordered, columnar collection of rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<Column>,
    #[serde(skip)]
    height: usize,
}

impl Table {
    /// Build a table, checking that every column has the same length.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let height = columns.first().map(Column::len).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.len() != height) {
            return Err(DashboardError::Parse(format!(
                "Column '{}' has {} values, expected {}",
                bad.name,
                bad.len(),
                height
            )));
        }
        Ok(Self { columns, height })
    }

    /// Caller guarantees equal column lengths.
    pub(crate) fn from_columns(columns: Vec<Column>) -> Self {
        let height = columns.first().map(Column::len).unwrap_or(0);
        debug_assert!(columns.iter().all(|c| c.len() == height));
        Self { columns, height }
    }

    pub fn empty_like(&self) -> Self {
        Self::from_columns(
            self.columns
                .iter()
                .map(|c| Column::new(c.name.clone(), Vec::new()))
                .collect(),
        )
    }

    /// Build a table from a header row and row-major cells.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut columns: Vec<Column> = headers
            .into_iter()
            .map(|h| Column::new(h, Vec::with_capacity(rows.len())))
            .collect();

        for (i, row) in rows.into_iter().enumerate() {
            if row.len() > columns.len() {
                return Err(DashboardError::Parse(format!(
                    "Row {} has {} fields but the header has {}",
                    i + 1,
                    row.len(),
                    columns.len()
                )));
            }
            let width = row.len();
            for (col, cell) in columns.iter_mut().zip(row) {
                col.cells.push(cell);
            }
            // Short rows are padded with nulls
            for col in columns.iter_mut().skip(width) {
                col.cells.push(Cell::Null);
            }
        }

        Ok(Self::from_columns(columns))
    }

    /// Create a table from a JSON array of objects
    pub fn from_json(value: &Value) -> Result<Self> {
        let array = value
            .as_array()
            .ok_or_else(|| DashboardError::Parse("Input data must be a JSON array of objects".into()))?;

        if array.is_empty() {
            return Err(DashboardError::Parse("Input data array is empty".into()));
        }

        // Extract headers from the first object
        let first_obj = array[0]
            .as_object()
            .ok_or_else(|| DashboardError::Parse("Items in array must be objects".into()))?;

        let headers: Vec<String> = first_obj.keys().cloned().collect();

        let mut rows = Vec::with_capacity(array.len());
        for item in array {
            let obj = item
                .as_object()
                .ok_or_else(|| DashboardError::Parse("Items in array must be objects".into()))?;

            let mut row = Vec::with_capacity(headers.len());
            for header in &headers {
                let cell = match obj.get(header) {
                    Some(Value::String(s)) if s.trim().is_empty() => Cell::Null,
                    Some(Value::String(s)) => Cell::Text(s.clone()),
                    Some(Value::Number(n)) => n.as_f64().map(Cell::number).unwrap_or(Cell::Null),
                    Some(Value::Bool(b)) => Cell::Text(b.to_string()),
                    Some(Value::Null) | None => Cell::Null,
                    _ => {
                        return Err(DashboardError::Parse(format!(
                            "Unsupported value type for field '{}'",
                            header
                        )))
                    }
                };
                row.push(cell);
            }
            rows.push(row);
        }

        Self::from_rows(headers, rows)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| DashboardError::ColumnNotFound(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_ok()
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        Ok(&self.columns[self.column_index(name)?])
    }

    pub fn cells(&self, name: &str) -> Result<&[Cell]> {
        Ok(&self.column(name)?.cells)
    }

    /// Copy of the table restricted to the given row indices, in that order.
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), indices.iter().map(|&i| c.cells[i].clone()).collect()))
            .collect();
        Self::from_columns(columns)
    }

    /// Keep rows for which `keep` returns true.
    pub fn filter_rows<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(usize) -> bool,
    {
        let indices: Vec<usize> = (0..self.height).filter(|&i| keep(i)).collect();
        self.take_rows(&indices)
    }

    /// Replace the column with the same name, or append it.
    pub fn with_column(mut self, column: Column) -> Result<Self> {
        if column.len() != self.height && !self.columns.is_empty() {
            return Err(DashboardError::Parse(format!(
                "Column '{}' has {} values, expected {}",
                column.name,
                column.len(),
                self.height
            )));
        }
        match self.column_index(&column.name) {
            Ok(idx) => self.columns[idx] = column,
            Err(_) => {
                if self.columns.is_empty() {
                    self.height = column.len();
                }
                self.columns.push(column);
            }
        }
        Ok(self)
    }

    /// Keep only the named columns, in table order. Unknown names are ignored.
    pub fn select(&self, names: &[&str]) -> Self {
        let columns = self
            .columns
            .iter()
            .filter(|c| names.iter().any(|n| c.name.eq_ignore_ascii_case(n)))
            .cloned()
            .collect();
        Self { columns, height: self.height }
    }

    pub fn rename_column(mut self, from: &str, to: &str) -> Result<Self> {
        let idx = self.column_index(from)?;
        self.columns[idx].name = to.to_string();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json() {
        let value = json!([
            {"NOMBRE_PAIS": "Perú", "FOBDOL_MILLONES": 1.5},
            {"NOMBRE_PAIS": "Chile", "FOBDOL_MILLONES": null},
        ]);
        let table = Table::from_json(&value).unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.cells("NOMBRE_PAIS").unwrap()[1], Cell::text("Chile"));
        assert_eq!(table.cells("FOBDOL_MILLONES").unwrap()[0], Cell::Number(1.5));
        assert!(table.cells("FOBDOL_MILLONES").unwrap()[1].is_null());
    }

    #[test]
    fn test_from_json_rejects_non_array() {
        assert!(Table::from_json(&json!({"a": 1})).is_err());
        assert!(Table::from_json(&json!([])).is_err());
    }

    #[test]
    fn test_column_lookup_ignores_case() {
        let table = Table::from_rows(vec!["REGIM".into()], vec![vec![Cell::text("40")]]).unwrap();
        assert_eq!(table.column_index("regim").unwrap(), 0);
        assert!(matches!(table.column("POSAR"), Err(DashboardError::ColumnNotFound(_))));
    }

    #[test]
    fn test_short_rows_are_padded() {
        let table = Table::from_rows(
            vec!["a".into(), "b".into()],
            vec![vec![Cell::Number(1.0)], vec![Cell::Number(2.0), Cell::Number(3.0)]],
        )
        .unwrap();
        assert_eq!(table.height(), 2);
        assert!(table.cells("b").unwrap()[0].is_null());
    }

    #[test]
    fn test_long_rows_are_rejected() {
        let res = Table::from_rows(vec!["a".into()], vec![vec![Cell::Number(1.0), Cell::Number(2.0)]]);
        assert!(res.is_err());
    }

    #[test]
    fn test_number_cells_are_finite() {
        assert!(Cell::number(f64::NAN).is_null());
        assert!(Cell::number(f64::INFINITY).is_null());
        assert_eq!(Cell::number(-0.0).key(), Cell::number(0.0).key());
    }

    #[test]
    fn test_display_integral_number() {
        assert_eq!(Cell::Number(2023.0).to_string(), "2023");
        assert_eq!(Cell::Null.to_string(), "");
    }
}

use crate::data::{Cell, Column, Table};
use crate::error::Result;
use crate::schema::canonical_month;
use tracing::{debug, warn};

/// Parse `column` as floating point. Values that do not parse become null.
/// Applying it twice yields the same table.
pub fn coerce_numeric(table: &Table, column: &str) -> Result<Table> {
    let col = table.column(column)?;
    let mut nulled = 0usize;
    let cells: Vec<Cell> = col
        .cells
        .iter()
        .map(|cell| {
            let out = parse_number(cell);
            if out.is_null() && !cell.is_null() {
                nulled += 1;
            }
            out
        })
        .collect();

    if nulled > 0 {
        debug!(column = %col.name, nulled, "non-numeric values coerced to null");
    }
    table.clone().with_column(Column::new(col.name.clone(), cells))
}

fn parse_number(cell: &Cell) -> Cell {
    match cell {
        Cell::Null => Cell::Null,
        Cell::Number(v) => Cell::number(*v),
        Cell::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Cell::Null;
            }
            trimmed.parse::<f64>().map(Cell::number).unwrap_or(Cell::Null)
        }
    }
}

/// Turn `column` into categorical text. Integral numbers lose their fractional
/// part (`90111.0` becomes `"90111"`); nulls stay null.
pub fn coerce_text(table: &Table, column: &str) -> Result<Table> {
    let col = table.column(column)?;
    let cells = col
        .cells
        .iter()
        .map(|cell| match cell {
            Cell::Number(v) => Cell::Text(v.to_string()),
            other => other.clone(),
        })
        .collect();
    table.clone().with_column(Column::new(col.name.clone(), cells))
}

/// Rewrite month labels to their canonical spelling. Labels that are not one
/// of the twelve months become null; the second value is how many were lost.
pub fn canonicalize_months(table: &Table, column: &str) -> Result<(Table, usize)> {
    let col = table.column(column)?;
    let mut dropped = 0usize;
    let cells = col
        .cells
        .iter()
        .map(|cell| {
            let label = match cell {
                Cell::Null => return Cell::Null,
                Cell::Text(s) => s.clone(),
                Cell::Number(v) => v.to_string(),
            };
            match canonical_month(&label) {
                Some(m) => Cell::text(m),
                None => {
                    dropped += 1;
                    Cell::Null
                }
            }
        })
        .collect();

    if dropped > 0 {
        warn!(column = %col.name, dropped, "unrecognized month labels treated as missing");
    }
    Ok((table.clone().with_column(Column::new(col.name.clone(), cells))?, dropped))
}

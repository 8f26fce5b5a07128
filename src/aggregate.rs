use crate::data::{Cell, CellKey, Column, Table};
use crate::error::{DashboardError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

// =============================================================================
// Aggregation specs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Mean,
    Count,
}

/// One output column of a grouped table.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Source column. `None` is only meaningful for `Count` and counts rows.
    pub column: Option<String>,
    pub func: AggFunc,
    pub label: Option<String>,
}

impl Metric {
    pub fn sum(column: &str) -> Self {
        Self { column: Some(column.to_string()), func: AggFunc::Sum, label: None }
    }

    pub fn mean(column: &str) -> Self {
        Self { column: Some(column.to_string()), func: AggFunc::Mean, label: None }
    }

    /// Count of non-null values in `column`.
    pub fn count(column: &str) -> Self {
        Self { column: Some(column.to_string()), func: AggFunc::Count, label: None }
    }

    /// Count of rows per group.
    pub fn rows() -> Self {
        Self { column: None, func: AggFunc::Count, label: None }
    }

    pub fn labeled(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn output_name(&self) -> String {
        match (&self.label, &self.column) {
            (Some(label), _) => label.clone(),
            (None, Some(col)) => col.clone(),
            (None, None) => "count".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSpec {
    pub group_by: Vec<String>,
    pub metrics: Vec<Metric>,
}

impl AggregationSpec {
    pub fn new(group_by: &[&str], metrics: Vec<Metric>) -> Self {
        Self {
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            metrics,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    sum: f64,
    numeric: usize,
    present: usize,
    rows: usize,
}

impl Accumulator {
    fn push(&mut self, cell: Option<&Cell>) {
        self.rows += 1;
        if let Some(cell) = cell {
            if !cell.is_null() {
                self.present += 1;
            }
            if let Some(v) = cell.as_f64() {
                self.sum += v;
                self.numeric += 1;
            }
        }
    }

    fn finish(&self, metric: &Metric) -> Cell {
        match (metric.func, &metric.column) {
            // Nulls contribute nothing; an all-null group sums to 0
            (AggFunc::Sum, _) => Cell::number(self.sum),
            (AggFunc::Mean, _) if self.numeric == 0 => Cell::Null,
            (AggFunc::Mean, _) => Cell::number(self.sum / self.numeric as f64),
            (AggFunc::Count, Some(_)) => Cell::Number(self.present as f64),
            (AggFunc::Count, None) => Cell::Number(self.rows as f64),
        }
    }
}

/// Group `table` by `spec.group_by` and compute every metric per group.
///
/// Groups appear in order of first occurrence. Rows with a null in any key
/// column are dropped.
pub fn aggregate(table: &Table, spec: &AggregationSpec) -> Result<Table> {
    let key_idx: Vec<usize> = spec
        .group_by
        .iter()
        .map(|c| table.column_index(c))
        .collect::<Result<_>>()?;

    let metric_idx: Vec<Option<usize>> = spec
        .metrics
        .iter()
        .map(|m| match (&m.column, m.func) {
            (Some(c), _) => table.column_index(c).map(Some),
            (None, AggFunc::Count) => Ok(None),
            (None, func) => Err(DashboardError::ColumnNotFound(format!(
                "{:?} metric requires a source column",
                func
            ))),
        })
        .collect::<Result<_>>()?;

    let mut group_of: HashMap<Vec<CellKey>, usize> = HashMap::new();
    let mut first_rows: Vec<usize> = Vec::new();
    let mut accs: Vec<Vec<Accumulator>> = Vec::new();

    for row in 0..table.height() {
        let key: Option<Vec<CellKey>> = key_idx
            .iter()
            .map(|&c| table.columns[c].cells[row].key())
            .collect();
        let Some(key) = key else { continue };

        let group = *group_of.entry(key).or_insert_with(|| {
            first_rows.push(row);
            accs.push(vec![Accumulator::default(); metric_idx.len()]);
            first_rows.len() - 1
        });

        for (acc, idx) in accs[group].iter_mut().zip(&metric_idx) {
            acc.push(idx.map(|c| &table.columns[c].cells[row]));
        }
    }

    let mut columns: Vec<Column> = key_idx
        .iter()
        .map(|&c| {
            let src = &table.columns[c];
            Column::new(src.name.clone(), first_rows.iter().map(|&r| src.cells[r].clone()).collect())
        })
        .collect();

    for (m, metric) in spec.metrics.iter().enumerate() {
        columns.push(Column::new(
            metric.output_name(),
            accs.iter().map(|group| group[m].finish(metric)).collect(),
        ));
    }

    Ok(Table::from_columns(columns))
}

pub fn group_sum(table: &Table, group_cols: &[&str], metric_col: &str) -> Result<Table> {
    aggregate(table, &AggregationSpec::new(group_cols, vec![Metric::sum(metric_col)]))
}

pub fn group_mean(table: &Table, group_cols: &[&str], metric_col: &str) -> Result<Table> {
    aggregate(table, &AggregationSpec::new(group_cols, vec![Metric::mean(metric_col)]))
}

pub fn group_count(table: &Table, group_cols: &[&str]) -> Result<Table> {
    aggregate(table, &AggregationSpec::new(group_cols, vec![Metric::rows()]))
}

// =============================================================================
// Top-N selection
// =============================================================================

/// The `n` most frequent non-null values of `key_col`, most frequent first.
/// Ties keep first-occurrence order.
pub fn top_n_categories(table: &Table, key_col: &str, n: usize) -> Result<Vec<Cell>> {
    let counts = group_count(table, &[key_col])?;
    ranked_keys(&counts, n)
}

/// The `n` values of `group_col` with the largest `metric_col` sums.
/// Ties keep first-occurrence order.
pub fn top_n_by_sum(table: &Table, group_col: &str, metric_col: &str, n: usize) -> Result<Vec<Cell>> {
    let sums = group_sum(table, &[group_col], metric_col)?;
    ranked_keys(&sums, n)
}

/// Rank a two-column (key, value) grouped table by value, descending.
fn ranked_keys(grouped: &Table, n: usize) -> Result<Vec<Cell>> {
    let keys = &grouped.columns[0].cells;
    let values = &grouped.columns[1].cells;
    let mut order: Vec<usize> = (0..grouped.height()).collect();
    // sort_by is stable, so equal values stay in first-occurrence order
    order.sort_by(|&a, &b| {
        let va = values[a].as_f64().unwrap_or(f64::NEG_INFINITY);
        let vb = values[b].as_f64().unwrap_or(f64::NEG_INFINITY);
        vb.total_cmp(&va)
    });
    Ok(order.into_iter().take(n).map(|i| keys[i].clone()).collect())
}

// =============================================================================
// Row filters
// =============================================================================

/// Keep rows where every column in `cols` is a number strictly above zero.
pub fn filter_positive(table: &Table, cols: &[&str]) -> Result<Table> {
    let idx: Vec<usize> = cols.iter().map(|c| table.column_index(c)).collect::<Result<_>>()?;
    Ok(table.filter_rows(|row| {
        idx.iter()
            .all(|&c| matches!(table.columns[c].cells[row].as_f64(), Some(v) if v > 0.0))
    }))
}

/// Keep rows where `col` is a number below `max_exclusive`.
pub fn filter_range(table: &Table, col: &str, max_exclusive: f64) -> Result<Table> {
    let cells = table.cells(col)?;
    Ok(table.filter_rows(|row| matches!(cells[row].as_f64(), Some(v) if v < max_exclusive)))
}

pub fn filter_eq(table: &Table, col: &str, value: &Cell) -> Result<Table> {
    let cells = table.cells(col)?;
    let Some(wanted) = value.key() else {
        return Ok(table.empty_like());
    };
    Ok(table.filter_rows(|row| cells[row].key().as_ref() == Some(&wanted)))
}

pub fn filter_in(table: &Table, col: &str, values: &[Cell]) -> Result<Table> {
    let cells = table.cells(col)?;
    let wanted: HashSet<CellKey> = values.iter().filter_map(Cell::key).collect();
    Ok(table.filter_rows(|row| cells[row].key().is_some_and(|k| wanted.contains(&k))))
}

/// Deterministic uniform sample of exactly `max_rows` rows when the table is
/// larger; otherwise the table itself. Sampled rows keep their input order.
pub fn bounded_sample(table: &Table, max_rows: usize, seed: u64) -> Table {
    if table.height() <= max_rows {
        return table.clone();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, table.height(), max_rows).into_vec();
    picked.sort_unstable();
    table.take_rows(&picked)
}

// =============================================================================
// Ordering
// =============================================================================

/// Total order used for sorting: numbers, then text, then nulls.
pub fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::Number(x), Cell::Number(y)) => x.total_cmp(y),
        (Cell::Text(x), Cell::Text(y)) => x.cmp(y),
        (Cell::Number(_), _) => Ordering::Less,
        (_, Cell::Number(_)) => Ordering::Greater,
        (Cell::Text(_), Cell::Null) => Ordering::Less,
        (Cell::Null, Cell::Text(_)) => Ordering::Greater,
        (Cell::Null, Cell::Null) => Ordering::Equal,
    }
}

/// Stable ascending sort by `col`; nulls last.
pub fn sort_ascending(table: &Table, col: &str) -> Result<Table> {
    let cells = table.cells(col)?;
    let mut order: Vec<usize> = (0..table.height()).collect();
    order.sort_by(|&a, &b| compare_cells(&cells[a], &cells[b]));
    Ok(table.take_rows(&order))
}

/// Sorted distinct non-null values of `col`.
pub fn distinct_values(table: &Table, col: &str) -> Result<Vec<Cell>> {
    let cells = table.cells(col)?;
    let mut seen = HashSet::new();
    let mut values: Vec<Cell> = cells
        .iter()
        .filter(|c| c.key().is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect();
    values.sort_by(compare_cells);
    Ok(values)
}

/// One row per entry of `ordered_keys`, in that order. Keys missing from the
/// input get a row whose other columns are null; input rows whose key is not
/// listed are dropped.
pub fn reindex_by_fixed_order(grouped: &Table, key_col: &str, ordered_keys: &[Cell]) -> Result<Table> {
    let key_idx = grouped.column_index(key_col)?;
    let mut row_of: HashMap<CellKey, usize> = HashMap::new();
    for (row, cell) in grouped.columns[key_idx].cells.iter().enumerate() {
        if let Some(k) = cell.key() {
            row_of.entry(k).or_insert(row);
        }
    }

    let rows: Vec<Option<usize>> = ordered_keys
        .iter()
        .map(|k| k.key().and_then(|k| row_of.get(&k).copied()))
        .collect();

    let columns = grouped
        .columns
        .iter()
        .enumerate()
        .map(|(c, col)| {
            let cells = rows
                .iter()
                .zip(ordered_keys)
                .map(|(row, key)| match row {
                    Some(r) => col.cells[*r].clone(),
                    None if c == key_idx => key.clone(),
                    None => Cell::Null,
                })
                .collect();
            Column::new(col.name.clone(), cells)
        })
        .collect();

    Ok(Table::from_columns(columns))
}

/// Stable sort by the position of `col`'s value in `ordered_keys`. Rows whose
/// value is not listed are dropped.
pub fn sort_by_fixed_order(table: &Table, col: &str, ordered_keys: &[Cell]) -> Result<Table> {
    let cells = table.cells(col)?;
    let rank: HashMap<CellKey, usize> = ordered_keys
        .iter()
        .enumerate()
        .filter_map(|(i, k)| k.key().map(|k| (k, i)))
        .collect();

    let mut ranked: Vec<(usize, usize)> = cells
        .iter()
        .enumerate()
        .filter_map(|(row, cell)| cell.key().and_then(|k| rank.get(&k)).map(|&r| (r, row)))
        .collect();
    ranked.sort_by_key(|&(r, _)| r);
    let order: Vec<usize> = ranked.into_iter().map(|(_, row)| row).collect();
    Ok(table.take_rows(&order))
}

// =============================================================================
// Scaling
// =============================================================================

/// Linearly rescale `col` so that its maximum becomes `target_max`, writing
/// the result to `into` (which may be `col` itself). Zero stays zero and nulls
/// stay null. When the maximum is zero, negative or missing (an all-null
/// column) every cell maps to zero.
pub fn normalize_scale(table: &Table, col: &str, target_max: f64, into: &str) -> Result<Table> {
    let cells = table.cells(col)?;
    let max = cells
        .iter()
        .filter_map(Cell::as_f64)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

    let scaled = cells
        .iter()
        .map(|cell| match (cell.as_f64(), max) {
            (Some(v), Some(m)) if m > 0.0 => Cell::number(v / m * target_max),
            (None, Some(m)) if m > 0.0 => Cell::Null,
            _ => Cell::Number(0.0),
        })
        .collect();

    table.clone().with_column(Column::new(into, scaled))
}

// =============================================================================
// Hierarchies
// =============================================================================

/// A node of a treemap/sunburst hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    /// Slash-joined path labels, e.g. `"X/A"`. A `/` or `\` inside a label
    /// is prefixed with `\`, so `"A/B"` then `"C"` gives `A\/B/C`.
    pub id: String,
    pub parent: Option<String>,
    pub label: Cell,
    pub depth: usize,
    pub value: f64,
    /// Path values down to this node.
    pub path: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyTable {
    pub levels: Vec<String>,
    pub value_column: String,
    /// Ordered by depth, then first occurrence.
    pub nodes: Vec<HierarchyNode>,
}

impl HierarchyTable {
    pub fn leaves(&self) -> impl Iterator<Item = &HierarchyNode> {
        let leaf_depth = self.levels.len().saturating_sub(1);
        self.nodes.iter().filter(move |n| n.depth == leaf_depth)
    }

    /// Flatten into a table with one column per level (null below the node's
    /// depth) plus `id`, `parent` and the value column.
    pub fn to_table(&self) -> Table {
        let mut columns: Vec<Column> = self
            .levels
            .iter()
            .enumerate()
            .map(|(level, name)| {
                Column::new(
                    name.clone(),
                    self.nodes
                        .iter()
                        .map(|n| n.path.get(level).cloned().unwrap_or(Cell::Null))
                        .collect(),
                )
            })
            .collect();
        columns.push(Column::new("id", self.nodes.iter().map(|n| Cell::text(n.id.clone())).collect()));
        columns.push(Column::new(
            "parent",
            self.nodes.iter().map(|n| Cell::from(n.parent.as_deref())).collect(),
        ));
        columns.push(Column::new(
            self.value_column.clone(),
            self.nodes.iter().map(|n| Cell::number(n.value)).collect(),
        ));
        Table::from_columns(columns)
    }
}

/// Sum `value_col` over every prefix of `path_cols`. Rows with a null at any
/// level are dropped; null values contribute zero.
pub fn hierarchical_rollup(table: &Table, path_cols: &[&str], value_col: &str) -> Result<HierarchyTable> {
    if path_cols.is_empty() {
        return Err(DashboardError::Encoding("hierarchy path needs at least one level".into()));
    }
    let path_idx: Vec<usize> = path_cols.iter().map(|c| table.column_index(c)).collect::<Result<_>>()?;
    let values = table.cells(value_col)?;

    let mut index: Vec<HashMap<Vec<CellKey>, usize>> = vec![HashMap::new(); path_idx.len()];
    let mut levels: Vec<Vec<HierarchyNode>> = vec![Vec::new(); path_idx.len()];

    for row in 0..table.height() {
        let path: Vec<&Cell> = path_idx.iter().map(|&c| &table.columns[c].cells[row]).collect();
        let keys: Option<Vec<CellKey>> = path.iter().map(|c| c.key()).collect();
        let Some(keys) = keys else { continue };
        let value = values[row].as_f64().unwrap_or(0.0);

        for depth in 0..path.len() {
            let prefix = keys[..=depth].to_vec();
            let slot = match index[depth].get(&prefix) {
                Some(&slot) => slot,
                None => {
                    let labels: Vec<String> = path[..=depth].iter().map(|c| escape_label(&c.to_string())).collect();
                    levels[depth].push(HierarchyNode {
                        id: labels.join("/"),
                        parent: (depth > 0).then(|| labels[..depth].join("/")),
                        label: path[depth].clone(),
                        depth,
                        value: 0.0,
                        path: path[..=depth].iter().map(|c| (*c).clone()).collect(),
                    });
                    index[depth].insert(prefix, levels[depth].len() - 1);
                    levels[depth].len() - 1
                }
            };
            levels[depth][slot].value += value;
        }
    }

    Ok(HierarchyTable {
        levels: table_names(table, &path_idx),
        value_column: table.columns[table.column_index(value_col)?].name.clone(),
        nodes: levels.into_iter().flatten().collect(),
    })
}

/// Prefix `\` and `/` with `\`.
fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c == '\\' || c == '/' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn table_names(table: &Table, idx: &[usize]) -> Vec<String> {
    idx.iter().map(|&c| table.columns[c].name.clone()).collect()
}

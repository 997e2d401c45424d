//! Tabular primitives shared by the sink and every source

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One lookup-table row keyed by header name.
pub type Record = BTreeMap<String, String>;

/// A single spreadsheet cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// JSON value written to the store. `Empty` becomes the empty string so a
    /// missing value never shifts the cells after it.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Int(v) => Value::from(*v),
            Cell::Number(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(String::new())),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Empty => Value::String(String::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Number(v) => write!(f, "{v}"),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Empty => Ok(()),
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<Option<i64>> for Cell {
    fn from(v: Option<i64>) -> Self {
        v.map(Cell::Int).unwrap_or(Cell::Empty)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

/// Header row plus data rows; the unit the sink replaces wholesale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<S: Into<String>>(header: impl IntoIterator<Item = S>) -> Self {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Width of the widest row, header included.
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0)
    }

    /// Rectangular grid (header first) with short rows padded by empty cells.
    pub fn to_grid(&self) -> Vec<Vec<Value>> {
        let width = self.width();
        let mut grid = Vec::with_capacity(self.rows.len() + 1);

        let mut header: Vec<Value> = self.header.iter().map(|h| Value::String(h.clone())).collect();
        header.resize(width, Value::String(String::new()));
        grid.push(header);

        for row in &self.rows {
            let mut out: Vec<Value> = row.iter().map(Cell::to_json).collect();
            out.resize(width, Value::String(String::new()));
            grid.push(out);
        }
        grid
    }

    /// Same grid as `to_grid`, rendered as display strings.
    pub fn to_string_grid(&self) -> Vec<Vec<String>> {
        let width = self.width();
        let mut grid = Vec::with_capacity(self.rows.len() + 1);

        let mut header = self.header.clone();
        header.resize(width, String::new());
        grid.push(header);

        for row in &self.rows {
            let mut out: Vec<String> = row.iter().map(ToString::to_string).collect();
            out.resize(width, String::new());
            grid.push(out);
        }
        grid
    }
}

/// Converts raw rows (header first) into header-keyed records.
///
/// Short rows are padded with empty strings; rows with no non-blank cell are
/// dropped.
pub fn rows_to_records(rows: &[Vec<String>]) -> Vec<Record> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };

    body.iter()
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .map(|row| {
            header
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.trim().is_empty())
                .map(|(i, name)| {
                    let value = row.get(i).cloned().unwrap_or_default();
                    (name.trim().to_string(), value)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_pads_missing_cells() {
        let mut table = Table::new(["Year", "Videos", "Views", "Subscribers"]);
        table.push_row(vec![Cell::Int(2020), Cell::Int(1), Cell::Int(10)]);
        table.push_row(vec![
            Cell::from("Totals"),
            Cell::Int(1),
            Cell::Int(10),
            Cell::Int(99),
        ]);

        let grid = table.to_grid();
        assert_eq!(grid.len(), 3);
        assert!(grid.iter().all(|row| row.len() == 4));
        assert_eq!(grid[1][3], Value::String(String::new()));
        assert_eq!(grid[2][3], Value::from(99));
    }

    #[test]
    fn test_empty_cell_placeholder() {
        assert_eq!(Cell::Empty.to_json(), Value::String(String::new()));
        assert_eq!(Cell::from(None).to_json(), Value::String(String::new()));
        assert_eq!(Cell::Number(f64::NAN).to_json(), Value::String(String::new()));
    }

    #[test]
    fn test_rows_to_records() {
        let rows = vec![
            vec!["Name".to_string(), "Segment".to_string(), "Channel ID".to_string()],
            vec!["A".to_string(), "x".to_string(), "id1".to_string()],
            vec!["".to_string(), " ".to_string()],
            vec!["B".to_string()],
        ];

        let records = rows_to_records(&rows);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Channel ID"], "id1");
        assert_eq!(records[1]["Name"], "B");
        assert_eq!(records[1]["Channel ID"], "");
    }
}

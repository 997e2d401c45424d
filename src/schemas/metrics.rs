//! Year-bucketed metric rows
//!
//! Every source produces a `MetricSheet`: one row per calendar year of a
//! dense `YearRange`, zero-filled, followed by exactly one total row.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use super::table::{Cell, Table};

/// Header of the bucket column in every metric table.
pub const BUCKET_HEADER: &str = "Year";

/// Inclusive range of calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        debug_assert!(start <= end, "year range must not be inverted");
        Self { start, end }
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Year(i32),
    Total,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub bucket: Bucket,
    /// One value per sheet column; `None` renders as an empty cell.
    pub values: Vec<Option<i64>>,
}

/// Sums per-year values for one source run.
#[derive(Debug, Clone)]
pub struct YearlyAccumulator {
    range: YearRange,
    columns: Vec<String>,
    per_year: BTreeMap<i32, Vec<i64>>,
    totals: Vec<i64>,
    items: usize,
}

impl YearlyAccumulator {
    pub fn new(range: YearRange, columns: &[&str]) -> Self {
        Self {
            range,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            per_year: BTreeMap::new(),
            totals: vec![0; columns.len()],
            items: 0,
        }
    }

    pub fn range(&self) -> YearRange {
        self.range
    }

    /// Adds one item's values to its year bucket.
    ///
    /// Items dated before the range start are outside the since boundary and
    /// are ignored. Items after the range end count toward the total only.
    /// Returns whether the item was counted.
    pub fn add(&mut self, year: i32, values: &[i64]) -> bool {
        if year < self.range.start {
            return false;
        }
        debug_assert_eq!(values.len(), self.columns.len());

        if self.range.contains(year) {
            let bucket = self
                .per_year
                .entry(year)
                .or_insert_with(|| vec![0; self.columns.len()]);
            for (slot, v) in bucket.iter_mut().zip(values) {
                *slot += v;
            }
        }
        for (slot, v) in self.totals.iter_mut().zip(values) {
            *slot += v;
        }
        self.items += 1;
        true
    }

    /// Number of items counted so far.
    pub fn items(&self) -> usize {
        self.items
    }

    /// Produces the dense sheet with a summed total row.
    pub fn finish(self, total_label: &str) -> MetricSheet {
        let width = self.columns.len();
        let mut rows: Vec<MetricRow> = self
            .range
            .years()
            .map(|year| {
                let values = self
                    .per_year
                    .get(&year)
                    .cloned()
                    .unwrap_or_else(|| vec![0; width]);
                MetricRow {
                    bucket: Bucket::Year(year),
                    values: values.into_iter().map(Some).collect(),
                }
            })
            .collect();

        rows.push(MetricRow {
            bucket: Bucket::Total,
            values: self.totals.into_iter().map(Some).collect(),
        });

        MetricSheet {
            total_label: total_label.to_string(),
            columns: self.columns,
            rows,
        }
    }
}

/// Dense yearly rows plus one terminal total row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSheet {
    pub total_label: String,
    pub columns: Vec<String>,
    pub rows: Vec<MetricRow>,
}

impl MetricSheet {
    fn column_index(&mut self, column: &str) -> usize {
        if let Some(i) = self.columns.iter().position(|c| c == column) {
            return i;
        }
        self.columns.push(column.to_string());
        for row in &mut self.rows {
            row.values.push(None);
        }
        self.columns.len() - 1
    }

    fn row_mut(&mut self, bucket: Bucket) -> Option<&mut MetricRow> {
        self.rows.iter_mut().find(|r| r.bucket == bucket)
    }

    /// Overrides a total-row value, typically with a live platform counter.
    /// Unknown columns are appended and left empty on the year rows.
    pub fn set_total(&mut self, column: &str, value: i64) {
        let i = self.column_index(column);
        if let Some(row) = self.row_mut(Bucket::Total) {
            row.values[i] = Some(value);
        }
    }

    /// Sets a single year's value. Years outside the range are ignored.
    pub fn set_year(&mut self, year: i32, column: &str, value: i64) {
        let i = self.column_index(column);
        if let Some(row) = self.row_mut(Bucket::Year(year)) {
            row.values[i] = Some(value);
        }
    }

    pub fn value(&self, bucket: Bucket, column: &str) -> Option<i64> {
        let i = self.columns.iter().position(|c| c == column)?;
        self.rows
            .iter()
            .find(|r| r.bucket == bucket)
            .and_then(|r| r.values.get(i).copied().flatten())
    }

    pub fn total(&self) -> Option<&MetricRow> {
        self.rows.last().filter(|r| r.bucket == Bucket::Total)
    }

    pub fn years(&self) -> Vec<i32> {
        self.rows
            .iter()
            .filter_map(|r| match r.bucket {
                Bucket::Year(y) => Some(y),
                Bucket::Total => None,
            })
            .collect()
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(
            std::iter::once(BUCKET_HEADER.to_string()).chain(self.columns.iter().cloned()),
        );
        for row in &self.rows {
            let bucket = match row.bucket {
                Bucket::Year(y) => Cell::Int(y as i64),
                Bucket::Total => Cell::Text(self.total_label.clone()),
            };
            let mut cells = Vec::with_capacity(row.values.len() + 1);
            cells.push(bucket);
            cells.extend(row.values.iter().map(|v| Cell::from(*v)));
            table.push_row(cells);
        }
        table
    }
}

//! Budget ledger transform
//!
//! Reads the manually maintained `Budget Data` table, finds the annual
//! budget row by its marker label and rewrites it as one row per year.
//! Unlike the other sources nothing leaves the store.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{FetchOutcome, SkipLog, Source, SourceMetadata};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::schemas::{Cell, Table, BUCKET_HEADER};
use crate::storage::Sink;

pub const TABLE: &str = "Processed Budget";

/// Parses a ledger amount such as `$1,250,000` or `1250000.50`.
fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn amount_cell(value: f64) -> Cell {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Cell::Int(value as i64)
    } else {
        Cell::Number(value)
    }
}

/// Budget ledger source
pub struct BudgetSource {
    input_table: String,
    marker: String,
    start_year: i32,
    metadata: SourceMetadata,
}

impl BudgetSource {
    /// Creates a new budget source
    pub fn new(config: &Config) -> Self {
        let metadata = SourceMetadata {
            id: "budget".to_string(),
            name: "Budget".to_string(),
            description: "Annual budget series from the ledger table".to_string(),
            table: TABLE.to_string(),
            total_label: "Total".to_string(),
        };

        Self {
            input_table: config.budget_input_table.clone(),
            marker: config.budget_marker.trim().to_string(),
            start_year: config.budget_start_year,
            metadata,
        }
    }

    /// Builds the yearly table from the ledger rows.
    fn transform(&self, rows: &[Vec<String>]) -> Result<FetchOutcome> {
        let row = rows
            .iter()
            .find(|r| r.first().map(|c| c.trim()) == Some(self.marker.as_str()))
            .ok_or_else(|| {
                SyncError::ParseError(format!(
                    "row '{}' not found in '{}'",
                    self.marker, self.input_table
                ))
            })?;

        let mut table = Table::new([BUCKET_HEADER, "Budget"]);
        let mut skipped = SkipLog::new("budget");
        let mut total = 0.0;

        // Contiguous non-empty cells after the label, one per year
        let values = row.iter().skip(1).take_while(|c| !c.trim().is_empty());
        for (offset, raw) in values.enumerate() {
            let year = self.start_year + offset as i32;
            match parse_amount(raw) {
                Some(amount) => {
                    total += amount;
                    table.push_row(vec![Cell::Int(year as i64), amount_cell(amount)]);
                }
                None => {
                    skipped.skip(year.to_string(), format!("unparsable amount '{}'", raw.trim()));
                    table.push_row(vec![Cell::Int(year as i64), Cell::from(raw.trim())]);
                }
            }
        }

        let items = table.len();
        if items == 0 {
            warn!(marker = %self.marker, "Budget row has no values");
        }
        table.push_row(vec![Cell::from(self.metadata.total_label.as_str()), amount_cell(total)]);

        Ok(FetchOutcome::new(table)
            .with_items(items - skipped.len())
            .with_skipped(skipped.into_items()))
    }
}

#[async_trait]
impl Source for BudgetSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, sink: &dyn Sink) -> Result<FetchOutcome> {
        let rows = sink.read_rows(&self.input_table).await?.ok_or_else(|| {
            SyncError::SourceNotConfigured(format!("budget: input table '{}' does not exist", self.input_table))
        })?;

        let outcome = self.transform(&rows)?;
        info!(
            table = %self.input_table,
            years = outcome.table.len() - 1,
            "Budget ledger processed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySink;

    fn ledger(values: &[&str]) -> Vec<Vec<String>> {
        let mut marker_row = vec!["IDE Annual Budget".to_string()];
        marker_row.extend(values.iter().map(|v| v.to_string()));
        vec![
            vec!["Category".into(), "FY20".into(), "FY21".into(), "FY22".into(), "FY23".into()],
            vec!["Sponsored research".into(), "1".into(), "2".into()],
            marker_row,
        ]
    }

    fn source() -> BudgetSource {
        BudgetSource::new(&Config::from_overrides(&[]).unwrap())
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_amount(" 12.5 "), Some(12.5));
        assert_eq!(parse_amount("TBD"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[tokio::test]
    async fn test_contiguous_years_from_start() {
        let sink = MemorySink::new();
        sink.insert_rows("Budget Data", ledger(&["$1,000", "2,500", "", "9,999"]));

        let outcome = source().fetch(&sink).await.unwrap();
        let t = &outcome.table;

        assert_eq!(t.header, vec!["Year", "Budget"]);
        assert_eq!(
            t.rows,
            vec![
                vec![Cell::Int(2020), Cell::Int(1000)],
                vec![Cell::Int(2021), Cell::Int(2500)],
                vec![Cell::from("Total"), Cell::Int(3500)],
            ]
        );
        assert_eq!(outcome.items, 2);
        assert!(outcome.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_amount_kept_as_text() {
        let sink = MemorySink::new();
        sink.insert_rows("Budget Data", ledger(&["100", "pending", "50.5"]));

        let outcome = source().fetch(&sink).await.unwrap();
        let t = &outcome.table;

        assert_eq!(t.rows[1], vec![Cell::Int(2021), Cell::from("pending")]);
        assert_eq!(t.rows[2], vec![Cell::Int(2022), Cell::Number(50.5)]);
        assert_eq!(t.rows[3], vec![Cell::from("Total"), Cell::Number(150.5)]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.items, 2);
    }

    #[tokio::test]
    async fn test_missing_marker_or_table_fails() {
        let sink = MemorySink::new();
        let err = source().fetch(&sink).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceNotConfigured(_)));

        sink.insert_rows("Budget Data", vec![vec!["Category".to_string()]]);
        let err = source().fetch(&sink).await.unwrap_err();
        assert!(matches!(err, SyncError::ParseError(_)));
    }
}

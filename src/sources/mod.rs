//! Metric sources
//!
//! Each source implements the `Source` trait: it resolves the identities it
//! needs, pulls every item since its start year, and normalizes them into a
//! year-bucketed table that the coordinator hands to the sink.

pub mod budget;
pub mod eventbrite;
pub mod linkedin;
pub mod medium;
pub mod scholar;
pub mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::schemas::Table;
use crate::storage::Sink;

/// Metadata about a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Unique identifier, as used in `ENABLED_SOURCES`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Description
    pub description: String,
    /// Table the normalized metrics replace
    pub table: String,
    /// Label of the terminal aggregate row
    pub total_label: String,
}

/// A remote item that could not be normalized
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedItem {
    pub item: String,
    pub reason: String,
}

/// Result of one source fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Primary metrics table
    pub table: Table,
    /// Auxiliary tables written alongside the primary one
    pub extra_tables: Vec<(String, Table)>,
    /// Remote items counted into the metrics
    pub items: usize,
    /// Items dropped during normalization
    pub skipped: Vec<SkippedItem>,
}

impl FetchOutcome {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            extra_tables: Vec::new(),
            items: 0,
            skipped: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: usize) -> Self {
        self.items = items;
        self
    }

    pub fn with_extra(mut self, name: &str, table: Table) -> Self {
        self.extra_tables.push((name.to_string(), table));
        self
    }

    pub fn with_skipped(mut self, skipped: Vec<SkippedItem>) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Collects skipped items and logs each one as it is recorded.
#[derive(Debug, Default)]
pub struct SkipLog {
    source: String,
    items: Vec<SkippedItem>,
}

impl SkipLog {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            items: Vec::new(),
        }
    }

    pub fn skip(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        let item = SkippedItem {
            item: item.into(),
            reason: reason.into(),
        };
        warn!(source = %self.source, item = %item.item, reason = %item.reason, "Skipping item");
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<SkippedItem> {
        self.items
    }
}

/// Trait for all metric sources
#[async_trait]
pub trait Source: Send + Sync {
    /// Gets metadata about this source
    fn metadata(&self) -> &SourceMetadata;

    /// Resolves identities and fetches the normalized tables. Nothing is
    /// written to the primary table here, though a missing lookup table
    /// may be seeded.
    async fn fetch(&self, sink: &dyn Sink) -> Result<FetchOutcome>;

    /// Replaces the source's tables with the fetched ones. Returns the
    /// number of data rows written.
    async fn save(&self, sink: &dyn Sink, outcome: &FetchOutcome) -> Result<usize> {
        let mut rows = 0;
        for (name, table) in &outcome.extra_tables {
            sink.write_table(name, table).await?;
            rows += table.len();
        }
        sink.write_table(&self.metadata().table, &outcome.table).await?;
        Ok(rows + outcome.table.len())
    }

    /// Gets the source ID
    fn id(&self) -> &str {
        &self.metadata().id
    }

    /// Gets the source name
    fn name(&self) -> &str {
        &self.metadata().name
    }
}

/// Calendar year of a platform timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, or a bare date.
pub fn year_of(timestamp: &str) -> Option<i32> {
    let ts = timestamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.year());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.year());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.year());
    }
    NaiveDate::parse_from_str(ts.get(..10)?, "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

/// Reads an integer that some APIs send as a JSON string.
pub fn lenient_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Re-export source types
pub use budget::BudgetSource;
pub use eventbrite::EventbriteSource;
pub use linkedin::LinkedInSource;
pub use medium::MediumSource;
pub use scholar::ScholarSource;
pub use youtube::YouTubeSource;

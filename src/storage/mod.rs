//! Tabular store shared by every source
//!
//! The store holds named tables that are only ever replaced wholesale. A
//! Google Sheets spreadsheet backs it in production; `MemorySink` backs it
//! in tests.

pub mod auth;
pub mod memory;
pub mod sheets;

use async_trait::async_trait;

use crate::error::Result;
use crate::schemas::{rows_to_records, Record, Table};

pub use auth::{ServiceAccountAuth, ServiceAccountKey, StaticToken, TokenProvider};
pub use memory::MemorySink;
pub use sheets::GoogleSheetsSink;

/// Persistence target for normalized tables
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Replaces the named table's entire contents with `table`, creating the
    /// table if it does not exist. Missing cells are written as empty strings.
    async fn write_table(&self, name: &str, table: &Table) -> Result<()>;

    /// Reads every row of the named table, header first, as display strings.
    /// Returns `None` when the table does not exist.
    async fn read_rows(&self, name: &str) -> Result<Option<Vec<Vec<String>>>>;

    /// Reads the named table as header-keyed records.
    async fn read_records(&self, name: &str) -> Result<Option<Vec<Record>>> {
        Ok(self.read_rows(name).await?.map(|rows| rows_to_records(&rows)))
    }
}

//! In-process sink

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::Sink;
use crate::error::Result;
use crate::schemas::Table;

/// Sink holding tables in memory as string grids.
#[derive(Default)]
pub struct MemorySink {
    tables: RwLock<BTreeMap<String, Vec<Vec<String>>>>,
    writes: RwLock<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates a table with raw rows (header first).
    pub fn insert_rows(&self, name: &str, rows: Vec<Vec<String>>) {
        self.tables.write().insert(name.to_string(), rows);
    }

    /// Snapshot of one table's rows.
    pub fn table(&self, name: &str) -> Option<Vec<Vec<String>>> {
        self.tables.read().get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Names of tables written so far, in write order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.read().clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn write_table(&self, name: &str, table: &Table) -> Result<()> {
        self.tables
            .write()
            .insert(name.to_string(), table.to_string_grid());
        self.writes.write().push(name.to_string());
        Ok(())
    }

    async fn read_rows(&self, name: &str) -> Result<Option<Vec<Vec<String>>>> {
        Ok(self.table(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Cell;

    #[tokio::test]
    async fn test_write_replaces_whole_table() {
        let sink = MemorySink::new();

        let mut first = Table::new(["Year", "Budget"]);
        first.push_row(vec![Cell::Int(2020), Cell::Int(1)]);
        first.push_row(vec![Cell::Int(2021), Cell::Int(2)]);
        sink.write_table("Processed Budget", &first).await.unwrap();

        let mut second = Table::new(["Year", "Budget"]);
        second.push_row(vec![Cell::Int(2022), Cell::Empty]);
        sink.write_table("Processed Budget", &second).await.unwrap();

        let rows = sink.read_rows("Processed Budget").await.unwrap().unwrap();
        assert_eq!(rows, vec![vec!["Year", "Budget"], vec!["2022", ""]]);
        assert_eq!(sink.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_table_reads_as_none() {
        let sink = MemorySink::new();
        assert!(sink.read_rows("Nope").await.unwrap().is_none());
        assert!(sink.read_records("Nope").await.unwrap().is_none());
    }
}

//! Identity resolution
//!
//! Maps human-curated lookup tables (name, segment, platform id) to the
//! platform ids a source should fetch, keeping only ids the platform
//! confirms.

use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

use crate::error::Result;
use crate::schemas::{Cell, IdentityRecord, Record, Table};
use crate::storage::Sink;

/// Column holding the display name in every lookup table
pub const NAME_COLUMN: &str = "Name";
/// Column holding the organizational segment
pub const SEGMENT_COLUMN: &str = "Segment";

/// Live check that a platform id names a real resource
#[async_trait]
pub trait IdValidator: Send + Sync {
    /// `Ok(true)` only on a positive lookup.
    async fn validate(&self, id: &str) -> Result<bool>;
}

/// Where a source's identities live in the store
#[derive(Debug, Clone)]
pub struct LookupTable {
    pub name: String,
    pub id_column: String,
    /// Turns the raw cell into an id, e.g. a profile URL into its user id
    pub id_extractor: Option<fn(&str) -> Option<String>>,
    /// Header and rows written when the table does not exist yet
    pub seed: Option<Table>,
}

impl LookupTable {
    pub fn new(name: &str, id_column: &str) -> Self {
        Self {
            name: name.to_string(),
            id_column: id_column.to_string(),
            id_extractor: None,
            seed: None,
        }
    }

    pub fn with_extractor(mut self, extractor: fn(&str) -> Option<String>) -> Self {
        self.id_extractor = Some(extractor);
        self
    }

    pub fn with_seed(mut self, seed: Table) -> Self {
        self.seed = Some(seed);
        self
    }

    fn id_of(&self, record: &Record) -> Option<String> {
        let raw = record.get(&self.id_column)?.trim();
        if raw.is_empty() {
            return None;
        }
        match self.id_extractor {
            Some(extract) => extract(raw),
            None => Some(raw.to_string()),
        }
    }
}

/// Builds a one-row seed table: `Name`, `Segment`, the id column, then any
/// extra (empty) columns.
pub fn seed_table(id_column: &str, extra_columns: &[&str], name: &str, segment: &str, id: &str) -> Table {
    let mut header = vec![NAME_COLUMN, SEGMENT_COLUMN, id_column];
    header.extend_from_slice(extra_columns);
    let mut table = Table::new(header);
    let mut row = vec![Cell::from(name), Cell::from(segment), Cell::from(id)];
    row.extend(extra_columns.iter().map(|_| Cell::Empty));
    table.push_row(row);
    table
}

/// Extracts the `user` query parameter from a Scholar profile URL.
pub fn scholar_user_id(profile_url: &str) -> Option<String> {
    let url = Url::parse(profile_url.trim()).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.trim().to_string())
        .filter(|id| !id.is_empty())
}

pub struct IdentityResolver;

impl IdentityResolver {
    /// Reads `lookup` from the sink and returns the validated records in
    /// table order. Rows with a blank id are ignored; ids the validator
    /// rejects or fails on are dropped with a warning. Sink errors
    /// propagate.
    pub async fn resolve(
        sink: &dyn Sink,
        lookup: &LookupTable,
        validator: &dyn IdValidator,
    ) -> Result<Vec<IdentityRecord>> {
        let records = match sink.read_records(&lookup.name).await? {
            Some(records) => records,
            None => match &lookup.seed {
                Some(seed) => {
                    info!(table = %lookup.name, "Lookup table missing, creating it from seed");
                    sink.write_table(&lookup.name, seed).await?;
                    sink.read_records(&lookup.name).await?.unwrap_or_default()
                }
                None => {
                    warn!(table = %lookup.name, "Lookup table missing, no identities to fetch");
                    return Ok(Vec::new());
                }
            },
        };

        let mut resolved = Vec::new();
        for record in &records {
            let name = record.get(NAME_COLUMN).map(|s| s.trim()).unwrap_or_default();
            let Some(id) = lookup.id_of(record) else {
                continue;
            };

            match validator.validate(&id).await {
                Ok(true) => {
                    info!(table = %lookup.name, name = %name, id = %id, "Identity validated");
                    let segment = record.get(SEGMENT_COLUMN).map(|s| s.trim()).unwrap_or_default();
                    resolved.push(IdentityRecord::new(name, segment, &id));
                }
                Ok(false) => {
                    warn!(table = %lookup.name, name = %name, id = %id, "Skipping invalid id");
                }
                Err(e) => {
                    warn!(table = %lookup.name, name = %name, id = %id, error = %e, "Skipping id that failed validation");
                }
            }
        }

        info!(
            table = %lookup.name,
            rows = records.len(),
            resolved = resolved.len(),
            "Identities resolved"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::storage::MemorySink;
    use parking_lot::Mutex;

    /// Accepts a fixed set of ids, errors on ids starting with "err"
    struct FixedValidator {
        valid: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl FixedValidator {
        fn new(valid: Vec<&'static str>) -> Self {
            Self {
                valid,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IdValidator for FixedValidator {
        async fn validate(&self, id: &str) -> Result<bool> {
            self.seen.lock().push(id.to_string());
            if id.starts_with("err") {
                return Err(SyncError::ApiError {
                    code: "404".to_string(),
                    message: "not found".to_string(),
                });
            }
            Ok(self.valid.contains(&id))
        }
    }

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_invalid_id_is_dropped() {
        let sink = MemorySink::new();
        sink.insert_rows(
            "YouTube",
            rows(&[
                &["Name", "Segment", "Channel ID"],
                &["A", "x", "id1"],
                &["B", "y", "bad-id"],
            ]),
        );

        let lookup = LookupTable::new("YouTube", "Channel ID");
        let validator = FixedValidator::new(vec!["id1"]);
        let resolved = IdentityResolver::resolve(&sink, &lookup, &validator).await.unwrap();

        assert_eq!(resolved, vec![IdentityRecord::new("A", "x", "id1")]);
    }

    #[tokio::test]
    async fn test_order_kept_blank_ids_skipped_errors_dropped() {
        let sink = MemorySink::new();
        sink.insert_rows(
            "LinkedIn",
            rows(&[
                &["Name", "Segment", "Company ID"],
                &["C", "s1", "c3"],
                &["Blank", "s1", "  "],
                &["E", "s2", "err-1"],
                &["A", "s2", "c1"],
                &["A2", "s3", "c1"],
            ]),
        );

        let lookup = LookupTable::new("LinkedIn", "Company ID");
        let validator = FixedValidator::new(vec!["c1", "c3"]);
        let resolved = IdentityResolver::resolve(&sink, &lookup, &validator).await.unwrap();

        let names: Vec<_> = resolved.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["C", "A", "A2"]);
        assert_eq!(*validator.seen.lock(), vec!["c3", "err-1", "c1", "c1"]);
    }

    #[tokio::test]
    async fn test_missing_table_without_seed_is_empty() {
        let sink = MemorySink::new();
        let lookup = LookupTable::new("Scholars", "Google Scholar");
        let validator = FixedValidator::new(vec![]);

        let resolved = IdentityResolver::resolve(&sink, &lookup, &validator).await.unwrap();
        assert!(resolved.is_empty());
        assert!(sink.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_seeded() {
        let sink = MemorySink::new();
        let lookup = LookupTable::new("YouTube", "Channel ID")
            .with_seed(seed_table("Channel ID", &["Notes"], "Main", "Main", "UC1"));
        let validator = FixedValidator::new(vec!["UC1"]);

        let resolved = IdentityResolver::resolve(&sink, &lookup, &validator).await.unwrap();
        assert_eq!(resolved, vec![IdentityRecord::new("Main", "Main", "UC1")]);
        assert_eq!(
            sink.table("YouTube").unwrap()[0],
            vec!["Name", "Segment", "Channel ID", "Notes"]
        );
    }

    #[tokio::test]
    async fn test_extractor_pulls_scholar_user() {
        let sink = MemorySink::new();
        sink.insert_rows(
            "Scholars",
            rows(&[
                &["Name", "Segment", "Google Scholar"],
                &["R", "Faculty", "https://scholar.google.com/citations?user=abcDEF123&hl=en"],
                &["No Id", "Faculty", "https://scholar.google.com/citations?hl=en"],
            ]),
        );

        let lookup = LookupTable::new("Scholars", "Google Scholar").with_extractor(scholar_user_id);
        let validator = FixedValidator::new(vec!["abcDEF123"]);
        let resolved = IdentityResolver::resolve(&sink, &lookup, &validator).await.unwrap();

        assert_eq!(resolved, vec![IdentityRecord::new("R", "Faculty", "abcDEF123")]);
    }

    #[test]
    fn test_scholar_user_id() {
        assert_eq!(
            scholar_user_id("https://scholar.google.com/citations?hl=en&user=XyZ"),
            Some("XyZ".to_string())
        );
        assert_eq!(scholar_user_id("not a url"), None);
        assert_eq!(scholar_user_id("https://scholar.google.com/citations?user="), None);
    }
}

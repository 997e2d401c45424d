//! LinkedIn Data Source
//!
//! Follower counts for the organizations in the `LinkedIn` lookup table.
//! The API only exposes a current snapshot, so history is not reconstructed:
//! the snapshot lands in the current year's bucket and on the total row.

use async_trait::async_trait;
use chrono::{Datelike, Local};
use reqwest::header::HeaderName;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::{lenient_i64, FetchOutcome, Source, SourceMetadata};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::identity::{seed_table, IdValidator, IdentityResolver, LookupTable};
use crate::schemas::{YearRange, YearlyAccumulator};
use crate::storage::Sink;

pub const TABLE: &str = "LinkedIn Yearly Stats";
pub const LOOKUP_TABLE: &str = "LinkedIn";
const ID_COLUMN: &str = "Company ID";
const RESTLI_VERSION: &str = "2.0.0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Organization {
    #[serde(default)]
    localized_name: Option<String>,
}

/// LinkedIn data source
pub struct LinkedInSource {
    client: SourceHttpClient,
    base_url: String,
    range: YearRange,
    lookup: LookupTable,
    metadata: SourceMetadata,
}

impl LinkedInSource {
    /// Creates a new LinkedIn source
    pub fn new(http_client: Arc<ResilientHttpClient>, config: &Config) -> Result<Self> {
        let token = config.linkedin_access_token.as_deref().ok_or_else(|| {
            SyncError::SourceNotConfigured("linkedin: LINKEDIN_ACCESS_TOKEN".to_string())
        })?;

        let client = SourceHttpClient::new(http_client, "linkedin")
            .with_bearer(token)?
            .with_header(HeaderName::from_static("x-restli-protocol-version"), RESTLI_VERSION)?;

        let mut lookup = LookupTable::new(LOOKUP_TABLE, ID_COLUMN);
        if let Some(company_id) = config.linkedin_company_id.as_deref().filter(|id| !id.trim().is_empty()) {
            lookup = lookup.with_seed(seed_table(
                ID_COLUMN,
                &["Company URL", "Notes"],
                "Main",
                "Main",
                company_id.trim(),
            ));
        }

        let metadata = SourceMetadata {
            id: "linkedin".to_string(),
            name: "LinkedIn".to_string(),
            description: "Organization follower snapshot".to_string(),
            table: TABLE.to_string(),
            total_label: "Totals".to_string(),
        };

        Ok(Self {
            client,
            base_url: config.linkedin_api_url.trim_end_matches('/').to_string(),
            range: config.year_range(config.start_year),
            lookup,
            metadata,
        })
    }

    async fn follower_count(&self, company_id: &str) -> Result<i64> {
        let url = format!("{}/organizations/{}/followerStatistics", self.base_url, company_id);
        let body: Value = self.client.get_json(&url, &[] as &[(&str, &str)]).await?;
        ["followerCount", "firstDegreeSize"]
            .iter()
            .find_map(|key| body.get(*key).and_then(lenient_i64))
            .ok_or_else(|| {
                SyncError::SchemaError(format!("no follower count for organization {company_id}"))
            })
    }
}

#[async_trait]
impl IdValidator for LinkedInSource {
    async fn validate(&self, id: &str) -> Result<bool> {
        let url = format!("{}/organizations/{}", self.base_url, id);
        let response = self.client.get(&url).await?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let org: Organization = response.json().await?;
        info!(
            company_id = %id,
            company = %org.localized_name.as_deref().unwrap_or("Unknown"),
            "Validated company id"
        );
        Ok(true)
    }
}

#[async_trait]
impl Source for LinkedInSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, sink: &dyn Sink) -> Result<FetchOutcome> {
        let companies = IdentityResolver::resolve(sink, &self.lookup, self).await?;
        if companies.is_empty() {
            warn!(source = "linkedin", "No valid companies to fetch");
        }

        let mut followers = 0;
        for company in &companies {
            let count = self.follower_count(&company.id).await?;
            info!(company = %company.name, followers = count, "Fetched follower count");
            followers += count;
        }

        let mut sheet = YearlyAccumulator::new(self.range, &["Followers", "Posts", "Engagement"])
            .finish(&self.metadata.total_label);
        sheet.set_year(Local::now().year(), "Followers", followers);
        sheet.set_total("Followers", followers);

        Ok(FetchOutcome::new(sheet.to_table()).with_items(companies.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Cell;
    use crate::storage::MemorySink;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer, extra: &[(&str, &str)]) -> LinkedInSource {
        let uri = server.uri();
        let mut pairs = vec![
            ("linkedin_access_token", "li-token"),
            ("linkedin_api_url", uri.as_str()),
            ("start_year", "2020"),
        ];
        pairs.extend_from_slice(extra);
        let config = Config::from_overrides(&pairs).unwrap();
        LinkedInSource::new(Arc::new(ResilientHttpClient::with_defaults().unwrap()), &config).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_in_current_year_and_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/organizations/123"))
            .and(header("x-restli-protocol-version", "2.0.0"))
            .and(header("authorization", "Bearer li-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "localizedName": "MIT IDE" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/organizations/123/followerStatistics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "followerCount": 4200 })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/organizations/999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let sink = MemorySink::new();
        sink.insert_rows(
            LOOKUP_TABLE,
            vec![
                vec!["Name".into(), "Segment".into(), "Company ID".into()],
                vec!["IDE".into(), "Main".into(), "123".into()],
                vec!["Other".into(), "Lab".into(), "999".into()],
            ],
        );

        let outcome = source(&server, &[]).fetch(&sink).await.unwrap();
        let rows = &outcome.table.rows;
        let current = rows.len() - 2;

        assert_eq!(outcome.items, 1);
        assert_eq!(rows[0], vec![Cell::Int(2020), Cell::Int(0), Cell::Int(0), Cell::Int(0)]);
        assert_eq!(rows[current][0], Cell::Int(Local::now().year() as i64));
        assert_eq!(rows[current][1], Cell::Int(4200));
        assert_eq!(
            rows[current + 1],
            vec![Cell::from("Totals"), Cell::Int(4200), Cell::Int(0), Cell::Int(0)]
        );
    }

    #[tokio::test]
    async fn test_lookup_seeded_from_company_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/organizations/555"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/organizations/555/followerStatistics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "firstDegreeSize": "12" })))
            .mount(&server)
            .await;

        let sink = MemorySink::new();
        let outcome = source(&server, &[("linkedin_company_id", "555")])
            .fetch(&sink)
            .await
            .unwrap();

        assert_eq!(
            sink.table(LOOKUP_TABLE).unwrap()[0],
            vec!["Name", "Segment", "Company ID", "Company URL", "Notes"]
        );
        assert_eq!(outcome.table.rows.last().unwrap()[1], Cell::Int(12));
    }

    #[tokio::test]
    async fn test_missing_follower_count_fails_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/organizations/555"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/organizations/555/followerStatistics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "elements": [] })))
            .mount(&server)
            .await;

        let sink = MemorySink::new();
        let err = source(&server, &[("linkedin_company_id", "555")])
            .fetch(&sink)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SchemaError(_)));
    }
}

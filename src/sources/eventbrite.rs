//! Eventbrite Data Source
//!
//! Events and tickets sold per year for the organization that owns the
//! private token.
//! https://www.eventbrite.com/platform/api

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{lenient_i64, year_of, FetchOutcome, SkipLog, Source, SourceMetadata};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::schemas::{Cell, Table, YearRange, YearlyAccumulator};
use crate::storage::Sink;

pub const TABLE: &str = "Eventbrite Yearly Stats";
pub const DETAIL_TABLE: &str = "Eventbrite Data";

#[derive(Debug, Deserialize)]
struct OrganizationList {
    #[serde(default)]
    organizations: Vec<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    events: Vec<Value>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    has_more_items: bool,
    #[serde(default)]
    continuation: Option<String>,
}

/// One event as written to the detail table
#[derive(Debug, Clone, PartialEq)]
struct EventRecord {
    name: String,
    date: String,
    year: i32,
    attendees: i64,
    venue: String,
    status: String,
}

impl EventRecord {
    fn from_json(event: &Value) -> std::result::Result<Self, String> {
        let start = event
            .pointer("/start/utc")
            .and_then(Value::as_str)
            .ok_or("missing start.utc")?;
        let year = year_of(start).ok_or_else(|| format!("unparsable start date '{start}'"))?;
        let date = DateTime::parse_from_rfc3339(start)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| start.to_string());

        // Tickets sold on the first ticket class stand in for attendance
        let attendees = event
            .pointer("/ticket_classes/0/quantity_sold")
            .and_then(lenient_i64)
            .unwrap_or(0);

        let text = |ptr: &str| {
            event
                .pointer(ptr)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            name: text("/name/text"),
            date,
            year,
            attendees,
            venue: text("/venue/name"),
            status: text("/status"),
        })
    }
}

/// Eventbrite data source
pub struct EventbriteSource {
    client: SourceHttpClient,
    base_url: String,
    range: YearRange,
    metadata: SourceMetadata,
}

impl EventbriteSource {
    /// Creates a new Eventbrite source
    pub fn new(http_client: Arc<ResilientHttpClient>, config: &Config) -> Result<Self> {
        let token = config.eventbrite_private_token.as_deref().ok_or_else(|| {
            SyncError::SourceNotConfigured("eventbrite: EVENTBRITE_PRIVATE_TOKEN".to_string())
        })?;

        let metadata = SourceMetadata {
            id: "eventbrite".to_string(),
            name: "Eventbrite".to_string(),
            description: "Organization events and attendance per year".to_string(),
            table: TABLE.to_string(),
            total_label: "Totals".to_string(),
        };

        Ok(Self {
            client: SourceHttpClient::new(http_client, "eventbrite").with_bearer(token)?,
            base_url: config.eventbrite_api_url.trim_end_matches('/').to_string(),
            range: config.year_range(config.start_year),
            metadata,
        })
    }

    /// Organization owning the token
    async fn organization_id(&self) -> Result<String> {
        let url = format!("{}/users/me/organizations/", self.base_url);
        let list: OrganizationList = self.client.get_json(&url, &[] as &[(&str, &str)]).await?;
        let org = list
            .organizations
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::SchemaError("no organizations found for this token".to_string()))?;
        info!(
            organization_id = %org.id,
            organization = %org.name.as_deref().unwrap_or("?"),
            "Resolved Eventbrite organization"
        );
        Ok(org.id)
    }

    async fn events(&self, organization_id: &str) -> Result<Vec<Value>> {
        let url = format!("{}/organizations/{}/events/", self.base_url, organization_id);
        let range_start = format!("{}-01-01T00:00:00Z", self.range.start);
        let mut events = Vec::new();
        let mut page = 1u32;
        let mut continuation: Option<String> = None;

        loop {
            let page_str = page.to_string();
            let mut params = vec![
                ("start_date.range_start", range_start.as_str()),
                ("expand", "venue,ticket_classes"),
            ];
            match &continuation {
                Some(token) => params.push(("continuation", token.as_str())),
                None => params.push(("page", page_str.as_str())),
            }

            let body: EventPage = self.client.get_json(&url, &params).await?;
            debug!(page, events = body.events.len(), "Fetched events page");
            if body.events.is_empty() {
                break;
            }
            events.extend(body.events);

            if !body.pagination.has_more_items {
                break;
            }
            continuation = body.pagination.continuation;
            page += 1;
        }

        Ok(events)
    }
}

#[async_trait]
impl Source for EventbriteSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, _sink: &dyn Sink) -> Result<FetchOutcome> {
        let organization_id = self.organization_id().await?;
        let events = self.events(&organization_id).await?;

        let mut acc = YearlyAccumulator::new(self.range, &["Events", "Attendees"]);
        let mut skipped = SkipLog::new("eventbrite");
        let mut detail = Table::new(["Name", "Date", "Attendees", "Venue", "Status"]);

        for event in &events {
            let id = event.get("id").and_then(Value::as_str).unwrap_or("?");
            match EventRecord::from_json(event) {
                Ok(record) => {
                    if acc.add(record.year, &[1, record.attendees]) {
                        detail.push_row(vec![
                            Cell::from(record.name),
                            Cell::from(record.date),
                            Cell::Int(record.attendees),
                            Cell::from(record.venue),
                            Cell::from(record.status),
                        ]);
                    }
                }
                Err(reason) => skipped.skip(id, reason),
            }
        }

        let items = acc.items();
        let sheet = acc.finish(&self.metadata.total_label);

        Ok(FetchOutcome::new(sheet.to_table())
            .with_extra(DETAIL_TABLE, detail)
            .with_items(items)
            .with_skipped(skipped.into_items()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySink;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> EventbriteSource {
        let uri = server.uri();
        let config = Config::from_overrides(&[
            ("eventbrite_private_token", "eb-token"),
            ("eventbrite_api_url", uri.as_str()),
            ("start_year", "2020"),
            ("end_year", "2022"),
        ])
        .unwrap();
        EventbriteSource::new(Arc::new(ResilientHttpClient::with_defaults().unwrap()), &config).unwrap()
    }

    fn event(id: &str, start: &str, sold: i64) -> Value {
        json!({
            "id": id,
            "name": { "text": format!("Event {id}") },
            "start": { "utc": start },
            "status": "completed",
            "venue": { "name": "E62" },
            "ticket_classes": [{ "quantity_sold": sold }, { "quantity_sold": 999 }]
        })
    }

    #[test]
    fn test_event_record_parsing() {
        let record = EventRecord::from_json(&event("1", "2021-04-01T17:00:00Z", 40)).unwrap();
        assert_eq!(record.year, 2021);
        assert_eq!(record.date, "2021-04-01 17:00:00");
        assert_eq!(record.attendees, 40);
        assert_eq!(record.venue, "E62");

        let bare = EventRecord::from_json(&json!({ "start": { "utc": "2020-01-01T00:00:00Z" } })).unwrap();
        assert_eq!(bare.attendees, 0);
        assert_eq!(bare.venue, "");

        assert!(EventRecord::from_json(&json!({ "name": { "text": "x" } })).is_err());
    }

    #[tokio::test]
    async fn test_paginates_and_buckets_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/organizations/"))
            .and(header("authorization", "Bearer eb-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organizations": [{ "id": "org-1", "name": "IDE" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/organizations/org-1/events/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [event("3", "2022-02-01T00:00:00Z", 5), { "id": "4", "start": {} }],
                "pagination": { "has_more_items": false }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/organizations/org-1/events/"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "events": [event("1", "2020-03-01T00:00:00Z", 10), event("2", "2020-09-01T00:00:00Z", 20)],
                "pagination": { "has_more_items": true }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = MemorySink::new();
        let src = source(&server);
        let outcome = src.fetch(&sink).await.unwrap();

        let t = &outcome.table;
        assert_eq!(t.header, vec!["Year", "Events", "Attendees"]);
        assert_eq!(t.rows[0], vec![Cell::Int(2020), Cell::Int(2), Cell::Int(30)]);
        assert_eq!(t.rows[1], vec![Cell::Int(2021), Cell::Int(0), Cell::Int(0)]);
        assert_eq!(t.rows[2], vec![Cell::Int(2022), Cell::Int(1), Cell::Int(5)]);
        assert_eq!(t.rows[3], vec![Cell::from("Totals"), Cell::Int(3), Cell::Int(35)]);

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].item, "4");

        let (name, detail) = &outcome.extra_tables[0];
        assert_eq!(name, DETAIL_TABLE);
        assert_eq!(detail.len(), 3);

        src.save(&sink, &outcome).await.unwrap();
        assert_eq!(sink.writes(), vec![DETAIL_TABLE, TABLE]);
    }

    #[tokio::test]
    async fn test_token_without_organization_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/organizations/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "organizations": [] })))
            .mount(&server)
            .await;

        let err = source(&server).fetch(&MemorySink::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::SchemaError(_)));
    }
}

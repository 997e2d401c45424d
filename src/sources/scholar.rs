//! Google Scholar Data Source
//!
//! Scrapes the public profile page of every researcher in the `Scholars`
//! lookup table. Selectors follow the profile markup as served with
//! `hl=en`; when the markup changes only this module needs to follow.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{FetchOutcome, SkipLog, Source, SourceMetadata};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::identity::{scholar_user_id, IdValidator, IdentityResolver, LookupTable};
use crate::schemas::{Cell, Table, YearRange, YearlyAccumulator};
use crate::storage::Sink;

pub const TABLE: &str = "Scholar Yearly Stats";
pub const AUTHOR_TABLE: &str = "Scholar Author Stats";
pub const LOOKUP_TABLE: &str = "Scholars";
const ID_COLUMN: &str = "Google Scholar";
const PAGE_SIZE: usize = 100;

/// One row of the publication list
#[derive(Debug, Clone, PartialEq)]
struct Publication {
    title: String,
    year: Option<i32>,
    citations: i64,
}

/// What one profile page yields
#[derive(Debug, Default)]
struct ProfilePage {
    h_index: Option<i64>,
    citations_all: Option<i64>,
    publications: Vec<Publication>,
    /// (title, reason) for rows that could not be read
    malformed: Vec<(String, String)>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| SyncError::ParseError(format!("bad selector '{css}': {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(element: ElementRef<'_>, sel: &Selector) -> Option<String> {
    element
        .select(sel)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn parse_count(text: &str) -> Option<i64> {
    text.replace(',', "").trim().parse().ok()
}

fn parse_profile(html: &str) -> Result<ProfilePage> {
    let document = Html::parse_document(html);
    let stats_row = selector("#gsc_rsb_st tr")?;
    let cell = selector("td")?;
    let entry = selector("tr.gsc_a_tr")?;
    let title = selector("a.gsc_a_at")?;
    let cites = selector("a.gsc_a_ac")?;
    let year_cell = selector("span.gsc_a_h")?;

    let mut page = ProfilePage::default();

    for row in document.select(&stats_row) {
        let cells: Vec<String> = row.select(&cell).map(text_of).collect();
        let (Some(label), Some(all)) = (cells.first(), cells.get(1)) else {
            continue;
        };
        if label.contains("h-index") {
            page.h_index = parse_count(all);
        } else if label.starts_with("Citations") {
            page.citations_all = parse_count(all);
        }
    }

    for row in document.select(&entry) {
        let name = first_text(row, &title).unwrap_or_default();
        let citations = match first_text(row, &cites) {
            None => 0,
            Some(text) => match parse_count(&text) {
                Some(n) => n,
                None => {
                    page.malformed.push((name, format!("unreadable citation count '{text}'")));
                    continue;
                }
            },
        };
        let year = first_text(row, &year_cell).and_then(|t| t.parse().ok());
        page.publications.push(Publication {
            title: name,
            year,
            citations,
        });
    }

    Ok(page)
}

/// Scholar profile scraper
pub struct ScholarSource {
    client: SourceHttpClient,
    base_url: String,
    delay: (Duration, Duration),
    range: YearRange,
    lookup: LookupTable,
    /// First profile page of each validated researcher, reused by `fetch`
    validated_pages: Mutex<HashMap<String, String>>,
    metadata: SourceMetadata,
}

impl ScholarSource {
    /// Creates a new Scholar source
    pub fn new(http_client: Arc<ResilientHttpClient>, config: &Config) -> Result<Self> {
        let metadata = SourceMetadata {
            id: "scholar".to_string(),
            name: "Google Scholar".to_string(),
            description: "Publications and citations per year from profile pages".to_string(),
            table: TABLE.to_string(),
            total_label: "Totals".to_string(),
        };

        Ok(Self {
            client: SourceHttpClient::new(http_client, "scholar"),
            base_url: config.scholar_url.trim_end_matches('/').to_string(),
            delay: config.scholar_delay()?,
            range: config.year_range(config.start_year),
            lookup: LookupTable::new(LOOKUP_TABLE, ID_COLUMN).with_extractor(scholar_user_id),
            validated_pages: Mutex::new(HashMap::new()),
            metadata,
        })
    }

    /// Fetches one page of a profile. `None` when the page is unavailable.
    async fn profile_page(&self, user_id: &str, start: usize) -> Result<Option<String>> {
        let url = format!("{}/citations", self.base_url);
        let cstart = start.to_string();
        let pagesize = PAGE_SIZE.to_string();
        let params = [
            ("user", user_id),
            ("hl", "en"),
            ("cstart", cstart.as_str()),
            ("pagesize", pagesize.as_str()),
        ];
        let response = self.client.get_with_query(&url, &params).await?;
        if !response.status().is_success() {
            warn!(user_id = %user_id, status = %response.status(), "Profile page unavailable");
            return Ok(None);
        }
        Ok(Some(response.text().await?))
    }

    /// Page `start` of a profile, served from the validation cache for the
    /// first page and fetched after a pause otherwise.
    async fn page(&self, user_id: &str, start: usize) -> Result<Option<String>> {
        if start == 0 {
            let cached = self.validated_pages.lock().remove(user_id);
            if let Some(html) = cached {
                debug!(user_id = %user_id, "Using first page fetched during validation");
                return Ok(Some(html));
            }
        }
        self.pause().await;
        self.profile_page(user_id, start).await
    }

    async fn pause(&self) {
        let (min, max) = self.delay;
        if max.is_zero() {
            return;
        }
        let wait = rand::thread_rng().gen_range(min..=max);
        debug!(wait_secs = wait.as_secs_f64(), "Pausing between profiles");
        tokio::time::sleep(wait).await;
    }
}

#[async_trait]
impl IdValidator for ScholarSource {
    async fn validate(&self, id: &str) -> Result<bool> {
        self.pause().await;
        let Some(html) = self.profile_page(id, 0).await? else {
            return Ok(false);
        };
        let found = Html::parse_document(&html)
            .select(&selector("#gsc_prf_in")?)
            .next()
            .is_some();
        if found {
            self.validated_pages.lock().insert(id.to_string(), html);
        }
        Ok(found)
    }
}

#[async_trait]
impl Source for ScholarSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, sink: &dyn Sink) -> Result<FetchOutcome> {
        let researchers = IdentityResolver::resolve(sink, &self.lookup, self).await?;
        if researchers.is_empty() {
            warn!(source = "scholar", "No valid researchers to fetch");
        }

        let mut acc = YearlyAccumulator::new(self.range, &["Publications", "Citations"]);
        let mut skipped = SkipLog::new("scholar");
        let mut authors = Table::new(["Name", "Segment", "Scholar ID", "Publications", "Citations", "h-index"]);
        let mut live_citations = 0;

        for researcher in &researchers {
            let mut h_index = None;
            let mut citations_all = None;
            let mut counted = 0i64;
            let mut start = 0;

            loop {
                let Some(html) = self.page(&researcher.id, start).await? else {
                    skipped.skip(researcher.name.as_str(), format!("profile page at cstart={start} unavailable"));
                    break;
                };
                let page = parse_profile(&html)?;
                if start == 0 {
                    h_index = page.h_index;
                    citations_all = page.citations_all;
                }
                for (title, reason) in page.malformed {
                    skipped.skip(format!("{}: {}", researcher.name, title), reason);
                }
                if page.publications.is_empty() {
                    break;
                }

                debug!(
                    researcher = %researcher.name,
                    start,
                    publications = page.publications.len(),
                    "Parsed profile page"
                );
                for publication in &page.publications {
                    let Some(year) = publication.year else {
                        debug!(title = %publication.title, "Publication without a year");
                        continue;
                    };
                    if acc.add(year, &[1, publication.citations]) {
                        counted += 1;
                    }
                }
                start += PAGE_SIZE;
            }

            info!(
                researcher = %researcher.name,
                publications = counted,
                citations = citations_all.unwrap_or(0),
                h_index = h_index.unwrap_or(0),
                "Fetched researcher"
            );
            live_citations += citations_all.unwrap_or(0);
            authors.push_row(vec![
                Cell::from(researcher.name.as_str()),
                Cell::from(researcher.segment.as_str()),
                Cell::from(researcher.id.as_str()),
                Cell::Int(counted),
                Cell::from(citations_all),
                Cell::from(h_index),
            ]);
        }

        let items = acc.items();
        let mut sheet = acc.finish(&self.metadata.total_label);
        sheet.set_total("Citations", live_citations);

        Ok(FetchOutcome::new(sheet.to_table())
            .with_extra(AUTHOR_TABLE, authors)
            .with_items(items)
            .with_skipped(skipped.into_items()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySink;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile_html(entries: &[(&str, &str, &str)]) -> String {
        let rows: String = entries
            .iter()
            .map(|(title, cites, year)| {
                format!(
                    r#"<tr class="gsc_a_tr">
                        <td class="gsc_a_t"><a class="gsc_a_at" href="/p">{title}</a><div class="gs_gray">A, B</div></td>
                        <td class="gsc_a_c"><a class="gsc_a_ac gs_ibl">{cites}</a></td>
                        <td class="gsc_a_y"><span class="gsc_a_h gsc_a_hc gs_ibl">{year}</span></td>
                    </tr>"#
                )
            })
            .collect();
        format!(
            r#"<html><body>
            <div id="gsc_prf_in">Ada Researcher</div>
            <table id="gsc_rsb_st">
              <thead><tr><th></th><th class="gsc_rsb_sth">All</th><th class="gsc_rsb_sth">Since 2019</th></tr></thead>
              <tbody>
                <tr><td class="gsc_rsb_sc1"><a>Citations</a></td><td class="gsc_rsb_std">1,234</td><td class="gsc_rsb_std">800</td></tr>
                <tr><td class="gsc_rsb_sc1"><a>h-index</a></td><td class="gsc_rsb_std">17</td><td class="gsc_rsb_std">12</td></tr>
                <tr><td class="gsc_rsb_sc1"><a>i10-index</a></td><td class="gsc_rsb_std">20</td><td class="gsc_rsb_std">15</td></tr>
              </tbody>
            </table>
            <table id="gsc_a_t"><tbody id="gsc_a_b">{rows}</tbody></table>
            </body></html>"#
        )
    }

    #[test]
    fn test_parse_profile() {
        let html = profile_html(&[
            ("Paper A", "40", "2021"),
            ("Paper B", "", "2019"),
            ("Paper C", "*", "2022"),
            ("Paper D", "3", ""),
        ]);
        let page = parse_profile(&html).unwrap();

        assert_eq!(page.h_index, Some(17));
        assert_eq!(page.citations_all, Some(1234));
        assert_eq!(page.publications.len(), 3);
        assert_eq!(
            page.publications[0],
            Publication { title: "Paper A".to_string(), year: Some(2021), citations: 40 }
        );
        assert_eq!(page.publications[1].citations, 0);
        assert_eq!(page.publications[2].year, None);
        assert_eq!(page.malformed.len(), 1);
        assert_eq!(page.malformed[0].0, "Paper C");
    }

    #[tokio::test]
    async fn test_fetch_pages_until_empty() {
        let server = MockServer::start().await;
        let first = profile_html(&[
            ("Old", "99", "2018"),
            ("One", "10", "2020"),
            ("Two", "5", "2020"),
            ("Three", "7", "2022"),
        ]);
        let second = profile_html(&[("Four", "1", "2021")]);
        let empty = profile_html(&[]);

        Mock::given(method("GET"))
            .and(path("/citations"))
            .and(query_param("user", "abc"))
            .and(query_param("cstart", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_string(empty))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/citations"))
            .and(query_param("user", "abc"))
            .and(query_param("cstart", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_string(second))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/citations"))
            .and(query_param("user", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(first))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/citations"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let uri = server.uri();
        let config = Config::from_overrides(&[
            ("scholar_url", uri.as_str()),
            ("scholar_delay_min", "0s"),
            ("scholar_delay_max", "0s"),
            ("start_year", "2020"),
            ("end_year", "2022"),
        ])
        .unwrap();
        let source = ScholarSource::new(Arc::new(ResilientHttpClient::with_defaults().unwrap()), &config).unwrap();

        let sink = MemorySink::new();
        sink.insert_rows(
            LOOKUP_TABLE,
            vec![
                vec!["Name".into(), "Segment".into(), "Google Scholar".into()],
                vec!["Ada".into(), "Faculty".into(), format!("{uri}/citations?user=abc&hl=en")],
                vec!["Nobody".into(), "Staff".into(), format!("{uri}/citations?user=missing")],
                vec!["No Link".into(), "Staff".into(), String::new()],
            ],
        );

        let outcome = source.fetch(&sink).await.unwrap();
        let t = &outcome.table;
        assert!(source.validated_pages.lock().is_empty());

        assert_eq!(t.rows[0], vec![Cell::Int(2020), Cell::Int(2), Cell::Int(15)]);
        assert_eq!(t.rows[1], vec![Cell::Int(2021), Cell::Int(1), Cell::Int(1)]);
        assert_eq!(t.rows[2], vec![Cell::Int(2022), Cell::Int(1), Cell::Int(7)]);
        assert_eq!(t.rows[3], vec![Cell::from("Totals"), Cell::Int(4), Cell::Int(1234)]);

        let (name, authors) = &outcome.extra_tables[0];
        assert_eq!(name, AUTHOR_TABLE);
        assert_eq!(authors.len(), 1);
        assert_eq!(
            authors.rows[0],
            vec![
                Cell::from("Ada"),
                Cell::from("Faculty"),
                Cell::from("abc"),
                Cell::Int(4),
                Cell::Int(1234),
                Cell::Int(17)
            ]
        );
    }
}

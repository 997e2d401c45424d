//! Medium Data Source
//!
//! Yearly article counts and engagement for one Medium author or
//! publication, through the unofficial Medium API on RapidAPI. The entity
//! name is tried as a user first, then as a publication slug.
//! https://rapidapi.com/nishujain199719-vgIfuFHZxVZ/api/medium2

use async_trait::async_trait;
use reqwest::header::HeaderName;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::{lenient_i64, year_of, FetchOutcome, SkipLog, Source, SourceMetadata};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::schemas::{IdentityRecord, YearRange, YearlyAccumulator};
use crate::storage::Sink;

pub const TABLE: &str = "Medium Stats";

#[derive(Debug, Deserialize)]
struct UserSearch {
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    followers_count: Value,
}

#[derive(Debug, Deserialize)]
struct PublicationLookup {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublicationInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "followers_count")]
    followers: Value,
}

#[derive(Debug, Deserialize)]
struct PublicationArticles {
    #[serde(default)]
    publication_articles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    User,
    Publication,
}

impl EntityKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Publication => "publication",
        }
    }
}

/// The account whose articles are counted
#[derive(Debug, Clone)]
struct Entity {
    kind: EntityKind,
    record: IdentityRecord,
    followers: i64,
}

/// Publication slugs use underscores and carry no leading `@`
fn publication_slug(name: &str) -> String {
    name.replace('@', "").replace('-', "_")
}

#[derive(Debug, Deserialize)]
struct ArticlePage {
    #[serde(default)]
    articles: Vec<String>,
    #[serde(default)]
    next: Option<String>,
}

/// Per-article values in column order
#[derive(Debug, Clone, PartialEq)]
struct ArticleStats {
    year: i32,
    claps: i64,
    voters: i64,
    responses: i64,
}

impl ArticleStats {
    fn from_json(article: &Value) -> std::result::Result<Self, String> {
        let published = article
            .get("published_at")
            .and_then(Value::as_str)
            .ok_or("missing published_at")?;
        let year = year_of(published).ok_or_else(|| format!("unparsable published_at '{published}'"))?;
        let count = |key: &str| article.get(key).and_then(lenient_i64).unwrap_or(0);
        Ok(Self {
            year,
            claps: count("claps"),
            voters: count("voters"),
            responses: count("responses_count"),
        })
    }
}

/// Medium data source
pub struct MediumSource {
    client: SourceHttpClient,
    base_url: String,
    entity_name: String,
    range: YearRange,
    metadata: SourceMetadata,
}

impl MediumSource {
    /// Creates a new Medium source
    pub fn new(http_client: Arc<ResilientHttpClient>, config: &Config) -> Result<Self> {
        let api_key = config
            .medium_api_key
            .as_deref()
            .ok_or_else(|| SyncError::SourceNotConfigured("medium: MEDIUM_API_KEY".to_string()))?;
        let entity_name = config
            .medium_entity_name
            .clone()
            .ok_or_else(|| SyncError::SourceNotConfigured("medium: MEDIUM_ENTITY_NAME".to_string()))?;

        let base = Url::parse(&config.medium_api_url)?;
        let host = base.host_str().unwrap_or_default().to_string();

        let client = SourceHttpClient::new(http_client, "medium")
            .with_min_interval(config.medium_min_interval()?)
            .with_header(HeaderName::from_static("x-rapidapi-key"), api_key)?
            .with_header(HeaderName::from_static("x-rapidapi-host"), &host)?;

        let metadata = SourceMetadata {
            id: "medium".to_string(),
            name: "Medium".to_string(),
            description: "Articles, claps, voters and responses per year".to_string(),
            table: TABLE.to_string(),
            total_label: "Total".to_string(),
        };

        Ok(Self {
            client,
            base_url: config.medium_api_url.trim_end_matches('/').to_string(),
            entity_name: entity_name.trim().to_string(),
            range: config.year_range(config.medium_start_year),
            metadata,
        })
    }

    /// Resolves the configured entity name, as a user first and as a
    /// publication when no user matches.
    async fn entity(&self) -> Result<Entity> {
        match self.user_entity().await {
            Ok(Some(entity)) => return Ok(entity),
            Ok(None) => debug!(entity = %self.entity_name, "No matching Medium user"),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => debug!(entity = %self.entity_name, error = %e, "User lookup failed"),
        }

        match self.publication_entity().await {
            Ok(Some(entity)) => Ok(entity),
            Err(e) if e.is_transport() => Err(e),
            Ok(None) | Err(_) => Err(SyncError::SchemaError(format!(
                "no Medium user or publication found for '{}'",
                self.entity_name
            ))),
        }
    }

    async fn user_entity(&self) -> Result<Option<Entity>> {
        let url = format!("{}/search/users", self.base_url);
        let search: UserSearch = self
            .client
            .get_json(&url, &[("query", self.entity_name.as_str())])
            .await?;
        let Some(user_id) = search.users.into_iter().next() else {
            return Ok(None);
        };

        let url = format!("{}/user/{}", self.base_url, user_id);
        let info: UserInfo = self.client.get_json(&url, &[] as &[(&str, &str)]).await?;
        Ok(Some(Entity {
            kind: EntityKind::User,
            record: IdentityRecord::new(
                info.username.as_deref().unwrap_or(&self.entity_name),
                "Main",
                user_id,
            ),
            followers: lenient_i64(&info.followers_count).unwrap_or(0),
        }))
    }

    async fn publication_entity(&self) -> Result<Option<Entity>> {
        let slug = publication_slug(&self.entity_name);
        let url = format!("{}/publication/id_for/slug", self.base_url);
        let lookup: PublicationLookup = self.client.get_json(&url, &[("slug", slug.as_str())]).await?;
        let Some(publication_id) = lookup.id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };

        let url = format!("{}/publication/{}", self.base_url, publication_id);
        let info: PublicationInfo = self.client.get_json(&url, &[] as &[(&str, &str)]).await?;
        Ok(Some(Entity {
            kind: EntityKind::Publication,
            record: IdentityRecord::new(
                info.name.as_deref().unwrap_or(&self.entity_name),
                "Main",
                publication_id,
            ),
            followers: lenient_i64(&info.followers).unwrap_or(0),
        }))
    }

    async fn publication_article_ids(&self, publication_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/publication/{}/articles", self.base_url, publication_id);
        let page: PublicationArticles = self.client.get_json(&url, &[] as &[(&str, &str)]).await?;
        Ok(page.publication_articles)
    }

    async fn article_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/search/articles", self.base_url);
        let query = format!("author:{user_id}");
        let mut ids = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let mut params = vec![("query", query.as_str())];
            if let Some(token) = &next {
                params.push(("next", token.as_str()));
            }
            let page: ArticlePage = self.client.get_json(&url, &params).await?;
            debug!(articles = page.articles.len(), "Fetched article page");
            if page.articles.is_empty() {
                break;
            }
            ids.extend(page.articles);

            match page.next.filter(|t| !t.is_empty()) {
                Some(token) => next = Some(token),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn article(&self, article_id: &str) -> Result<Value> {
        let url = format!("{}/article/{}", self.base_url, article_id);
        self.client.get_json(&url, &[] as &[(&str, &str)]).await
    }
}

#[async_trait]
impl Source for MediumSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, _sink: &dyn Sink) -> Result<FetchOutcome> {
        let entity = self.entity().await?;
        let followers = entity.followers;
        info!(
            kind = entity.kind.as_str(),
            name = %entity.record.name,
            id = %entity.record.id,
            followers,
            "Resolved Medium entity"
        );

        let ids = match entity.kind {
            EntityKind::User => self.article_ids(&entity.record.id).await?,
            EntityKind::Publication => self.publication_article_ids(&entity.record.id).await?,
        };
        let mut acc = YearlyAccumulator::new(self.range, &["Articles", "Claps", "Voters", "Responses"]);
        let mut skipped = SkipLog::new("medium");

        for id in &ids {
            let article = match self.article(id).await {
                Ok(article) => article,
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    skipped.skip(id.as_str(), format!("article lookup failed: {e}"));
                    continue;
                }
            };
            match ArticleStats::from_json(&article) {
                Ok(stats) => {
                    acc.add(stats.year, &[1, stats.claps, stats.voters, stats.responses]);
                }
                Err(reason) => skipped.skip(id.as_str(), reason),
            }
        }

        let items = acc.items();
        let mut sheet = acc.finish(&self.metadata.total_label);
        sheet.set_total("Followers", followers);

        Ok(FetchOutcome::new(sheet.to_table())
            .with_items(items)
            .with_skipped(skipped.into_items()))
    }
}

//! YouTube Data Source
//!
//! Yearly video counts and views for every channel in the `YouTube` lookup
//! table, via the YouTube Data API v3.
//! https://developers.google.com/youtube/v3/docs

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{lenient_i64, year_of, FetchOutcome, SkipLog, Source, SourceMetadata};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::identity::{seed_table, IdValidator, IdentityResolver, LookupTable};
use crate::schemas::{YearRange, YearlyAccumulator};
use crate::storage::Sink;

pub const TABLE: &str = "YouTube Yearly Stats";
pub const LOOKUP_TABLE: &str = "YouTube";
const ID_COLUMN: &str = "Channel ID";
const PAGE_SIZE: &str = "50";

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    #[serde(default)]
    statistics: Option<ChannelStatistics>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    #[serde(default)]
    view_count: Value,
    #[serde(default)]
    subscriber_count: Value,
    #[serde(default)]
    video_count: Value,
}

/// Live channel counters used for the total row
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct LiveCounters {
    videos: i64,
    views: i64,
    subscribers: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: SearchId,
    #[serde(default)]
    snippet: Option<Snippet>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoList {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default)]
    view_count: Value,
}

/// YouTube data source
pub struct YouTubeSource {
    client: SourceHttpClient,
    api_key: String,
    base_url: String,
    range: YearRange,
    lookup: LookupTable,
    metadata: SourceMetadata,
}

impl YouTubeSource {
    /// Creates a new YouTube source
    pub fn new(http_client: Arc<ResilientHttpClient>, config: &Config) -> Result<Self> {
        let api_key = config
            .youtube_api_key
            .clone()
            .ok_or_else(|| SyncError::SourceNotConfigured("youtube: YOUTUBE_API_KEY".to_string()))?;

        let mut lookup = LookupTable::new(LOOKUP_TABLE, ID_COLUMN);
        if let Some(channel_id) = config.youtube_channel_id.as_deref().filter(|id| !id.trim().is_empty()) {
            lookup = lookup.with_seed(seed_table(
                ID_COLUMN,
                &["User ID", "Channel URL", "Notes"],
                "Main",
                "Main",
                channel_id.trim(),
            ));
        }

        let metadata = SourceMetadata {
            id: "youtube".to_string(),
            name: "YouTube".to_string(),
            description: "Channel videos and views per year".to_string(),
            table: TABLE.to_string(),
            total_label: "Totals".to_string(),
        };

        Ok(Self {
            client: SourceHttpClient::new(http_client, "youtube"),
            api_key,
            base_url: config.youtube_api_url.trim_end_matches('/').to_string(),
            range: config.year_range(config.start_year),
            lookup,
            metadata,
        })
    }

    async fn channel_counters(&self, channel_id: &str) -> Result<LiveCounters> {
        let url = format!("{}/channels", self.base_url);
        let params = [
            ("part", "statistics"),
            ("id", channel_id),
            ("key", self.api_key.as_str()),
        ];
        let list: ChannelList = self.client.get_json(&url, &params).await?;
        let stats = list
            .items
            .into_iter()
            .next()
            .and_then(|c| c.statistics)
            .ok_or_else(|| SyncError::SchemaError(format!("no statistics for channel {channel_id}")))?;

        Ok(LiveCounters {
            videos: lenient_i64(&stats.video_count).unwrap_or(0),
            views: lenient_i64(&stats.view_count).unwrap_or(0),
            subscribers: lenient_i64(&stats.subscriber_count).unwrap_or(0),
        })
    }

    async fn search_page(&self, channel_id: &str, page_token: Option<&str>) -> Result<SearchPage> {
        let url = format!("{}/search", self.base_url);
        let mut params = vec![
            ("part", "snippet"),
            ("channelId", channel_id),
            ("maxResults", PAGE_SIZE),
            ("type", "video"),
            ("order", "date"),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        self.client.get_json(&url, &params).await
    }

    /// View counts for up to one page of videos, keyed by video id
    async fn video_views(&self, ids: &[String]) -> Result<HashMap<String, i64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!("{}/videos", self.base_url);
        let joined = ids.join(",");
        let params = [
            ("part", "statistics"),
            ("id", joined.as_str()),
            ("key", self.api_key.as_str()),
        ];
        let list: VideoList = self.client.get_json(&url, &params).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|v| {
                let views = v.statistics.map(|s| lenient_i64(&s.view_count).unwrap_or(0))?;
                Some((v.id, views))
            })
            .collect())
    }

    /// Buckets every video of one channel into `acc`.
    async fn collect_channel(
        &self,
        channel_id: &str,
        expected_videos: i64,
        acc: &mut YearlyAccumulator,
        skipped: &mut SkipLog,
    ) -> Result<()> {
        let mut page_token: Option<String> = None;
        let mut fetched: i64 = 0;

        loop {
            let page = self.search_page(channel_id, page_token.as_deref()).await?;
            if page.items.is_empty() {
                break;
            }

            let mut dated = Vec::with_capacity(page.items.len());
            for item in page.items {
                let Some(video_id) = item.id.video_id else {
                    skipped.skip(format!("{channel_id}/?"), "search result without a video id");
                    continue;
                };
                let published = item.snippet.and_then(|s| s.published_at);
                match published.as_deref().and_then(year_of) {
                    Some(year) => dated.push((video_id, year)),
                    None => skipped.skip(video_id, "missing or unparsable publishedAt"),
                }
            }

            let ids: Vec<String> = dated.iter().map(|(id, _)| id.clone()).collect();
            let views = self.video_views(&ids).await?;
            for (video_id, year) in dated {
                match views.get(&video_id) {
                    Some(v) => {
                        acc.add(year, &[1, *v]);
                        fetched += 1;
                    }
                    None => skipped.skip(video_id, "no statistics returned"),
                }
            }

            debug!(channel = %channel_id, fetched, expected_videos, "Fetched search page");

            match page.next_page_token {
                Some(token) if fetched < expected_videos => page_token = Some(token),
                _ => break,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IdValidator for YouTubeSource {
    async fn validate(&self, id: &str) -> Result<bool> {
        let url = format!("{}/channels", self.base_url);
        let params = [("part", "snippet"), ("id", id), ("key", self.api_key.as_str())];
        let response = self.client.get_with_query(&url, &params).await?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let list: ChannelList = response.json().await?;
        Ok(!list.items.is_empty())
    }
}

#[async_trait]
impl Source for YouTubeSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch(&self, sink: &dyn Sink) -> Result<FetchOutcome> {
        let channels = IdentityResolver::resolve(sink, &self.lookup, self).await?;
        if channels.is_empty() {
            warn!(source = "youtube", "No valid channels to fetch");
        }

        let mut acc = YearlyAccumulator::new(self.range, &["Videos", "Views"]);
        let mut skipped = SkipLog::new("youtube");
        let mut live = LiveCounters::default();

        for channel in &channels {
            let counters = self.channel_counters(&channel.id).await?;
            info!(
                channel = %channel.name,
                videos = counters.videos,
                views = counters.views,
                subscribers = counters.subscribers,
                "Fetched channel counters"
            );
            self.collect_channel(&channel.id, counters.videos, &mut acc, &mut skipped)
                .await?;

            live.videos += counters.videos;
            live.views += counters.views;
            live.subscribers += counters.subscribers;
        }

        let items = acc.items();
        let mut sheet = acc.finish(&self.metadata.total_label);
        sheet.set_total("Videos", live.videos);
        sheet.set_total("Views", live.views);
        sheet.set_total("Subscribers", live.subscribers);

        Ok(FetchOutcome::new(sheet.to_table())
            .with_items(items)
            .with_skipped(skipped.into_items()))
    }
}

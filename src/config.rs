//! Configuration for the sync pipeline
//!
//! Everything is read from the process environment (after `.env` is loaded)
//! once at startup and validated before any source is constructed.

use chrono::{Datelike, Local, NaiveTime};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::schemas::YearRange;

/// Source identifiers in the order the coordinator runs them by default.
pub const ALL_SOURCES: &[&str] = &["budget", "linkedin", "eventbrite", "scholar", "youtube", "medium"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Spreadsheet store
    pub google_credentials_file: Option<PathBuf>,
    pub google_sheet_id: Option<String>,
    #[serde(default = "default_sheets_api")]
    pub sheets_api_url: String,
    #[serde(default)]
    pub sheets_staged_writes: bool,

    // Which sources run, comma separated
    #[serde(default = "default_enabled_sources")]
    pub enabled_sources: String,

    // Year buckets
    #[serde(default = "default_start_year")]
    pub start_year: i32,
    pub end_year: Option<i32>,
    #[serde(default = "default_medium_start_year")]
    pub medium_start_year: i32,
    #[serde(default = "default_start_year")]
    pub budget_start_year: i32,

    // Budget ledger
    #[serde(default = "default_budget_marker")]
    pub budget_marker: String,
    #[serde(default = "default_budget_input_table")]
    pub budget_input_table: String,

    // Eventbrite
    pub eventbrite_private_token: Option<String>,
    #[serde(default = "default_eventbrite_api")]
    pub eventbrite_api_url: String,

    // YouTube
    pub youtube_api_key: Option<String>,
    pub youtube_channel_id: Option<String>,
    #[serde(default = "default_youtube_api")]
    pub youtube_api_url: String,

    // Medium (RapidAPI)
    pub medium_api_key: Option<String>,
    pub medium_entity_name: Option<String>,
    #[serde(default = "default_medium_api")]
    pub medium_api_url: String,
    #[serde(default = "default_medium_min_interval")]
    pub medium_min_interval: String,

    // LinkedIn
    pub linkedin_access_token: Option<String>,
    pub linkedin_company_id: Option<String>,
    #[serde(default = "default_linkedin_api")]
    pub linkedin_api_url: String,

    // Google Scholar
    #[serde(default = "default_scholar_url")]
    pub scholar_url: String,
    #[serde(default = "default_scholar_delay_min")]
    pub scholar_delay_min: String,
    #[serde(default = "default_scholar_delay_max")]
    pub scholar_delay_max: String,

    // HTTP behaviour
    #[serde(default = "default_http_timeout")]
    pub http_timeout: String,
    #[serde(default = "default_rate_limit_fallback")]
    pub rate_limit_fallback: String,
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    // Scheduling
    #[serde(default = "default_update_months")]
    pub update_months: String,
    #[serde(default = "default_update_time")]
    pub update_time: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    // Prometheus textfile output
    pub metrics_textfile: Option<PathBuf>,
}

fn default_sheets_api() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}

fn default_enabled_sources() -> String {
    ALL_SOURCES.join(",")
}

fn default_start_year() -> i32 {
    2020
}

fn default_medium_start_year() -> i32 {
    2019
}

fn default_budget_marker() -> String {
    "IDE Annual Budget".to_string()
}

fn default_budget_input_table() -> String {
    "Budget Data".to_string()
}

fn default_eventbrite_api() -> String {
    "https://www.eventbriteapi.com/v3".to_string()
}

fn default_youtube_api() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_medium_api() -> String {
    "https://medium2.p.rapidapi.com".to_string()
}

fn default_medium_min_interval() -> String {
    "2s".to_string()
}

fn default_linkedin_api() -> String {
    "https://api.linkedin.com/v2".to_string()
}

fn default_scholar_url() -> String {
    "https://scholar.google.com".to_string()
}

fn default_scholar_delay_min() -> String {
    "2s".to_string()
}

fn default_scholar_delay_max() -> String {
    "5s".to_string()
}

fn default_http_timeout() -> String {
    "60s".to_string()
}

fn default_rate_limit_fallback() -> String {
    "2s".to_string()
}

fn default_max_rate_limit_retries() -> u32 {
    5
}

fn default_update_months() -> String {
    "1,4,7,10".to_string()
}

fn default_update_time() -> String {
    "02:00".to_string()
}

fn default_poll_interval() -> String {
    "60s".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("./data/run_state.json")
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Builds a configuration from explicit key/value pairs, ignoring the
    /// environment. Keys use the lowercase field names.
    pub fn from_overrides(pairs: &[(&str, &str)]) -> Result<Self> {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value)?;
        }
        Ok(builder.build()?.try_deserialize()?)
    }

    /// Validates the configuration, reporting every missing required name at once.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.google_credentials_file.is_none() {
            missing.push("GOOGLE_CREDENTIALS_FILE".to_string());
        }
        if is_blank(&self.google_sheet_id) {
            missing.push("GOOGLE_SHEET_ID".to_string());
        }

        let sources = self.enabled_sources()?;
        for source in &sources {
            for name in self.missing_for_source(source) {
                missing.push(name.to_string());
            }
        }

        if !missing.is_empty() {
            return Err(SyncError::MissingConfig(missing));
        }

        if let Some(path) = &self.google_credentials_file {
            if !path.exists() {
                return Err(SyncError::InvalidConfig {
                    key: "GOOGLE_CREDENTIALS_FILE".to_string(),
                    message: format!("credentials file not found at {}", path.display()),
                });
            }
        }

        if let Some(end) = self.end_year {
            let earliest = self.start_year.min(self.medium_start_year);
            if end < earliest {
                return Err(SyncError::InvalidConfig {
                    key: "END_YEAR".to_string(),
                    message: format!("{end} is before the start year {earliest}"),
                });
            }
        }

        // Surface malformed values now rather than mid-run
        self.http_timeout()?;
        self.rate_limit_fallback()?;
        self.medium_min_interval()?;
        self.scholar_delay()?;
        self.poll_interval()?;
        self.update_months()?;
        self.update_time()?;

        Ok(())
    }

    fn missing_for_source(&self, source: &str) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match source {
            "eventbrite" => {
                if is_blank(&self.eventbrite_private_token) {
                    missing.push("EVENTBRITE_PRIVATE_TOKEN");
                }
            }
            "youtube" => {
                if is_blank(&self.youtube_api_key) {
                    missing.push("YOUTUBE_API_KEY");
                }
            }
            "medium" => {
                if is_blank(&self.medium_api_key) {
                    missing.push("MEDIUM_API_KEY");
                }
                if is_blank(&self.medium_entity_name) {
                    missing.push("MEDIUM_ENTITY_NAME");
                }
            }
            "linkedin" => {
                if is_blank(&self.linkedin_access_token) {
                    missing.push("LINKEDIN_ACCESS_TOKEN");
                }
            }
            _ => {}
        }
        missing
    }

    /// Enabled source ids in run order. Unknown ids are rejected.
    pub fn enabled_sources(&self) -> Result<Vec<String>> {
        let mut sources = Vec::new();
        for raw in self.enabled_sources.split(',') {
            let id = raw.trim().to_lowercase();
            if id.is_empty() {
                continue;
            }
            if !ALL_SOURCES.contains(&id.as_str()) {
                return Err(SyncError::InvalidConfig {
                    key: "ENABLED_SOURCES".to_string(),
                    message: format!("unknown source '{id}'"),
                });
            }
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
        Ok(sources)
    }

    /// Checks if a source id is enabled
    pub fn is_enabled(&self, source: &str) -> bool {
        self.enabled_sources()
            .map(|s| s.iter().any(|id| id == source))
            .unwrap_or(false)
    }

    /// Year range starting at `start`, ending at END_YEAR or the current year.
    pub fn year_range(&self, start: i32) -> YearRange {
        let end = self.end_year.unwrap_or_else(|| Local::now().year());
        YearRange::new(start, end.max(start))
    }

    pub fn http_timeout(&self) -> Result<Duration> {
        parse_positive_duration("HTTP_TIMEOUT", &self.http_timeout)
    }

    pub fn rate_limit_fallback(&self) -> Result<Duration> {
        parse_duration("RATE_LIMIT_FALLBACK", &self.rate_limit_fallback)
    }

    pub fn medium_min_interval(&self) -> Result<Duration> {
        parse_duration("MEDIUM_MIN_INTERVAL", &self.medium_min_interval)
    }

    /// Random pause bounds between Scholar profiles.
    pub fn scholar_delay(&self) -> Result<(Duration, Duration)> {
        let min = parse_duration("SCHOLAR_DELAY_MIN", &self.scholar_delay_min)?;
        let max = parse_duration("SCHOLAR_DELAY_MAX", &self.scholar_delay_max)?;
        if max < min {
            return Err(SyncError::InvalidConfig {
                key: "SCHOLAR_DELAY_MAX".to_string(),
                message: "must not be shorter than SCHOLAR_DELAY_MIN".to_string(),
            });
        }
        Ok((min, max))
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_positive_duration("POLL_INTERVAL", &self.poll_interval)
    }

    /// Months (1-12) in which the scheduled sync is allowed to run.
    pub fn update_months(&self) -> Result<Vec<u32>> {
        let mut months = Vec::new();
        for raw in self.update_months.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let month: u32 = raw.parse().map_err(|_| SyncError::InvalidConfig {
                key: "UPDATE_MONTHS".to_string(),
                message: format!("'{raw}' is not a month number"),
            })?;
            if !(1..=12).contains(&month) {
                return Err(SyncError::InvalidConfig {
                    key: "UPDATE_MONTHS".to_string(),
                    message: format!("{month} is outside 1-12"),
                });
            }
            months.push(month);
        }
        Ok(months)
    }

    /// Local time of day at which the daily window check fires.
    pub fn update_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.update_time.trim(), "%H:%M").map_err(|e| {
            SyncError::InvalidConfig {
                key: "UPDATE_TIME".to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Checks if the Google Sheets store is configured
    pub fn has_sheets(&self) -> bool {
        self.google_credentials_file.is_some() && !is_blank(&self.google_sheet_id)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| SyncError::InvalidConfig {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_positive_duration(key: &str, value: &str) -> Result<Duration> {
    let duration = parse_duration(key, value)?;
    if duration.is_zero() {
        return Err(SyncError::InvalidConfig {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

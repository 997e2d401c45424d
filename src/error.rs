//! Error types for the sync pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingConfig(Vec<String>),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig {
        key: String,
        message: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Rate limit still exceeded after {attempts} attempts")]
    RateLimited {
        attempts: u32,
    },

    #[error("API error: {code} - {message}")]
    ApiError {
        code: String,
        message: String,
    },

    #[error("Unexpected response shape: {0}")]
    SchemaError(String),

    #[error("Spreadsheet error: {0}")]
    SheetError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Source not configured: {0}")]
    SourceNotConfigured(String),
}

impl From<jsonwebtoken::errors::Error> for SyncError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        SyncError::AuthError(e.to_string())
    }
}

impl SyncError {
    /// Transport-level failures that make further requests to the same API pointless
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::HttpError(_) | SyncError::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_lists_every_name() {
        let err = SyncError::MissingConfig(vec![
            "GOOGLE_SHEET_ID".to_string(),
            "YOUTUBE_API_KEY".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required configuration: GOOGLE_SHEET_ID, YOUTUBE_API_KEY"
        );
    }

    #[test]
    fn test_only_transport_errors_are_transport() {
        assert!(SyncError::RateLimited { attempts: 3 }.is_transport());
        assert!(!SyncError::ApiError { code: "404".to_string(), message: String::new() }.is_transport());
        assert!(!SyncError::SchemaError("no users".to_string()).is_transport());

        let json = serde_json::from_str::<serde_json::Value>("<html>oops</html>").unwrap_err();
        assert!(!SyncError::from(json).is_transport());
    }
}

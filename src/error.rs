use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("no Slack token: set SLACK_TOKEN or [slack] token in settings")]
    MissingToken,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Slack API error: {0}")]
    SlackApi(String),

    #[error("Slack rate limit error: retry after {retry_after_secs}s")]
    SlackRateLimit { retry_after_secs: u64 },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("failed to read file at {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file at {path}: {source}")]
    WriteFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("JSON serialization error: {0}")]
    JsonSerialize(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("zip error: {0}")]
    Zip(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("incomplete listing for {0}: refusing to overwrite previous lists")]
    IncompleteListing(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Http(e.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::Csv(e.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(e: zip::result::ZipError) -> Self {
        AppError::Zip(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_missing_token_display() {
        let err = AppError::MissingToken;
        assert!(err.to_string().contains("SLACK_TOKEN"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: AppError = io_err.into();
        assert!(matches!(err, AppError::Io(_)));
        assert!(err.to_string().starts_with("IO error:"));
    }

    #[test]
    fn test_slack_api_display() {
        let err = AppError::SlackApi("channel_not_found".to_string());
        assert_eq!(err.to_string(), "Slack API error: channel_not_found");
    }

    #[test]
    fn test_slack_rate_limit_display() {
        let err = AppError::SlackRateLimit { retry_after_secs: 30 };
        assert_eq!(err.to_string(), "Slack rate limit error: retry after 30s");
    }

    #[test]
    fn test_read_file_display_and_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = AppError::ReadFile {
            path: "/path/to/users.json".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("/path/to/users.json"));
        assert!(err.to_string().contains("failed to read file"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_write_file_display_and_source() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        let err = AppError::WriteFile {
            path: "/path/to/archiveList.json".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("/path/to/archiveList.json"));
        assert!(err.to_string().contains("failed to write file"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_incomplete_listing_display() {
        let err = AppError::IncompleteListing("im".to_string());
        assert_eq!(
            err.to_string(),
            "incomplete listing for im: refusing to overwrite previous lists"
        );
    }

    #[test]
    fn test_csv_and_zip_display() {
        assert_eq!(AppError::Csv("bad row".into()).to_string(), "CSV error: bad row");
        assert_eq!(AppError::Zip("bad entry".into()).to_string(), "zip error: bad entry");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AppError>();
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err(AppError::Cancelled);
        assert!(result.is_err());
    }
}

//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A subscriber, or a destination inside one, repeats an existing identity.
    #[error("Configuration conflict for platform {platform}, uid {uid}: {detail}")]
    ConfigConflict {
        platform: String,
        uid: i64,
        detail: String,
    },

    /// The subscriber being removed or replaced is not present.
    #[error("Subscriber not found: platform {platform}, uid {uid}")]
    ConfigNotFound { platform: String, uid: i64 },

    #[error("No handler found for event {event_type} (handler: {handler})")]
    HandlerResolutionMiss { event_type: String, handler: String },

    #[error("Handler {handler} failed on event {event_type}: {message}")]
    HandlerExecution {
        handler: String,
        event_type: String,
        message: String,
    },

    #[error("Failed to download dependency {dependency}: {message}")]
    DependencyDownload { dependency: String, message: String },

    #[error("Malformed extension archive {archive}: {message}")]
    MalformedExtension { archive: String, message: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn conflict(platform: impl Into<String>, uid: i64) -> Self {
        Self::ConfigConflict {
            platform: platform.into(),
            uid,
            detail: "subscriber already exists".to_string(),
        }
    }

    pub fn destination_conflict(
        platform: impl Into<String>,
        uid: i64,
        destination: impl std::fmt::Display,
    ) -> Self {
        Self::ConfigConflict {
            platform: platform.into(),
            uid,
            detail: format!("duplicate destination {}", destination),
        }
    }

    pub fn not_found(platform: impl Into<String>, uid: i64) -> Self {
        Self::ConfigNotFound {
            platform: platform.into(),
            uid,
        }
    }

    pub fn handler_miss(event_type: impl Into<String>, handler: Option<&str>) -> Self {
        Self::HandlerResolutionMiss {
            event_type: event_type.into(),
            handler: handler.unwrap_or("<default>").to_string(),
        }
    }

    pub fn malformed(archive: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedExtension {
            archive: archive.into(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error is a structural configuration error that must reach the caller.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigConflict { .. } | Self::ConfigNotFound { .. })
    }
}

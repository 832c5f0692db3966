//! Error taxonomy shared by the cache, the pipeline and the HTTP layer.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("{name} environment variable is not set")]
    MissingCredential { name: &'static str },

    #[error("provider error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("provider reported failure: {0}")]
    ProviderLogic(String),

    #[error("timed out after {}ms waiting for in-flight translation", waited.as_millis())]
    Timeout { waited: Duration },

    #[error("no chapter number in url: {0}")]
    InvalidChapterUrl(String),

    #[error("chapter number {0} is out of range")]
    InvalidChapterNumber(i128),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("in-flight translation failed: {reason}")]
    ProducerFailed { reason: String },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TranslateError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            TranslateError::MissingCredential { .. } => "MISSING_CREDENTIAL",
            TranslateError::Provider { .. } => "PROVIDER_ERROR",
            TranslateError::ProviderLogic(_) => "PROVIDER_LOGIC_ERROR",
            TranslateError::Timeout { .. } => "TIMEOUT",
            TranslateError::InvalidChapterUrl(_) => "INVALID_CHAPTER_URL",
            TranslateError::InvalidChapterNumber(_) => "INVALID_CHAPTER_NUMBER",
            TranslateError::InvalidRequest(_) => "INVALID_REQUEST",
            TranslateError::ProducerFailed { .. } => "PRODUCER_FAILED",
            TranslateError::Http(_) => "UPSTREAM_TRANSPORT",
            TranslateError::Stream(_) => "STREAM_ERROR",
            TranslateError::Io(_) => "IO_ERROR",
            TranslateError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T, E = TranslateError> = std::result::Result<T, E>;

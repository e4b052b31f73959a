//! Developer utilities around Karate request logs and API responses.

pub mod curl;
pub mod diff;
pub mod jwt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid Karate log: HTTP method not found")]
    MissingMethod,
    #[error("invalid Karate log: URL not found")]
    MissingUrl,
    #[error("{input} is not valid JSON: {source}")]
    InvalidJson {
        input: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

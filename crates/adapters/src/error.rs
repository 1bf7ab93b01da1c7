use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("no API key provided; set one in the config or the GROQ_API_KEY environment variable")]
    MissingApiKey,
    #[error("API returned an empty response")]
    EmptyResponse,
    #[error("stream decoding failed: {0}")]
    Stream(String),
}

//! Error types for each stage of talking to the inference backend.
//!
//! None of these ever reach the HTTP layer as a status code: health failures
//! collapse into a boolean and stream failures into an in-band text marker.

use reqwest::StatusCode;
use thiserror::Error;

/// Outcome of a single liveness probe against the backend.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("backend unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("backend health check returned {0}")]
    BadStatus(StatusCode),
}

/// The backend process could not be launched.
#[derive(Debug, Error)]
#[error("failed to launch {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// A `data: ` line whose payload is not valid JSON.
#[derive(Debug, Error)]
#[error("malformed backend chunk: {0}")]
pub struct MalformedChunk(#[from] pub serde_json::Error);

/// Failure that terminates a generation stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    BackendStatus(StatusCode),
    #[error("{0}")]
    Spawn(#[from] SpawnError),
    #[error("{0}")]
    Read(#[from] std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;

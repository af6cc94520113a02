use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TelemetryConfig;
use crate::status::PlaybackSnapshot;

/// Messages sent to a telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum ControlMessage {
    Init { config: TelemetryConfig },
    Start,
    Stop,
    UpdateConfig { config: TelemetryConfig },
    FetchOnce,
    /// Ends the background worker; never sent to the timer source.
    Terminate,
}

/// Messages emitted by a telemetry source.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Status(PlaybackSnapshot),
    Error {
        context: ErrorContext,
        error: TelemetryError,
    },
    State(SourceState),
}

/// Where a telemetry error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorContext {
    Fetch,
    Worker,
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorContext::Fetch => f.write_str("fetch"),
            ErrorContext::Worker => f.write_str("worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceState {
    Started,
    Stopped,
}

/// Failures while acquiring status. Everything except `WorkerUnavailable`
/// is recoverable: the next tick simply tries again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    #[error("status request timed out after {0} ms")]
    Timeout(u64),
    #[error("status request failed: HTTP {0}")]
    Http(u16),
    #[error("status request failed: {0}")]
    Request(String),
    #[error("status response has no OnStatus(...) payload")]
    Malformed,
    #[error("background worker unavailable: {0}")]
    WorkerUnavailable(String),
}

impl TelemetryError {
    pub fn is_fatal_for_worker(&self) -> bool {
        matches!(self, TelemetryError::WorkerUnavailable(_))
    }
}

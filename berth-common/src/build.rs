//! Build service event types
//!
//! Mirrors the shape of the solve status stream emitted by the image build
//! service: vertex updates, transfer progress and raw log output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discrete build step (e.g. `[3/6] COPY . /app`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VertexEvent {
    pub name: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress update for a streamed transfer tied to a vertex
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEvent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vertex: String,
    pub current: u64,
    /// Zero when the total size is unknown
    #[serde(default)]
    pub total: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

impl StatusEvent {
    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }
}

/// Raw output produced by a build step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLineEvent {
    #[serde(default)]
    pub vertex: String,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// A single build event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BuildEvent {
    Vertex(VertexEvent),
    Status(StatusEvent),
    Log(LogLineEvent),
}

/// A batch of events as delivered by one solve status message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveStatus {
    #[serde(default)]
    pub vertexes: Vec<VertexEvent>,
    #[serde(default)]
    pub statuses: Vec<StatusEvent>,
    #[serde(default)]
    pub logs: Vec<LogLineEvent>,
}

impl SolveStatus {
    /// Flatten the batch: vertexes first, then statuses, then logs
    pub fn into_events(self) -> impl Iterator<Item = BuildEvent> {
        self.vertexes
            .into_iter()
            .map(BuildEvent::Vertex)
            .chain(self.statuses.into_iter().map(BuildEvent::Status))
            .chain(self.logs.into_iter().map(BuildEvent::Log))
    }
}

//! Live transfer progress
//!
//! Tracks every in-flight status id per service and re-renders the service's
//! ephemeral block after each update. Completed ids get one final permanent
//! line and leave the block.

use super::format_timestamp;
use super::store::LogStore;
use berth_common::{Result, StatusEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const BYTE_UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
const DIGEST_PREFIX: &str = "sha256:";
const SHORT_ID_LEN: usize = 12;

/// Format a byte count with two decimals in the largest fitting base-1024 unit
pub fn humanize_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    let exponent = ((u64::BITS - 1 - bytes.leading_zeros()) / 10) as usize;
    let scaled = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{:.2}{}", scaled, BYTE_UNITS[exponent])
}

/// Shorten content-addressed ids to 12 characters of their hash
pub fn short_id(id: &str) -> &str {
    match id.strip_prefix(DIGEST_PREFIX) {
        Some(payload) => payload.get(..SHORT_ID_LEN).unwrap_or(payload),
        None => id,
    }
}

/// Latest known progress of one status id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexStatus {
    pub id: String,
    pub current: u64,
    /// Zero when unknown
    pub total: u64,
    pub timestamp: DateTime<Utc>,
    pub completed: bool,
}

impl From<&StatusEvent> for VertexStatus {
    fn from(event: &StatusEvent) -> Self {
        Self {
            id: event.id.clone(),
            current: event.current,
            total: event.total,
            timestamp: event.timestamp,
            completed: event.is_completed(),
        }
    }
}

impl VertexStatus {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// `<current>[/<total>]`
    pub fn progress(&self) -> String {
        if self.total != 0 {
            format!("{}/{}", humanize_bytes(self.current), humanize_bytes(self.total))
        } else {
            humanize_bytes(self.current)
        }
    }

    /// The line without its timestamp, as handed to listeners
    pub fn message(&self) -> String {
        format!("{} {}", self.short_id(), self.progress())
    }

    /// The full `[<timestamp>] <short-id> <progress>` line
    pub fn render(&self) -> String {
        format!("[{}] {}", format_timestamp(self.timestamp), self.message())
    }
}

/// What a status update did to the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The id completed; this final line is now permanent
    Committed(String),
    /// The id is still in flight; this is its re-rendered line
    Rendered(String),
}

impl StatusOutcome {
    pub fn message(&self) -> &str {
        match self {
            StatusOutcome::Committed(line) | StatusOutcome::Rendered(line) => line,
        }
    }
}

type ServiceStatuses = Arc<Mutex<HashMap<String, VertexStatus>>>;

/// Tracks in-flight progress per service and owns each log's ephemeral block
pub struct StatusMultiplexer {
    store: Arc<LogStore>,
    services: Mutex<HashMap<String, ServiceStatuses>>,
}

impl StatusMultiplexer {
    pub fn new(store: Arc<LogStore>) -> Self {
        Self {
            store,
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one status event and rewrite the service's ephemeral block
    pub async fn update(&self, service: &str, event: &StatusEvent) -> Result<StatusOutcome> {
        let statuses = self.statuses_for(service).await;
        // Held across both writes so renders of one service never reorder
        let mut statuses = statuses.lock().await;

        let status = VertexStatus::from(event);
        let outcome = if status.completed {
            self.store
                .append(service, status.timestamp, &status.message())
                .await?;
            statuses.remove(&status.id);
            StatusOutcome::Committed(status.message())
        } else {
            let message = status.message();
            statuses.insert(status.id.clone(), status);
            StatusOutcome::Rendered(message)
        };

        let block = render_block(statuses.values());
        self.store.replace_tail(service, block).await?;

        Ok(outcome)
    }

    /// Ids currently in flight for a service, in rendering order
    pub async fn active(&self, service: &str) -> Vec<VertexStatus> {
        let statuses = self.statuses_for(service).await;
        let statuses = statuses.lock().await;
        let mut active: Vec<VertexStatus> = statuses.values().cloned().collect();
        sort_for_display(&mut active);
        active
    }

    async fn statuses_for(&self, service: &str) -> ServiceStatuses {
        let mut services = self.services.lock().await;
        services.entry(service.to_string()).or_default().clone()
    }
}

fn sort_for_display(statuses: &mut [VertexStatus]) {
    statuses.sort_by_cached_key(|s| (s.short_id().to_string(), s.progress()));
}

/// Render the ephemeral block: one line per id, ordered by id and progress,
/// never by timestamp
pub fn render_block<'a>(statuses: impl Iterator<Item = &'a VertexStatus>) -> String {
    let mut statuses: Vec<VertexStatus> = statuses.cloned().collect();
    sort_for_display(&mut statuses);
    statuses
        .iter()
        .map(|s| format!("{}\n", s.render()))
        .collect()
}

//! Build event processing
//!
//! Normalizes events from the build service, filters bookkeeping noise,
//! drives the log store and status multiplexer and notifies listeners.

use super::status::{StatusMultiplexer, StatusOutcome};
use super::store::LogStore;
use crate::config::BuildConfig;
use berth_common::{
    BuildEvent, Error, LogLineEvent, Result, SolveStatus, StatusEvent, VertexEvent,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error};

const INTERNAL_VERTEX_PREFIX: &str = "[internal]";

/// Callback receiving `(service, line)` for each committed or re-rendered line
pub type LogListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Observer registry, safe to extend while events are being processed
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<LogListener>>,
}

impl ListenerRegistry {
    pub fn register(&self, listener: LogListener) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener registered so far, without holding the registry lock
    pub fn notify(&self, service: &str, line: &str) {
        let snapshot: Vec<LogListener> =
            self.listeners.read().unwrap_or_else(|e| e.into_inner()).clone();
        for listener in snapshot {
            listener(service, line);
        }
    }
}

/// Turns build events into per-service logs
pub struct EventProcessor {
    store: Arc<LogStore>,
    statuses: StatusMultiplexer,
    listeners: ListenerRegistry,
    verbose: bool,
}

impl EventProcessor {
    pub fn new(store: Arc<LogStore>, verbose: bool) -> Self {
        Self {
            statuses: StatusMultiplexer::new(store.clone()),
            store,
            listeners: ListenerRegistry::default(),
            verbose,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(Arc::new(LogStore::new(&config.log_dir)), config.verbose)
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn statuses(&self) -> &StatusMultiplexer {
        &self.statuses
    }

    /// Register a callback for every committed line and status re-render
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.listeners.register(Arc::new(listener));
    }

    /// Commit a permanent line and notify listeners
    pub async fn log(&self, service: &str, when: DateTime<Utc>, message: &str) -> Result<()> {
        let message = message.trim_matches(|c| c == '\r' || c == '\n');
        self.store.append(service, when, message).await?;
        self.listeners.notify(service, message);
        Ok(())
    }

    /// Process one solve status batch: vertexes, then statuses, then logs
    pub async fn process(&self, service: &str, status: SolveStatus) -> Result<()> {
        for event in status.into_events() {
            self.process_event(service, event).await?;
        }
        Ok(())
    }

    /// Process a single event
    pub async fn process_event(&self, service: &str, event: BuildEvent) -> Result<()> {
        if self.verbose {
            self.dump_raw(service, &event).await?;
        }

        match event {
            BuildEvent::Vertex(vertex) => self.process_vertex(service, &vertex).await,
            BuildEvent::Status(status) => self.process_status(service, &status).await,
            BuildEvent::Log(line) => self.process_log_line(service, &line).await,
        }
    }

    /// Consume `(service, batch)` messages until every sender is dropped
    pub async fn run(&self, mut events: mpsc::Receiver<(String, SolveStatus)>) -> Result<()> {
        while let Some((service, status)) = events.recv().await {
            if let Err(e) = self.process(&service, status).await {
                error!("Stopping build log processing: {}", e);
                return Err(e);
            }
        }
        debug!("Build event stream closed");
        Ok(())
    }

    /// Release every log file
    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn process_vertex(&self, service: &str, vertex: &VertexEvent) -> Result<()> {
        if vertex.name.starts_with(INTERNAL_VERTEX_PREFIX) {
            return Ok(());
        }

        let now = Utc::now();
        if let Some(failure) = vertex.error.as_deref().filter(|e| !e.is_empty()) {
            let message = format!("{}: LAYERID={}", failure, vertex.digest);
            self.log(service, now, &message)
                .await
                .map_err(|e| wrap(service, "could not log failure to", e))?;
        }

        let message = if vertex.cached {
            format!("cached: {}", vertex.name)
        } else {
            vertex.name.clone()
        };
        self.log(service, now, &message)
            .await
            .map_err(|e| wrap(service, "could not write to", e))
    }

    async fn process_status(&self, service: &str, status: &StatusEvent) -> Result<()> {
        let outcome = self
            .statuses
            .update(service, status)
            .await
            .map_err(|e| wrap(service, "could not write status to", e))?;

        if let StatusOutcome::Committed(_) = outcome {
            debug!("{}: transfer {} completed", service, status.id);
        }
        self.listeners.notify(service, outcome.message());
        Ok(())
    }

    async fn process_log_line(&self, service: &str, line: &LogLineEvent) -> Result<()> {
        let data = String::from_utf8_lossy(&line.data);
        self.log(service, line.timestamp, &data)
            .await
            .map_err(|e| wrap(service, "could not write to", e))
    }

    async fn dump_raw(&self, service: &str, event: &BuildEvent) -> Result<()> {
        let message = match event {
            BuildEvent::Vertex(v) => format!(
                "Vertex: '{}',  '{}',  '{}'",
                v.name,
                v.error.as_deref().unwrap_or_default(),
                v.digest
            ),
            BuildEvent::Status(s) => format!(
                "Status: '{}'.  '{}',  '{}',  (curr={}, total={})",
                s.name, s.id, s.vertex, s.current, s.total
            ),
            BuildEvent::Log(l) => format!(
                "Log: '{}',  '{}'",
                String::from_utf8_lossy(&l.data),
                l.vertex
            ),
        };
        self.log(service, Utc::now(), &message)
            .await
            .map_err(|e| wrap(service, "could not write diagnostics to", e))
    }
}

fn wrap(service: &str, what: &str, err: Error) -> Error {
    match err {
        Error::LogStoreClosed(_) => err,
        other => Error::LogStore(format!("{} {}'s logs: {}", what, service, other)),
    }
}

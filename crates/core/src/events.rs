//! # Run Events
//!
//! Progress events streamed to the UI while a run executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of run event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    /// A new run replaced the active one
    RunStarted,
    /// A provider call is about to be issued
    StageStarted,
    /// A provider call returned text
    StageCompleted,
    /// A provider call failed
    StageFailed,
    /// Phase machine moved forward
    PhaseAdvanced,
    /// Manager routed feedback back to an earlier phase
    Pivoted,
    /// Run (or phase action) finished
    RunCompleted,
    /// Run (or phase action) ended with an error
    RunFailed,
}

/// An event in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// Unique event ID
    pub id: Uuid,
    /// Run this event belongs to
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: RunEventKind,
    /// Role that produced this event, if any
    #[serde(default)]
    pub role: Option<String>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RunEvent {
    pub fn new(kind: RunEventKind, run_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            kind,
            role: None,
            data: None,
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Optional fan-out of events for one run
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    run_id: Uuid,
    tx: Option<broadcast::Sender<RunEvent>>,
}

impl EventSink {
    pub fn new(run_id: Uuid, tx: Option<broadcast::Sender<RunEvent>>) -> Self {
        Self { run_id, tx }
    }

    /// Sink that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn event(&self, kind: RunEventKind) -> RunEvent {
        RunEvent::new(kind, self.run_id)
    }

    /// Send if anyone is listening; no receivers is not an error
    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

//! Token-lifecycle event logging
//!
//! Every `/token` request emits a started event and exactly one terminal
//! event (issued or failed). Events are JSON lines on stdout and/or a
//! file, independent of the tracing pipeline, so they can feed audit
//! tooling directly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::config::EventsConfig;

/// Event types
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TokenIssuanceStarted,
    TokenIssued,
    TokenIssuanceFailed,
    AuthzDenied,
}

/// A single event record
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            trace_id: None,
            client_id: None,
            grant_type: None,
            scope: None,
            subject: None,
            status_code: None,
            duration_ms: None,
            error_type: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_grant_type(mut self, grant_type: impl Into<String>) -> Self {
        self.grant_type = Some(grant_type.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

/// Event sink
pub struct EventLogger {
    enabled: bool,
    stdout: bool,
    file: Option<Mutex<std::fs::File>>,
}

impl EventLogger {
    /// Create an event logger from configuration
    pub fn new(config: &EventsConfig) -> std::io::Result<Self> {
        let file = match &config.file {
            Some(path) => Some(Mutex::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            )),
            None => None,
        };

        Ok(Self {
            enabled: config.enabled,
            stdout: config.stdout,
            file,
        })
    }

    /// Create a disabled event logger
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            stdout: false,
            file: None,
        }
    }

    /// Emit an event
    pub fn log(&self, event: &Event) {
        if !self.enabled {
            return;
        }

        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event");
                return;
            }
        };

        if self.stdout {
            println!("{}", json);
        }

        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", json);
            }
        }
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::{AuditEvent, AuditRecord, AuditStore};

/// Envelope wrapping an audit event with the time it was emitted
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Handle for emitting audit events
///
/// Cheap to clone. Emitting never fails the caller: a full or closed channel
/// is logged and the event dropped.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.send(AuditEventEnvelope::now(event)).await {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }

    /// Emit from synchronous code outside the runtime.
    pub fn emit_blocking(&self, event: AuditEvent) {
        if let Err(e) = self.tx.blocking_send(AuditEventEnvelope::now(event)) {
            tracing::error!("Failed to emit audit event: {}", e);
        }
    }

    /// Emit without waiting. Returns false if the event was dropped.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        match self.tx.try_send(AuditEventEnvelope::now(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit audit event: {}", e);
                false
            }
        }
    }
}

/// Background task that receives audit events and writes them to storage
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer, consuming events until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord {
                id: 0,
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                request_id: envelope.event.request_id(),
                user_id: envelope.event.user_id(),
                data: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write audit event: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create a complete audit system
///
/// Spawn the returned writer with `tokio::spawn(writer.run())` and clone the
/// handle wherever events originate.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

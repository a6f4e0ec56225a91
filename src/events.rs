//! # Process Events
//!
//! Publish/subscribe channel decoupling pipeline-stage completion from
//! side-effect consumers (metrics, audit, alerting).
//!
//! Publication is fire-and-forget: it never blocks and never fails the
//! pipeline. Each listener drains its own queue on its own task, so a
//! slow or failing listener cannot affect the publisher or its peers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chain::ChainResult;
use crate::types::{ModuleError, Result};

/// Lifecycle transition a [`ProcessEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    ModuleStarted,
    InputValidated,
    BusinessProcessed,
    ModuleCompleted,
    ModuleError,
    ChainCompleted,
}

/// One lifecycle notification. Created per transition, never mutated
/// after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub event_type: EventType,
    /// Module service id, or `"CHAIN"` for chain-level events
    pub service_id: String,
    pub chain_id: String,
    /// Result payload for the transition, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Free-form step metadata
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Output of the preceding step, when the transition has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_result: Option<Value>,
}

impl ProcessEvent {
    pub fn new<S, C>(event_type: EventType, service_id: S, chain_id: C) -> Self
    where
        S: Into<String>,
        C: Into<String>,
    {
        Self {
            event_type,
            service_id: service_id.into(),
            chain_id: chain_id.into(),
            result: None,
            metadata: Map::new(),
            error_code: None,
            error_message: None,
            timestamp: Utc::now(),
            execution_time_ms: None,
            previous_result: None,
        }
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn error(mut self, error: &ModuleError) -> Self {
        self.error_code = Some(error.code.clone());
        self.error_message = Some(error.message.clone());
        self
    }

    pub fn execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn previous_result(mut self, previous: Value) -> Self {
        self.previous_result = Some(previous);
        self
    }
}

/// A consumer of process events, registered per event type.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: &ProcessEvent) -> Result<()>;
}

/// Fans events out to per-listener tasks.
#[derive(Debug, Default)]
pub struct EventPublisher {
    subscribers: DashMap<EventType, Vec<mpsc::UnboundedSender<Arc<ProcessEvent>>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sink` for `event_type`, spawning its drain task.
    ///
    /// A sink error is logged and its loop keeps running; a sink panic
    /// kills only the sink's own task.
    pub fn subscribe(&self, event_type: EventType, sink: Arc<dyn EventSink>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ProcessEvent>>();
        self.subscribers.entry(event_type).or_default().push(tx);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.on_event(&event).await {
                    warn!(
                        event_type = ?event.event_type,
                        service_id = %event.service_id,
                        error = %e,
                        "Event listener failed"
                    );
                }
            }
        });
    }

    /// Publishes `event` to every listener of its type.
    ///
    /// Non-blocking. With no listener registered the event is dropped.
    pub fn publish(&self, event: ProcessEvent) {
        counter!("module.events.published", 1);
        debug!(
            event_type = ?event.event_type,
            service_id = %event.service_id,
            chain_id = %event.chain_id,
            "Publishing process event"
        );

        let event = Arc::new(event);
        if let Some(mut listeners) = self.subscribers.get_mut(&event.event_type) {
            // Senders whose drain task is gone are pruned as we go.
            listeners.retain(|tx| tx.send(Arc::clone(&event)).is_ok());
        }
    }

    pub fn module_started(&self, service_id: &str, chain_id: &str, input: Value) {
        self.publish(
            ProcessEvent::new(EventType::ModuleStarted, service_id, chain_id)
                .result(input)
                .metadata("step", "started"),
        );
    }

    pub fn input_validated(&self, service_id: &str, chain_id: &str, validated: Value) {
        self.publish(
            ProcessEvent::new(EventType::InputValidated, service_id, chain_id)
                .result(validated)
                .metadata("step", "validation")
                .metadata("status", "success"),
        );
    }

    pub fn business_processed(
        &self,
        service_id: &str,
        chain_id: &str,
        result: Value,
        previous: Value,
        elapsed: Duration,
    ) {
        self.publish(
            ProcessEvent::new(EventType::BusinessProcessed, service_id, chain_id)
                .result(result)
                .previous_result(previous)
                .execution_time(elapsed)
                .metadata("step", "business_logic")
                .metadata("status", "success"),
        );
    }

    pub fn module_completed(
        &self,
        service_id: &str,
        chain_id: &str,
        result: Value,
        elapsed: Duration,
    ) {
        self.publish(
            ProcessEvent::new(EventType::ModuleCompleted, service_id, chain_id)
                .result(result)
                .execution_time(elapsed)
                .metadata("step", "completed")
                .metadata("status", "success"),
        );
    }

    pub fn module_error(&self, service_id: &str, chain_id: &str, error: &ModuleError) {
        self.publish(
            ProcessEvent::new(EventType::ModuleError, service_id, chain_id)
                .error(error)
                .metadata("step", "error")
                .metadata("status", "failed"),
        );
    }

    pub fn chain_completed(&self, chain_id: &str, result: &ChainResult, elapsed: Duration) {
        let payload = serde_json::to_value(result).unwrap_or(Value::Null);
        self.publish(
            ProcessEvent::new(EventType::ChainCompleted, "CHAIN", chain_id)
                .result(payload)
                .execution_time(elapsed)
                .metadata("step", "chain_completed")
                .metadata("status", if result.success { "success" } else { "failed" }),
        );
    }
}

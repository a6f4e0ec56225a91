//! # Chain Orchestrator
//!
//! Sequences module invocations as a flat pipeline of discrete steps,
//! replacing the deep linear call chains of the legacy routines. Each
//! step runs through the error interceptor so failures are classified
//! and counted, and every lifecycle transition is published as an event.
//!
//! The orchestrator always returns a [`ChainResult`]; a failure in a
//! required step aborts the remaining steps, a failure in an optional
//! step is recorded and skipped over.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::EventPublisher;
use crate::interceptor::ErrorInterceptor;
use crate::registry::{Record, ServiceRegistry};
use crate::types::{codes, ModuleError, Result};

/// One step of a chain. Static configuration, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub service_id: String,
    pub description: String,
    /// A required step aborts the chain on failure; an optional step is
    /// skipped over.
    pub required: bool,
}

impl ChainStep {
    pub fn required<S, D>(service_id: S, description: D) -> Self
    where
        S: Into<String>,
        D: Into<String>,
    {
        Self {
            service_id: service_id.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional<S, D>(service_id: S, description: D) -> Self
    where
        S: Into<String>,
        D: Into<String>,
    {
        Self {
            service_id: service_id.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// The outcome of one chain execution. Immutable; also the payload of
/// the chain-completed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResult {
    pub chain_id: String,
    /// True iff no failed step was required
    pub success: bool,
    /// Per-step outputs in step order; `None` marks a failed step
    pub step_results: Vec<Option<Value>>,
    pub executed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub total_execution_time_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Sequences module invocations with required/optional semantics.
pub struct ChainOrchestrator {
    registry: Arc<ServiceRegistry>,
    interceptor: Arc<ErrorInterceptor>,
    publisher: Arc<EventPublisher>,
}

impl ChainOrchestrator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        interceptor: Arc<ErrorInterceptor>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            registry,
            interceptor,
            publisher,
        }
    }

    /// Runs `steps` in order, threading each step's output into the next
    /// step's input. Never returns an error: the result captures both
    /// success and abortion.
    pub async fn execute_sequential_chain(
        &self,
        steps: &[ChainStep],
        initial_input: Record,
    ) -> ChainResult {
        let chain_id = generate_chain_id("SEQ-CHAIN");
        let start_time = Utc::now();
        let started = Instant::now();

        info!(
            chain_id = %chain_id,
            steps = %steps.len(),
            "Sequential chain started"
        );

        let mut step_results: Vec<Option<Value>> = Vec::with_capacity(steps.len());
        let mut executed_steps: Vec<String> = Vec::new();
        let mut failed_steps: Vec<String> = Vec::new();
        let mut aborted = false;
        let mut current_input = initial_input;

        for (index, step) in steps.iter().enumerate() {
            info!(
                chain_id = %chain_id,
                step = %(index + 1),
                total = %steps.len(),
                service_id = %step.service_id,
                description = %step.description,
                "Chain step running"
            );
            self.publisher.module_started(
                &step.service_id,
                &chain_id,
                Value::Object(current_input.clone()),
            );

            let step_started = Instant::now();
            match self.run_step(step, &current_input).await {
                Ok(output) => {
                    self.publisher.module_completed(
                        &step.service_id,
                        &chain_id,
                        output.clone(),
                        step_started.elapsed(),
                    );
                    executed_steps.push(step.service_id.clone());
                    // The step's output becomes the next step's input;
                    // this replaces the explicit parameter threading of
                    // the legacy call chain.
                    current_input = coerce_to_record(output.clone());
                    step_results.push(Some(output));
                }
                Err(step_error) => {
                    self.publisher
                        .module_error(&step.service_id, &chain_id, &step_error);
                    failed_steps.push(step.service_id.clone());
                    step_results.push(None);

                    if step.required {
                        error!(
                            chain_id = %chain_id,
                            service_id = %step.service_id,
                            code = %step_error.code,
                            "Required step failed, aborting chain"
                        );
                        aborted = true;
                        break;
                    }
                    warn!(
                        chain_id = %chain_id,
                        service_id = %step.service_id,
                        code = %step_error.code,
                        "Optional step failed, continuing"
                    );
                    // Optional failure: next step sees the input unchanged.
                }
            }
        }

        let elapsed = started.elapsed();
        let result = ChainResult {
            chain_id: chain_id.clone(),
            success: !aborted,
            step_results,
            executed_steps,
            failed_steps,
            total_execution_time_ms: elapsed.as_millis() as u64,
            start_time,
            end_time: Utc::now(),
        };

        self.publisher.chain_completed(&chain_id, &result, elapsed);
        info!(
            chain_id = %chain_id,
            success = %result.success,
            executed = %result.executed_steps.len(),
            failed = %result.failed_steps.len(),
            elapsed_ms = %result.total_execution_time_ms,
            "Sequential chain finished"
        );

        result
    }

    /// Runs independent, order-insensitive steps concurrently. Every
    /// step receives the same shared input; `step_results` follows input
    /// step order, not completion order; required/optional aggregation
    /// matches the sequential variant.
    pub async fn execute_parallel_chain(
        &self,
        steps: &[ChainStep],
        shared_input: Record,
    ) -> ChainResult {
        let chain_id = generate_chain_id("PAR-CHAIN");
        let start_time = Utc::now();
        let started = Instant::now();

        info!(
            chain_id = %chain_id,
            steps = %steps.len(),
            "Parallel chain started"
        );

        let outcomes = join_all(steps.iter().map(|step| {
            self.publisher.module_started(
                &step.service_id,
                &chain_id,
                Value::Object(shared_input.clone()),
            );
            let input = shared_input.clone();
            async move {
                let step_started = Instant::now();
                let outcome = self.run_step(step, &input).await;
                (step, step_started.elapsed(), outcome)
            }
        }))
        .await;

        let mut step_results: Vec<Option<Value>> = Vec::with_capacity(steps.len());
        let mut executed_steps: Vec<String> = Vec::new();
        let mut failed_steps: Vec<String> = Vec::new();
        let mut required_failure = false;

        for (step, step_elapsed, outcome) in outcomes {
            match outcome {
                Ok(output) => {
                    self.publisher.module_completed(
                        &step.service_id,
                        &chain_id,
                        output.clone(),
                        step_elapsed,
                    );
                    executed_steps.push(step.service_id.clone());
                    step_results.push(Some(output));
                }
                Err(step_error) => {
                    self.publisher
                        .module_error(&step.service_id, &chain_id, &step_error);
                    failed_steps.push(step.service_id.clone());
                    step_results.push(None);
                    if step.required {
                        required_failure = true;
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        let result = ChainResult {
            chain_id: chain_id.clone(),
            success: !required_failure,
            step_results,
            executed_steps,
            failed_steps,
            total_execution_time_ms: elapsed.as_millis() as u64,
            start_time,
            end_time: Utc::now(),
        };

        self.publisher.chain_completed(&chain_id, &result, elapsed);
        info!(
            chain_id = %chain_id,
            success = %result.success,
            executed = %result.executed_steps.len(),
            failed = %result.failed_steps.len(),
            elapsed_ms = %result.total_execution_time_ms,
            "Parallel chain finished"
        );

        result
    }

    /// One step through the interceptor: resolution and invocation both
    /// count against the step's module id.
    async fn run_step(&self, step: &ChainStep, input: &Record) -> Result<Value> {
        let registry = Arc::clone(&self.registry);
        let service_id = step.service_id.clone();
        let input = input.clone();
        let snapshot = Value::Object(input.clone());

        self.interceptor
            .execute(
                &step.service_id,
                move || async move {
                    let service = registry.get(&service_id).ok_or_else(|| {
                        Box::new(
                            ModuleError::business_logic(
                                service_id.clone(),
                                codes::SERVICE_NOT_FOUND,
                                format!("no module service registered for '{}'", service_id),
                            )
                            .phase(crate::types::ErrorPhase::SystemInternal),
                        ) as crate::types::BoxError
                    })?;
                    service.process(&input).await
                },
                Some(snapshot),
            )
            .await
    }
}

/// Generates a chain identifier like `SEQ-CHAIN-1a2b3c4d`.
fn generate_chain_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &uuid[..8])
}

/// Coerces a step output into the keyed mapping the next step consumes.
/// Non-mapping outputs are wrapped under a `result` key.
fn coerce_to_record(value: Value) -> Record {
    match value {
        Value::Object(record) => record,
        other => {
            let mut record = Record::new();
            record.insert("result".to_string(), other);
            record
        }
    }
}

//! # Error Interceptor
//!
//! Wraps module invocations: classifies failures, keeps per-module and
//! overall error statistics, retries recoverable failures with a capped
//! linear backoff, and forwards alert-worthy failures to the alert path.
//!
//! The interceptor observes and records; it never suppresses a failure
//! and never fabricates a success.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::logging::log_module_error;
use crate::types::{BoxError, ErrorPhase, ModuleError, Result, Severity};

/// Upper bound on a single retry backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_millis(5000);

/// Backoff step per attempt number.
const BACKOFF_STEP: Duration = Duration::from_millis(1000);

/// Per-module error counters. Updated concurrently, lock free.
#[derive(Debug, Default)]
pub struct ModuleErrorStats {
    input_validation_errors: AtomicU64,
    business_logic_errors: AtomicU64,
    database_errors: AtomicU64,
    external_api_errors: AtomicU64,
    system_errors: AtomicU64,
    critical_errors: AtomicU64,
    recovered_errors: AtomicU64,
}

impl ModuleErrorStats {
    fn record(&self, error: &ModuleError) {
        let counter = match error.phase {
            ErrorPhase::InputValidation => &self.input_validation_errors,
            ErrorPhase::BusinessLogic => &self.business_logic_errors,
            ErrorPhase::DatabaseAccess => &self.database_errors,
            ErrorPhase::ExternalApi => &self.external_api_errors,
            ErrorPhase::OutputProcessing | ErrorPhase::SystemInternal => &self.system_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if error.severity == Severity::Critical {
            self.critical_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_recovery(&self) {
        self.recovered_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of the counters.
    pub fn snapshot(&self) -> ModuleStatsSnapshot {
        let input_validation_errors = self.input_validation_errors.load(Ordering::Relaxed);
        let business_logic_errors = self.business_logic_errors.load(Ordering::Relaxed);
        let database_errors = self.database_errors.load(Ordering::Relaxed);
        let external_api_errors = self.external_api_errors.load(Ordering::Relaxed);
        let system_errors = self.system_errors.load(Ordering::Relaxed);

        ModuleStatsSnapshot {
            input_validation_errors,
            business_logic_errors,
            database_errors,
            external_api_errors,
            system_errors,
            critical_errors: self.critical_errors.load(Ordering::Relaxed),
            recovered_errors: self.recovered_errors.load(Ordering::Relaxed),
            total_errors: input_validation_errors
                + business_logic_errors
                + database_errors
                + external_api_errors
                + system_errors,
        }
    }
}

/// Immutable view of one module's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStatsSnapshot {
    pub input_validation_errors: u64,
    pub business_logic_errors: u64,
    pub database_errors: u64,
    pub external_api_errors: u64,
    pub system_errors: u64,
    pub critical_errors: u64,
    pub recovered_errors: u64,
    pub total_errors: u64,
}

/// Immutable process-wide view for the monitor and operator tooling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OverallStatsSnapshot {
    pub total_errors: u64,
    pub total_recovered: u64,
    pub module_count: usize,
    pub modules: BTreeMap<String, ModuleStatsSnapshot>,
}

/// Wraps module operations with classification, statistics and retry.
#[derive(Debug)]
pub struct ErrorInterceptor {
    classifier: Classifier,
    module_stats: DashMap<String, Arc<ModuleErrorStats>>,
    total_errors: AtomicU64,
    total_recovered: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Default for ErrorInterceptor {
    fn default() -> Self {
        Self::new(Classifier::default())
    }
}

static GLOBAL: Lazy<Arc<ErrorInterceptor>> = Lazy::new(|| Arc::new(ErrorInterceptor::default()));

/// The process-wide interceptor, created lazily on first use.
pub fn global() -> Arc<ErrorInterceptor> {
    Arc::clone(&GLOBAL)
}

impl ErrorInterceptor {
    pub fn new(classifier: Classifier) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            classifier,
            module_stats: DashMap::new(),
            total_errors: AtomicU64::new(0),
            total_recovered: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Invokes `operation` for `module_id`, recording nothing on success.
    ///
    /// On failure the error is classified, counted, logged at the level
    /// its severity implies, alerted if required, and returned to the
    /// caller.
    pub async fn execute<T, F, Fut>(
        &self,
        module_id: &str,
        operation: F,
        input_snapshot: Option<serde_json::Value>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        debug!(module_id = %module_id, "Module execution started");
        match operation().await {
            Ok(result) => {
                debug!(module_id = %module_id, "Module execution succeeded");
                Ok(result)
            }
            Err(failure) => Err(self.record_failure(module_id, failure, input_snapshot)),
        }
    }

    /// Like [`execute`](Self::execute), but retries retryable failures.
    ///
    /// Attempt `n` sleeps `min(1000ms * n, 5000ms)` before re-invoking, at
    /// most `max_retries` retries (so `max_retries + 1` invocations). A
    /// non-retryable failure propagates after a single attempt. Every
    /// failed attempt is counted; a retry that subsequently succeeds bumps
    /// the recovered counters. A shutdown signalled during the backoff
    /// sleep surfaces as a system-internal error, never a silent abort.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        module_id: &str,
        operation: F,
        input_snapshot: Option<serde_json::Value>,
        max_retries: usize,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let mut attempt: usize = 0;

        loop {
            match self
                .execute(module_id, &operation, input_snapshot.clone())
                .await
            {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            module_id = %module_id,
                            attempt = %attempt,
                            "Module recovered after retry"
                        );
                        self.record_recovery(module_id);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt >= max_retries {
                        if attempt > 0 {
                            error!(
                                module_id = %module_id,
                                attempts = %(attempt + 1),
                                code = %error.code,
                                "Giving up after retries"
                            );
                        }
                        return Err(error);
                    }

                    attempt += 1;
                    let backoff = BACKOFF_STEP
                        .saturating_mul(attempt as u32)
                        .min(MAX_BACKOFF);
                    warn!(
                        module_id = %module_id,
                        attempt = %attempt,
                        max_retries = %max_retries,
                        backoff_ms = %backoff.as_millis(),
                        code = %error.code,
                        "Retryable failure, backing off"
                    );
                    counter!("module.retries", 1);

                    let mut shutdown = self.shutdown_rx.clone();
                    if *shutdown.borrow() {
                        return Err(ModuleError::system(
                            module_id,
                            "retry backoff interrupted by shutdown",
                        ));
                    }
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = shutdown.changed() => {
                            return Err(ModuleError::system(
                                module_id,
                                "retry backoff interrupted by shutdown",
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Signals every in-flight retry backoff to abort.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn record_failure(
        &self,
        module_id: &str,
        failure: BoxError,
        input_snapshot: Option<serde_json::Value>,
    ) -> ModuleError {
        let error = self.classifier.classify(module_id, failure, input_snapshot);

        self.total_errors.fetch_add(1, Ordering::Relaxed);
        let stats = self
            .module_stats
            .entry(error.module_id.clone())
            .or_insert_with(|| Arc::new(ModuleErrorStats::default()))
            .clone();
        stats.record(&error);

        counter!("module.errors", 1);
        log_module_error(&error);

        if error.requires_immediate_alert() {
            self.trigger_immediate_alert(&error);
        }

        error
    }

    fn record_recovery(&self, module_id: &str) {
        self.total_recovered.fetch_add(1, Ordering::Relaxed);
        if let Some(stats) = self.module_stats.get(module_id) {
            stats.record_recovery();
        }
        counter!("module.errors.recovered", 1);
    }

    fn trigger_immediate_alert(&self, error: &ModuleError) {
        // The alert path is the operations channel; wire an external
        // notifier by subscribing to the log/metrics stream.
        error!(
            module_id = %error.module_id,
            code = %error.code,
            phase = %error.phase,
            severity = %error.severity,
            alert = true,
            "IMMEDIATE ALERT: {}",
            error.message
        );
        counter!("module.alerts.immediate", 1);
    }

    /// Snapshot of one module's counters; zeroed if the module has never
    /// failed.
    pub fn module_stats(&self, module_id: &str) -> ModuleStatsSnapshot {
        self.module_stats
            .get(module_id)
            .map(|stats| stats.snapshot())
            .unwrap_or_default()
    }

    /// Process-wide snapshot across all modules.
    pub fn overall_stats(&self) -> OverallStatsSnapshot {
        let modules: BTreeMap<String, ModuleStatsSnapshot> = self
            .module_stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();

        OverallStatsSnapshot {
            total_errors: self.total_errors.load(Ordering::Relaxed),
            total_recovered: self.total_recovered.load(Ordering::Relaxed),
            module_count: modules.len(),
            modules,
        }
    }

    /// Clears all statistics. Operator action only; resetting without
    /// archiving loses history, so nothing calls this automatically.
    pub fn reset_stats(&self) {
        self.module_stats.clear();
        self.total_errors.store(0, Ordering::Relaxed);
        self.total_recovered.store(0, Ordering::Relaxed);
        info!("Error statistics reset");
    }
}

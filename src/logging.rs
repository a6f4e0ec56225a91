//! # Structured Logging
//!
//! Logging initialization plus correlation-id tracking, and the
//! severity-to-level mapping used whenever a classified module error is
//! logged.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::{fmt, EnvFilter, Registry};
use uuid::Uuid;

use crate::types::{ModuleError, Result, Severity};

thread_local! {
    static CORRELATION_ID: RefCell<Option<String>> = RefCell::new(None);
}

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to output logs to a daily-rolled file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "module-chain".to_string(),
            file_output: false,
            log_dir: None,
            json_format: true,
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }

        Ok(base)
    }
}

/// Initializes the structured logging system. Idempotent.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", config.level)));

    // JSON and text produce different layer types; box them so one
    // subscriber shape covers both configurations.
    let fmt_layer = if config.json_format {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    };

    let file_layer = match (&config.log_dir, config.file_output) {
        (Some(log_dir), true) => {
            let file_appender = RollingFileAppender::new(
                tracing_appender::rolling::Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (non_blocking, guard) = NonBlocking::new(file_appender);

            // The guard must outlive the subscriber for logs to flush.
            Box::leak(Box::new(guard));

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        _ => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        ModuleError::system(
            "logging",
            format!("failed to set global subscriber: {}", e),
        )
    })?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Sets the correlation ID for the current thread
pub fn set_correlation_id<S: Into<String>>(correlation_id: S) {
    CORRELATION_ID.with(|id| {
        *id.borrow_mut() = Some(correlation_id.into());
    });
}

/// Generates and sets a new correlation ID
pub fn generate_correlation_id() -> String {
    let id = Uuid::new_v4().to_string();
    set_correlation_id(id.clone());
    id
}

/// Retrieves the current correlation ID
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.with(|id| id.borrow().clone())
}

/// Clears the correlation ID for the current thread
pub fn clear_correlation_id() {
    CORRELATION_ID.with(|id| {
        *id.borrow_mut() = None;
    });
}

/// Executes a function with a specific correlation ID, restoring the
/// previous one afterwards.
pub fn with_correlation_id<F, R, S>(correlation_id: S, f: F) -> R
where
    F: FnOnce() -> R,
    S: Into<String>,
{
    let previous = current_correlation_id();
    set_correlation_id(correlation_id);
    let result = f();
    match previous {
        Some(id) => set_correlation_id(id),
        None => clear_correlation_id(),
    }
    result
}

/// Logs a classified module error at the level its severity implies.
pub fn log_module_error(module_error: &ModuleError) {
    let correlation_id = module_error
        .correlation_id
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    match module_error.severity {
        Severity::Critical => {
            error!(
                module_id = %module_error.module_id,
                code = %module_error.code,
                phase = %module_error.phase,
                severity = %module_error.severity,
                recoverable = %module_error.recoverable,
                correlation_id = %correlation_id,
                input_snapshot = ?module_error.input_snapshot,
                "Critical module error: {}",
                module_error.message
            );
        }
        Severity::Error => {
            error!(
                module_id = %module_error.module_id,
                code = %module_error.code,
                phase = %module_error.phase,
                severity = %module_error.severity,
                recoverable = %module_error.recoverable,
                correlation_id = %correlation_id,
                "Module error: {}",
                module_error.message
            );
        }
        Severity::Warn => {
            warn!(
                module_id = %module_error.module_id,
                code = %module_error.code,
                phase = %module_error.phase,
                correlation_id = %correlation_id,
                "Module warning: {}",
                module_error.message
            );
        }
        Severity::Info => {
            info!(
                module_id = %module_error.module_id,
                code = %module_error.code,
                phase = %module_error.phase,
                correlation_id = %correlation_id,
                "Module notice: {}",
                module_error.message
            );
        }
    }
}

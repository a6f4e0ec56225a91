//! # Module Chain Framework
//!
//! Error classification, interception, and chain orchestration for
//! module-based service pipelines, with standardized error types,
//! per-module statistics, threshold monitoring, and lifecycle events.
//!
//! ## Features
//!
//! - Standardized module errors with phase, severity, and recoverability
//! - Token-based classification of raw failures into module errors
//! - Interception of module operations with statistics and retry
//! - Periodic error reports, trend analysis, and threshold alerting
//! - Lifecycle event publishing with pluggable listeners
//! - Sequential and parallel chain orchestration over a service registry
//!

pub mod types;
pub mod classifier;
pub mod interceptor;
pub mod monitor;
pub mod events;
pub mod registry;
pub mod chain;
pub mod logging;

// Re-export commonly used types
pub use types::{codes, BoxError, ErrorPhase, InvalidInput, ModuleError, Result, Severity};
pub use classifier::{ClassificationRule, Classifier};
pub use interceptor::{ErrorInterceptor, ModuleStatsSnapshot, OverallStatsSnapshot};
pub use monitor::{ErrorMonitor, ModuleErrorAnalysis, MonitorConfig, MonitorHandle, ThresholdAlert};
pub use events::{EventPublisher, EventSink, EventType, ProcessEvent};
pub use registry::{ModuleService, Record, ServiceRegistry};
pub use chain::{ChainOrchestrator, ChainResult, ChainStep};
pub use logging::{
    clear_correlation_id, current_correlation_id, generate_correlation_id, init_logging,
    set_correlation_id, with_correlation_id,
};

/// Initializes the framework with default settings
pub fn init() -> Result<()> {
    init_logging(None)?;
    Ok(())
}

/// Initializes the framework with custom settings
pub fn init_with_config(config: config::Config) -> Result<()> {
    let log_config = config.try_into().ok();
    init_logging(log_config)?;
    Ok(())
}

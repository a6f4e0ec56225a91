//! # Module Error Types
//!
//! Structured representation of a classified module failure, together with
//! the closed error-code taxonomy shared by every module service.

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A type alias for Result with the error type defaulting to [`ModuleError`]
pub type Result<T, E = ModuleError> = std::result::Result<T, E>;

/// Boxed failure produced by a module operation before classification.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Error codes shared across modules.
///
/// The five taxonomy codes are closed; domain codes (customer, timeout,
/// network) extend them per module without changing classification rules.
pub mod codes {
    pub const SUCCESS: &str = "SUCCESS";
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    pub const INVALID_PARAMETER: &str = "INVALID_PARAMETER";
    pub const BUSINESS_RULE_VIOLATION: &str = "BUSINESS_RULE_VIOLATION";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const EXTERNAL_API_ERROR: &str = "EXTERNAL_API_ERROR";

    pub const CUSTOMER_NOT_FOUND: &str = "CUSTOMER_NOT_FOUND";
    pub const SERVICE_NOT_FOUND: &str = "SERVICE_NOT_FOUND";
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// The pipeline stage at which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorPhase {
    /// Caller input failed validation
    InputValidation,
    /// A business rule rejected the request
    BusinessLogic,
    /// Storage access failed
    DatabaseAccess,
    /// An external call failed
    ExternalApi,
    /// Output assembly or conversion failed
    OutputProcessing,
    /// Anything the other phases do not cover
    SystemInternal,
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPhase::InputValidation => write!(f, "INPUT_VALIDATION"),
            ErrorPhase::BusinessLogic => write!(f, "BUSINESS_LOGIC"),
            ErrorPhase::DatabaseAccess => write!(f, "DATABASE_ACCESS"),
            ErrorPhase::ExternalApi => write!(f, "EXTERNAL_API"),
            ErrorPhase::OutputProcessing => write!(f, "OUTPUT_PROCESSING"),
            ErrorPhase::SystemInternal => write!(f, "SYSTEM_INTERNAL"),
        }
    }
}

/// Operational urgency of a failure, independent of its root cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Log only
    Info,
    /// Worth watching
    Warn,
    /// Needs handling
    Error,
    /// Needs an operator now
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Error
    }
}

/// A classified module failure.
///
/// Created once at the point of classification and immutable afterwards.
/// The taxonomy `code`, the `phase` and the `severity` are independent
/// axes: the same code can carry different severities when a module
/// classifies explicitly instead of relying on automatic inference.
///
/// Note: `Clone` is implemented manually so that cloned errors drop the
/// opaque `cause`, which is only meaningful at the original creation site.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleError {
    /// Code from the error taxonomy (see [`codes`])
    pub code: String,
    /// Identifier of the module that failed
    pub module_id: String,
    /// Detailed error message
    pub message: String,
    /// Pipeline stage at which the failure occurred
    pub phase: ErrorPhase,
    /// Operational urgency
    pub severity: Severity,
    /// Whether retrying the same operation could succeed
    pub recoverable: bool,
    /// The input that triggered the failure, for diagnostics only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_snapshot: Option<serde_json::Value>,
    /// Correlation ID for request tracing
    pub correlation_id: Option<String>,
    /// When the failure was classified
    pub timestamp: DateTime<Utc>,
    /// Wrapped underlying failure (not serialized)
    #[serde(skip)]
    pub cause: Option<BoxError>,
}

impl Clone for ModuleError {
    fn clone(&self) -> Self {
        Self {
            code: self.code.clone(),
            module_id: self.module_id.clone(),
            message: self.message.clone(),
            phase: self.phase,
            severity: self.severity,
            recoverable: self.recoverable,
            input_snapshot: self.input_snapshot.clone(),
            correlation_id: self.correlation_id.clone(),
            timestamp: self.timestamp,
            cause: None,
        }
    }
}

impl ModuleError {
    /// Creates a new error with the given code, module and message.
    ///
    /// Defaults match an unqualified failure: system-internal phase,
    /// ERROR severity, not recoverable.
    pub fn new<C, M, S>(code: C, module_id: M, message: S) -> Self
    where
        C: Into<String>,
        M: Into<String>,
        S: Into<String>,
    {
        Self {
            code: code.into(),
            module_id: module_id.into(),
            message: message.into(),
            phase: ErrorPhase::SystemInternal,
            severity: Severity::default(),
            recoverable: false,
            input_snapshot: None,
            correlation_id: crate::logging::current_correlation_id(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Sets the phase
    pub fn phase(mut self, phase: ErrorPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Sets the severity
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets whether a retry could succeed
    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Attaches the input that triggered the failure
    pub fn input_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.input_snapshot = Some(snapshot);
        self
    }

    /// Chains this error with its underlying cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.cause = Some(cause.into());
        self
    }

    /// An input-validation failure: recoverable by fixing the input.
    pub fn input_validation<M, S>(module_id: M, message: S) -> Self
    where
        M: Into<String>,
        S: Into<String>,
    {
        Self::new(codes::INVALID_PARAMETER, module_id, message)
            .phase(ErrorPhase::InputValidation)
            .severity(Severity::Warn)
            .recoverable(true)
    }

    /// A business-rule failure with a module-chosen code.
    pub fn business_logic<M, C, S>(module_id: M, code: C, message: S) -> Self
    where
        M: Into<String>,
        C: Into<String>,
        S: Into<String>,
    {
        Self::new(code, module_id, message)
            .phase(ErrorPhase::BusinessLogic)
            .severity(Severity::Error)
            .recoverable(false)
    }

    /// A storage failure: critical, but a retry may succeed.
    pub fn database<M, S>(module_id: M, message: S) -> Self
    where
        M: Into<String>,
        S: Into<String>,
    {
        Self::new(codes::DATABASE_ERROR, module_id, message)
            .phase(ErrorPhase::DatabaseAccess)
            .severity(Severity::Critical)
            .recoverable(true)
    }

    /// An external-call failure: a retry may succeed.
    pub fn external_api<M, S>(module_id: M, message: S) -> Self
    where
        M: Into<String>,
        S: Into<String>,
    {
        Self::new(codes::EXTERNAL_API_ERROR, module_id, message)
            .phase(ErrorPhase::ExternalApi)
            .severity(Severity::Error)
            .recoverable(true)
    }

    /// A system-internal failure: critical and not recoverable.
    pub fn system<M, S>(module_id: M, message: S) -> Self
    where
        M: Into<String>,
        S: Into<String>,
    {
        Self::new(codes::UNKNOWN_ERROR, module_id, message)
            .phase(ErrorPhase::SystemInternal)
            .severity(Severity::Critical)
            .recoverable(false)
    }

    /// Whether a retry of the same operation is worth attempting.
    ///
    /// Only storage and external-call failures are retried; everything
    /// else fails the same way on a second attempt.
    pub fn is_retryable(&self) -> bool {
        self.recoverable
            && matches!(
                self.phase,
                ErrorPhase::DatabaseAccess | ErrorPhase::ExternalApi
            )
    }

    /// Whether this failure must reach an operator immediately.
    pub fn requires_immediate_alert(&self) -> bool {
        self.severity == Severity::Critical
            || (self.severity == Severity::Error && !self.recoverable)
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} in {} ({}): {}",
            self.severity, self.code, self.module_id, self.phase, self.message
        )?;

        if let Some(correlation_id) = &self.correlation_id {
            write!(f, " [CorrelationID: {}]", correlation_id)?;
        }

        Ok(())
    }
}

impl StdError for ModuleError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// The dedicated bad-argument failure a module raises when caller input
/// is invalid. The classifier maps it to `INVALID_PARAMETER` without any
/// token sniffing.
#[derive(Debug, Clone)]
pub struct InvalidInput {
    pub message: String,
}

impl InvalidInput {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid input: {}", self.message)
    }
}

impl StdError for InvalidInput {}

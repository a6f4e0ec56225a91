//! # Error Classifier
//!
//! Maps an arbitrary failure into the fixed [`ModuleError`] taxonomy.
//!
//! Classification is an ordered list of predicate rules evaluated first
//! match wins. The token rules approximate failure provenance from the
//! failure's type name and message, which retrofits typed error handling
//! onto modules that previously raised ad hoc errors.

use std::error::Error as StdError;

use tracing::debug;

use crate::types::{codes, BoxError, ErrorPhase, InvalidInput, ModuleError, Severity};

/// One token rule: if any token appears in the case-folded type name or
/// message of the failure (including its source chain), the rule's
/// classification applies.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub name: &'static str,
    pub tokens: Vec<&'static str>,
    pub code: &'static str,
    pub phase: ErrorPhase,
    pub severity: Severity,
    pub recoverable: bool,
}

impl ClassificationRule {
    fn matches(&self, failure_text: &str) -> bool {
        self.tokens.iter().any(|token| failure_text.contains(token))
    }
}

/// Classifies arbitrary failures into [`ModuleError`] records.
///
/// Pure: classification never logs to statistics or alerts; the
/// interceptor owns those side effects.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: vec![database_rule(), external_api_rule()],
        }
    }
}

/// Storage-related failures. Critical, but the connection may come back.
pub fn database_rule() -> ClassificationRule {
    ClassificationRule {
        name: "database",
        tokens: vec!["sql", "database", "connection"],
        code: codes::DATABASE_ERROR,
        phase: ErrorPhase::DatabaseAccess,
        severity: Severity::Critical,
        recoverable: true,
    }
}

/// External-call failures. Retry may succeed once the remote recovers.
pub fn external_api_rule() -> ClassificationRule {
    ClassificationRule {
        name: "external_api",
        tokens: vec![
            "http",
            "rest",
            "client",
            "timeout",
            "api",
            "service unavailable",
        ],
        code: codes::EXTERNAL_API_ERROR,
        phase: ErrorPhase::ExternalApi,
        severity: Severity::Error,
        recoverable: true,
    }
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Appends a recognized failure category after the existing rules.
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Classifies `failure` for `module_id`.
    ///
    /// A failure that is already a [`ModuleError`] is returned unchanged:
    /// it is assumed to be fully classified upstream. A module that sets
    /// only a code and leaves phase/severity at their defaults is NOT
    /// re-inferred here; that is a documented precondition of manual
    /// classification, not something this function papers over.
    pub fn classify(
        &self,
        module_id: &str,
        failure: BoxError,
        input_snapshot: Option<serde_json::Value>,
    ) -> ModuleError {
        // Idempotence: already classified upstream.
        let failure = match failure.downcast::<ModuleError>() {
            Ok(already_classified) => return *already_classified,
            Err(other) => other,
        };

        // The dedicated bad-argument condition.
        let failure = match failure.downcast::<InvalidInput>() {
            Ok(invalid) => {
                let mut error = ModuleError::input_validation(module_id, invalid.message.clone())
                    .cause(*invalid);
                error.input_snapshot = input_snapshot;
                return error;
            }
            Err(other) => other,
        };

        let message = failure.to_string();
        let text = failure_text(failure.as_ref());

        for rule in &self.rules {
            if rule.matches(&text) {
                debug!(
                    module_id = %module_id,
                    rule = %rule.name,
                    code = %rule.code,
                    "Classified failure by token rule"
                );
                let mut error = ModuleError::new(rule.code, module_id, message)
                    .phase(rule.phase)
                    .severity(rule.severity)
                    .recoverable(rule.recoverable)
                    .cause(failure);
                error.input_snapshot = input_snapshot;
                return error;
            }
        }

        // Nothing matched: treat as a system-internal failure.
        let mut error = ModuleError::system(module_id, message).cause(failure);
        error.input_snapshot = input_snapshot;
        error
    }
}

/// Renders the failure and its whole source chain as one lowercase string
/// for token matching. The debug rendering carries the concrete type name,
/// so a `SqlPoolError` matches the database rule even when its message
/// mentions no token.
fn failure_text(failure: &(dyn StdError + 'static)) -> String {
    let mut text = format!("{:?} {}", failure, failure);
    let mut source = failure.source();
    while let Some(cause) = source {
        text.push(' ');
        text.push_str(&format!("{:?} {}", cause, cause));
        source = cause.source();
    }
    text.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct PlainError(String);

    impl fmt::Display for PlainError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl StdError for PlainError {}

    fn boxed(message: &str) -> BoxError {
        Box::new(PlainError(message.to_string()))
    }

    #[test]
    fn test_database_tokens() {
        let classifier = Classifier::default();
        for message in ["SQL syntax error", "Database is down", "Connection refused"] {
            let err = classifier.classify("vm0002", boxed(message), None);
            assert_eq!(err.code, codes::DATABASE_ERROR, "message: {message}");
            assert_eq!(err.phase, ErrorPhase::DatabaseAccess);
            assert_eq!(err.severity, Severity::Critical);
            assert!(err.recoverable);
        }
    }

    #[test]
    fn test_external_api_tokens() {
        let classifier = Classifier::default();
        let err = classifier.classify("vm0003", boxed("HTTP 503 Service Unavailable"), None);
        assert_eq!(err.code, codes::EXTERNAL_API_ERROR);
        assert_eq!(err.phase, ErrorPhase::ExternalApi);
        assert_eq!(err.severity, Severity::Error);
        assert!(err.recoverable);

        let err = classifier.classify("vm0003", boxed("read timeout after 30s"), None);
        assert_eq!(err.code, codes::EXTERNAL_API_ERROR);
    }

    #[test]
    fn test_idempotent_on_module_error() {
        let classifier = Classifier::default();
        // A message full of database tokens must not override the manual
        // classification carried by the ModuleError itself.
        let original =
            ModuleError::business_logic("vm0001", codes::CUSTOMER_NOT_FOUND, "sql connection");
        let reclassified = classifier.classify("other-module", Box::new(original.clone()), None);
        assert_eq!(reclassified.code, codes::CUSTOMER_NOT_FOUND);
        assert_eq!(reclassified.module_id, "vm0001");
        assert_eq!(reclassified.phase, ErrorPhase::BusinessLogic);
    }

    #[test]
    fn test_invalid_input_downcast() {
        let classifier = Classifier::default();
        let err = classifier.classify(
            "vm0001",
            Box::new(InvalidInput::new("customerId must be 10 characters")),
            Some(serde_json::json!({"customerId": "SHORT"})),
        );
        assert_eq!(err.code, codes::INVALID_PARAMETER);
        assert_eq!(err.phase, ErrorPhase::InputValidation);
        assert_eq!(err.severity, Severity::Warn);
        assert!(err.recoverable);
        assert!(err.input_snapshot.is_some());
    }

    #[test]
    fn test_unmatched_falls_back_to_system() {
        let classifier = Classifier::default();
        let err = classifier.classify("vm0009", boxed("something exploded"), None);
        assert_eq!(err.code, codes::UNKNOWN_ERROR);
        assert_eq!(err.phase, ErrorPhase::SystemInternal);
        assert_eq!(err.severity, Severity::Critical);
        assert!(!err.recoverable);
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_type_name_carries_tokens() {
        #[derive(Debug)]
        struct SqlPoolError;
        impl fmt::Display for SqlPoolError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "resource exhausted")
            }
        }
        impl StdError for SqlPoolError {}

        #[derive(Debug)]
        struct HttpClientError;
        impl fmt::Display for HttpClientError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "remote rejected the request")
            }
        }
        impl StdError for HttpClientError {}

        let classifier = Classifier::default();

        // The message has no token; the type name alone must classify.
        let err = classifier.classify("vm0002", Box::new(SqlPoolError), None);
        assert_eq!(err.code, codes::DATABASE_ERROR);
        assert_eq!(err.phase, ErrorPhase::DatabaseAccess);
        assert_eq!(err.severity, Severity::Critical);
        assert!(err.recoverable);

        let err = classifier.classify("vm0003", Box::new(HttpClientError), None);
        assert_eq!(err.code, codes::EXTERNAL_API_ERROR);
        assert_eq!(err.phase, ErrorPhase::ExternalApi);
    }

    #[test]
    fn test_source_chain_is_inspected() {
        #[derive(Debug)]
        struct Outer(PlainError);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "step failed")
            }
        }
        impl StdError for Outer {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        let classifier = Classifier::default();
        let err = classifier.classify(
            "vm0002",
            Box::new(Outer(PlainError("connection reset by peer".into()))),
            None,
        );
        assert_eq!(err.code, codes::DATABASE_ERROR);
    }

    #[test]
    fn test_rule_order_first_match_wins() {
        // A custom rule in front of the defaults claims "timeout" before
        // the external-api rule sees it.
        let custom = ClassificationRule {
            name: "slow_batch",
            tokens: vec!["timeout"],
            code: codes::TIMEOUT_ERROR,
            phase: ErrorPhase::OutputProcessing,
            severity: Severity::Warn,
            recoverable: false,
        };
        let mut rules = vec![custom];
        rules.extend([database_rule(), external_api_rule()]);
        let classifier = Classifier::new(rules);

        let err = classifier.classify("vm0004", boxed("timeout writing report"), None);
        assert_eq!(err.code, codes::TIMEOUT_ERROR);
        assert_eq!(err.phase, ErrorPhase::OutputProcessing);
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use module_chain::{
    codes, BoxError, ChainOrchestrator, ChainStep, ErrorInterceptor, ErrorPhase, EventPublisher,
    EventSink, EventType, InvalidInput, ModuleError, ModuleService, ProcessEvent, Record, Result,
    ServiceRegistry, Severity,
};

/// End-to-end customer lookup pipeline:
///
///   vm0001 (validate) -> vm0002 (lookup) -> vm0003 (format)
///
/// exercised through the orchestrator with a live interceptor and event
/// publisher, asserting classification, statistics, and event flow for
/// the success path, a validation failure, and a not-found lookup.

struct ValidateCustomerId;

#[async_trait]
impl ModuleService for ValidateCustomerId {
    fn service_id(&self) -> &str {
        "vm0001"
    }

    fn description(&self) -> String {
        "Validates the customer id format".to_string()
    }

    async fn process(&self, input: &Record) -> std::result::Result<Value, BoxError> {
        let customer_id = input
            .get("customerId")
            .and_then(Value::as_str)
            .ok_or_else(|| Box::new(InvalidInput::new("customerId is missing")) as BoxError)?;

        if customer_id.len() != 10 {
            return Err(Box::new(InvalidInput::new(format!(
                "customerId must be 10 characters, got {}",
                customer_id.len()
            ))));
        }

        Ok(json!({ "customerId": customer_id, "validated": true }))
    }
}

struct LookupCustomer;

#[async_trait]
impl ModuleService for LookupCustomer {
    fn service_id(&self) -> &str {
        "vm0002"
    }

    fn description(&self) -> String {
        "Loads the customer record".to_string()
    }

    async fn process(&self, input: &Record) -> std::result::Result<Value, BoxError> {
        let customer_id = input
            .get("customerId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if customer_id == "NOTFOUND01" {
            return Err(Box::new(
                ModuleError::business_logic(
                    "vm0002",
                    codes::CUSTOMER_NOT_FOUND,
                    format!("no customer with id {}", customer_id),
                )
                .input_snapshot(Value::Object(input.clone())),
            ));
        }

        Ok(json!({
            "customerId": customer_id,
            "name": "Watanabe Ichiro",
            "balance": 1_250_000,
        }))
    }
}

struct FormatCustomer;

#[async_trait]
impl ModuleService for FormatCustomer {
    fn service_id(&self) -> &str {
        "vm0003"
    }

    fn description(&self) -> String {
        "Formats the customer record for output".to_string()
    }

    async fn process(&self, input: &Record) -> std::result::Result<Value, BoxError> {
        let name = input.get("name").and_then(Value::as_str).unwrap_or("?");
        let customer_id = input
            .get("customerId")
            .and_then(Value::as_str)
            .unwrap_or("?");
        Ok(json!({ "summary": format!("{} ({})", name, customer_id) }))
    }
}

/// Collects every delivered event for later inspection.
#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<ProcessEvent>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn on_event(&self, event: &ProcessEvent) -> Result<()> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

impl RecordingSink {
    fn events(&self) -> Vec<ProcessEvent> {
        self.seen.lock().unwrap().clone()
    }
}

struct Pipeline {
    orchestrator: ChainOrchestrator,
    interceptor: Arc<ErrorInterceptor>,
    errors: Arc<RecordingSink>,
    completions: Arc<RecordingSink>,
}

fn pipeline() -> Pipeline {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(Arc::new(ValidateCustomerId));
    registry.register(Arc::new(LookupCustomer));
    registry.register(Arc::new(FormatCustomer));

    let interceptor = Arc::new(ErrorInterceptor::default());
    let publisher = Arc::new(EventPublisher::new());

    let errors = Arc::new(RecordingSink::default());
    publisher.subscribe(EventType::ModuleError, Arc::clone(&errors) as Arc<dyn EventSink>);

    let completions = Arc::new(RecordingSink::default());
    publisher.subscribe(
        EventType::ChainCompleted,
        Arc::clone(&completions) as Arc<dyn EventSink>,
    );

    Pipeline {
        orchestrator: ChainOrchestrator::new(
            registry,
            Arc::clone(&interceptor),
            publisher,
        ),
        interceptor,
        errors,
        completions,
    }
}

fn lookup_steps() -> Vec<ChainStep> {
    vec![
        ChainStep::required("vm0001", "Validate customer id"),
        ChainStep::required("vm0002", "Load customer record"),
        ChainStep::optional("vm0003", "Format for output"),
    ]
}

fn input(customer_id: &str) -> Record {
    let mut record = Record::new();
    record.insert("customerId".to_string(), Value::from(customer_id));
    record
}

/// Event delivery runs on spawned drain tasks; give them a moment.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn full_pipeline_success() {
    let pipeline = pipeline();

    let result = pipeline
        .orchestrator
        .execute_sequential_chain(&lookup_steps(), input("CUST000001"))
        .await;

    assert!(result.success);
    assert!(result.chain_id.starts_with("SEQ-CHAIN-"));
    assert_eq!(result.executed_steps, vec!["vm0001", "vm0002", "vm0003"]);
    assert!(result.failed_steps.is_empty());

    let formatted = result.step_results[2].as_ref().unwrap();
    assert_eq!(
        formatted["summary"],
        Value::from("Watanabe Ichiro (CUST000001)")
    );

    assert_eq!(pipeline.interceptor.overall_stats().total_errors, 0);

    settle().await;
    let completions = pipeline.completions.events();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].chain_id, result.chain_id);
    assert!(pipeline.errors.events().is_empty());
}

#[tokio::test]
async fn validation_failure_aborts_and_is_classified() {
    let pipeline = pipeline();

    let result = pipeline
        .orchestrator
        .execute_sequential_chain(&lookup_steps(), input("SHORT"))
        .await;

    assert!(!result.success);
    assert!(result.executed_steps.is_empty());
    assert_eq!(result.failed_steps, vec!["vm0001"]);
    // vm0002 and vm0003 never ran, so only the failing step has a slot.
    assert_eq!(result.step_results.len(), 1);

    let stats = pipeline.interceptor.module_stats("vm0001");
    assert_eq!(stats.input_validation_errors, 1);
    assert_eq!(stats.total_errors, 1);

    settle().await;
    let errors = pipeline.errors.events();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].service_id, "vm0001");
    assert_eq!(errors[0].error_code.as_deref(), Some(codes::INVALID_PARAMETER));
}

#[tokio::test]
async fn lookup_not_found_keeps_module_classification() {
    let pipeline = pipeline();

    let result = pipeline
        .orchestrator
        .execute_sequential_chain(&lookup_steps(), input("NOTFOUND01"))
        .await;

    assert!(!result.success);
    assert_eq!(result.executed_steps, vec!["vm0001"]);
    assert_eq!(result.failed_steps, vec!["vm0002"]);

    // Manually constructed module errors pass through classification
    // untouched.
    let stats = pipeline.interceptor.module_stats("vm0002");
    assert_eq!(stats.business_logic_errors, 1);
    assert_eq!(stats.database_errors, 0);

    settle().await;
    let errors = pipeline.errors.events();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_code.as_deref(), Some(codes::CUSTOMER_NOT_FOUND));
}

#[tokio::test]
async fn raw_failures_are_classified_by_token() {
    let interceptor = ErrorInterceptor::default();

    let outcome: Result<Value> = interceptor
        .execute(
            "vm0002",
            || async {
                Err::<Value, BoxError>(Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "SQL connection refused by pool",
                )))
            },
            None,
        )
        .await;

    let module_error = outcome.unwrap_err();
    assert_eq!(module_error.code, codes::DATABASE_ERROR);
    assert_eq!(module_error.phase, ErrorPhase::DatabaseAccess);
    assert_eq!(module_error.severity, Severity::Critical);
    assert!(module_error.recoverable);
    assert!(module_error.is_retryable());
}

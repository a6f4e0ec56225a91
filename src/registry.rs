//! # Module Service Registry
//!
//! The chain orchestrator resolves step ids to module services here.
//! Modules register explicitly at startup; the registry only depends on
//! the [`ModuleService`] shape, never on module internals.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::types::BoxError;

/// The keyed-mapping record every module consumes and produces.
pub type Record = Map<String, Value>;

/// An independently invocable business unit: one input-to-output
/// function that may fail. Implementations raise domain errors however
/// they like; the interceptor classifies whatever comes back.
#[async_trait]
pub trait ModuleService: Send + Sync {
    /// Stable identifier, e.g. `"vm0001"`
    fn service_id(&self) -> &str;

    fn description(&self) -> String {
        format!("{} module service", self.service_id())
    }

    async fn process(&self, input: &Record) -> std::result::Result<Value, BoxError>;
}

/// Maps service ids to registered module services.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<dyn ModuleService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its own id, replacing any previous
    /// registration for that id.
    pub fn register(&self, service: Arc<dyn ModuleService>) {
        info!(
            service_id = %service.service_id(),
            description = %service.description(),
            "Module service registered"
        );
        self.services
            .insert(service.service_id().to_string(), service);
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<dyn ModuleService>> {
        let service = self.services.get(service_id).map(|s| Arc::clone(&s));
        if service.is_none() {
            debug!(service_id = %service_id, "No module service registered");
        }
        service
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services.iter().map(|s| s.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

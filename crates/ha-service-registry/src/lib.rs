//! Service registry with async handlers
//!
//! Services are addressed by `domain.service`. The in-process hub registers
//! its entity services here (turn_on, media_pause, scripts, ...) and routes
//! every incoming [`ServiceCall`] through [`ServiceRegistry::call`].

use dashmap::DashMap;
use ha_core::ServiceCall;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result of a service handler
pub type ServiceResult = Result<(), ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when calling services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// All registered services
#[derive(Default)]
pub struct ServiceRegistry {
    /// Handlers indexed by "domain.service"
    services: DashMap<String, ServiceHandler>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler of `domain.service`
    #[instrument(skip(self, domain, service, handler))]
    pub fn register<F, Fut>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let key = format!("{}.{}", domain.into(), service.into());
        debug!(service = %key, "Registering service");

        let handler: ServiceHandler = Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);
        self.services.insert(key, handler);
    }

    /// Route a call to its handler
    #[instrument(skip(self, call), fields(service = %call.service_id(), context_id = %call.context.id))]
    pub async fn call(&self, call: ServiceCall) -> ServiceResult {
        let handler = self
            .services
            .get(&call.service_id())
            .map(|h| h.value().clone())
            .ok_or_else(|| {
                warn!("Service not found");
                ServiceError::NotFound {
                    domain: call.domain.clone(),
                    service: call.service.clone(),
                }
            })?;

        // The map guard is released before the handler runs
        debug!("Calling service");
        handler(call).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{domain}.{service}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::Context;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = ServiceRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        registry.register("light", "turn_on", move |call: ServiceCall| {
            sink.lock().unwrap().push(call.entity_ids());
            async { Ok(()) }
        });

        registry
            .call(ServiceCall::new(
                "light",
                "turn_on",
                json!({"entity_id": "light.kitchen"}),
                Context::new(),
            ))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![vec!["light.kitchen".to_string()]]);
    }

    #[tokio::test]
    async fn test_service_not_found() {
        let registry = ServiceRegistry::new();
        let result = registry
            .call(ServiceCall::new("nope", "service", json!({}), Context::new()))
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let registry = ServiceRegistry::new();
        registry.register("test", "fail", |_: ServiceCall| async {
            Err(ServiceError::CallFailed("intentional failure".into()))
        });

        let result = registry
            .call(ServiceCall::new("test", "fail", json!({}), Context::new()))
            .await;
        assert!(matches!(result, Err(ServiceError::CallFailed(_))));
    }

    #[test]
    fn test_services_are_keyed_by_domain() {
        let registry = ServiceRegistry::new();
        for service in ["turn_on", "turn_off", "toggle"] {
            registry.register("light", service, |_: ServiceCall| async { Ok(()) });
        }
        registry.register("switch", "toggle", |_: ServiceCall| async { Ok(()) });

        assert!(registry.has_service("light", "turn_off"));
        assert!(!registry.has_service("light", "flash"));
        assert!(registry.has_service("switch", "toggle"));
        assert!(!registry.has_service("switch", "turn_on"));
    }
}

//! Service registration and transactional marking.
//!
//! Services expose their callable surface as an explicit method table built
//! at registration time. The transactional marking is pure data on a table
//! entry; it has no runtime effect until the discovery pass replaces the
//! entry with a transaction-aware wrapper.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::transaction::error::TxError;

/// Errors surfaced by registered service methods and registry dispatch
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TxError),

    #[error("Service error: {0}")]
    Failed(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown method: {service}.{method}")]
    UnknownMethod { service: String, method: String },
}

/// A single named operation on a registered service.
///
/// Wrappers installed by the discovery pass implement this same trait, so
/// instrumentation changes nothing about argument shape, return type, or
/// error propagation.
#[async_trait]
pub trait ServiceMethod: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ServiceError>;
}

struct FnMethod {
    f: Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ServiceError>> + Send + Sync>,
}

#[async_trait]
impl ServiceMethod for FnMethod {
    async fn call(&self, args: Value) -> Result<Value, ServiceError> {
        (self.f)(args).await
    }
}

/// Build a `ServiceMethod` from an async closure.
pub fn method_fn<F, Fut>(f: F) -> Arc<dyn ServiceMethod>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    Arc::new(FnMethod {
        f: Box::new(move |args| Box::pin(f(args))),
    })
}

pub(crate) struct MethodEntry {
    pub(crate) callable: Arc<dyn ServiceMethod>,
    /// Static, data-only marking: this method requires an active transaction.
    pub(crate) transactional: bool,
    /// Guard against double-wrapping on repeated discovery passes.
    pub(crate) wrapped: bool,
}

pub(crate) struct RegisteredService {
    pub(crate) name: String,
    pub(crate) methods: HashMap<String, MethodEntry>,
}

/// Builder declaring a service's method table at construction time.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Register a plain method.
    pub fn method(mut self, name: impl Into<String>, method: Arc<dyn ServiceMethod>) -> Self {
        self.methods.insert(
            name.into(),
            MethodEntry {
                callable: method,
                transactional: false,
                wrapped: false,
            },
        );
        self
    }

    /// Register a method carrying the transactional marking. The marking is
    /// inert until the discovery pass runs.
    pub fn transactional(
        mut self,
        name: impl Into<String>,
        method: Arc<dyn ServiceMethod>,
    ) -> Self {
        self.methods.insert(
            name.into(),
            MethodEntry {
                callable: method,
                transactional: true,
                wrapped: false,
            },
        );
        self
    }

    pub async fn register(self, registry: &ServiceRegistry) {
        let service = RegisteredService {
            name: self.name,
            methods: self.methods,
        };
        debug!(
            "Registered service '{}' with {} methods",
            service.name,
            service.methods.len()
        );
        let mut services = registry.services.write().await;
        services.insert(service.name.clone(), service);
    }
}

/// Process-wide table of registered service instances.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, RegisteredService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch through the current table entry for (service, method).
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, ServiceError> {
        let callable = {
            let services = self.services.read().await;
            let entry = services
                .get(service)
                .ok_or_else(|| ServiceError::UnknownService(service.to_string()))?;
            let method_entry =
                entry
                    .methods
                    .get(method)
                    .ok_or_else(|| ServiceError::UnknownMethod {
                        service: service.to_string(),
                        method: method.to_string(),
                    })?;
            Arc::clone(&method_entry.callable)
        };
        callable.call(args).await
    }

    pub async fn service_names(&self) -> Vec<String> {
        let services = self.services.read().await;
        services.keys().cloned().collect()
    }

    pub(crate) async fn services_mut(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<String, RegisteredService>> {
        self.services.write().await
    }
}

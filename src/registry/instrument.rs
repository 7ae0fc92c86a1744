//! One-time startup instrumentation pass.
//!
//! After all services are registered, `Instrumenter::initialize` replaces
//! every method table entry carrying the transactional marking with a proxy
//! that opens or joins a transaction before delegating to the original
//! implementation. After this point the tables are effectively read-only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::registry::service::{ServiceError, ServiceMethod, ServiceRegistry};
use crate::transaction::coordinator::TransactionCoordinator;

/// Outcome of a discovery pass, rebuilt on every process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstrumentationReport {
    pub services_scanned: usize,
    pub services_skipped: usize,
    pub methods_wrapped: usize,
}

/// Startup hook that discovers marked methods and installs transaction
/// wrappers exactly once.
pub struct Instrumenter {
    coordinator: TransactionCoordinator,
    initialized: AtomicBool,
}

impl Instrumenter {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self {
            coordinator,
            initialized: AtomicBool::new(false),
        }
    }

    /// Enumerate every registered service and wrap each marked method in a
    /// transaction-aware proxy preserving the original signature and errors.
    ///
    /// Idempotent: a second call is a logged no-op, and individual entries
    /// are never wrapped twice. Services with an empty callable surface are
    /// skipped without error (plain-object collaborators are legitimately
    /// non-transactional).
    pub async fn initialize(&self, registry: &ServiceRegistry) -> InstrumentationReport {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("Instrumentation already initialized, skipping discovery pass");
            return InstrumentationReport::default();
        }

        let mut report = InstrumentationReport::default();
        let mut services = registry.services_mut().await;

        for service in services.values_mut() {
            report.services_scanned += 1;

            if service.methods.is_empty() {
                debug!("Skipping service '{}': no callable surface", service.name);
                report.services_skipped += 1;
                continue;
            }

            for (method_name, entry) in service.methods.iter_mut() {
                if !entry.transactional || entry.wrapped {
                    continue;
                }
                entry.callable = Arc::new(TransactionalMethod {
                    inner: Arc::clone(&entry.callable),
                    coordinator: self.coordinator.clone(),
                });
                entry.wrapped = true;
                report.methods_wrapped += 1;
                debug!("Wrapped {}.{} in transaction scope", service.name, method_name);
            }
        }

        info!(
            "Instrumentation complete: wrapped {} transactional methods across {} services ({} skipped)",
            report.methods_wrapped, report.services_scanned, report.services_skipped
        );
        report
    }
}

// Transaction-aware proxy implementing the same interface as the method it
// replaces. The handle is not passed to the inner method: it reads the
// ambient scope like any other transactional code.
struct TransactionalMethod {
    inner: Arc<dyn ServiceMethod>,
    coordinator: TransactionCoordinator,
}

#[async_trait]
impl ServiceMethod for TransactionalMethod {
    async fn call(&self, args: Value) -> Result<Value, ServiceError> {
        let inner = Arc::clone(&self.inner);
        self.coordinator
            .run_in_transaction(move |_handle| async move { inner.call(args).await })
            .await
    }
}

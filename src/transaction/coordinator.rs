//! Transaction coordinator: exactly one physical transaction per logical
//! call tree, regardless of how deeply "run transactionally" calls nest.
//!
//! The first `run_in_transaction` in a call tree becomes the Owner: it
//! begins a physical transaction, publishes the handle in the ambient scope,
//! and commits or rolls back on exit. Every nested call finds the handle
//! already in scope and becomes a Borrower: it runs its work against the
//! existing handle and never touches commit or rollback.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config;
use crate::context::scope;
use crate::transaction::error::TxError;
use crate::transaction::resource::{TransactionalResource, TxHandle};

// Ambient slot carrying the active transaction handle.
struct TxSlot(TxHandle);

/// Handle of the transaction active in the current call tree, if any.
pub fn current_handle() -> Option<TxHandle> {
    scope::get::<TxSlot>().map(|slot| slot.0.clone())
}

/// True when the current call tree runs inside a transaction.
pub fn is_transaction_active() -> bool {
    current_handle().is_some()
}

/// Escape hatch for callers that already own a transaction handle obtained
/// outside the normal flow (tests, scripts, legacy integration).
///
/// Seeds the ambient transaction slot with `handle` for the duration of
/// `work`, so nested `run_in_transaction` calls borrow it. Performs **no**
/// commit and **no** rollback under any circumstances: the caller remains
/// responsible for finalizing the handle. Using this where
/// `run_in_transaction` was intended leaves the transaction unfinalized.
pub async fn run_with_handle<T, F, Fut>(handle: TxHandle, work: F) -> T
where
    F: FnOnce(TxHandle) -> Fut,
    Fut: Future<Output = T>,
{
    let slot_handle = handle.clone();
    scope::run(async move {
        scope::set(TxSlot(slot_handle));
        work(handle).await
    })
    .await
}

/// Decides whether each transactional request opens a new physical
/// transaction or reuses the one already active in the ambient scope.
#[derive(Clone)]
pub struct TransactionCoordinator {
    resource: Arc<dyn TransactionalResource>,
}

impl TransactionCoordinator {
    pub fn new(resource: Arc<dyn TransactionalResource>) -> Self {
        Self { resource }
    }

    /// The storage resource this coordinator opens transactions against.
    pub fn resource(&self) -> &Arc<dyn TransactionalResource> {
        &self.resource
    }

    /// Run `work` under the call tree's single physical transaction.
    ///
    /// Borrower path: a handle is already ambient, so `work` runs against it
    /// directly with no new scope and no finalization. Owner path: begin a
    /// physical transaction, publish the handle in a child scope, run `work`,
    /// then commit on success or roll back on failure. The error `work`
    /// returns surfaces unchanged; only when rollback itself also fails is a
    /// composite `TxError::RollbackFailed` returned instead, reporting both.
    ///
    /// A failed `begin` propagates untouched and leaves no scope behind.
    pub async fn run_in_transaction<T, E, F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TxError> + fmt::Display,
    {
        // Borrower: reuse the ambient handle, ownership stays with the outer call.
        if let Some(existing) = current_handle() {
            debug!("Joining active transaction {}", existing.id());
            return work(existing).await;
        }

        // Owner: open the one physical transaction for this call tree.
        let handle = self.resource.begin().await.map_err(E::from)?;
        let tx_id = handle.id();
        let started = Instant::now();
        debug!("Began transaction {}", tx_id);

        let result = {
            let slot_handle = handle.clone();
            scope::run(async move {
                scope::set(TxSlot(slot_handle.clone()));
                work(slot_handle).await
            })
            .await
        };

        match result {
            Ok(value) => {
                self.resource.commit(&handle).await.map_err(E::from)?;
                let elapsed = started.elapsed();
                debug!("Committed transaction {} in {:?}", tx_id, elapsed);

                let coordinator = &config::config().coordinator;
                if coordinator.enable_slow_tx_warning
                    && elapsed.as_millis() as u64 >= coordinator.slow_tx_threshold_ms
                {
                    warn!("Slow transaction {}: {:?}", tx_id, elapsed);
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.resource.rollback(&handle).await {
                    warn!(
                        "Rollback of transaction {} failed: {} (original error: {})",
                        tx_id, rollback_err, err
                    );
                    return Err(E::from(TxError::RollbackFailed {
                        operation: err.to_string(),
                        rollback: rollback_err.to_string(),
                    }));
                }
                debug!("Rolled back transaction {}", tx_id);
                Err(err)
            }
        }
    }
}

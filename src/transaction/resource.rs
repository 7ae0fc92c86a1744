//! Contracts between the coordinator and the storage engine.
//!
//! The storage engine is an opaque transactional resource: it can begin a
//! physical transaction, finalize it exactly once, and hand out entity-scoped
//! accessors bound to a live transaction. Everything else about it (queries,
//! schema, pooling) is its own business.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::transaction::error::TxError;

/// Shared reference to a live physical transaction.
///
/// Exactly one owner (the coordinator invocation that opened it) finalizes
/// the transaction; everyone else borrows it read-only via the ambient scope.
pub type TxHandle = Arc<dyn TransactionHandle>;

/// Opaque reference to a live database transaction.
pub trait TransactionHandle: Send + Sync {
    /// Stable identity for logging and handle-equality checks.
    fn id(&self) -> Uuid;

    /// Entity-kind-scoped data accessor bound to this transaction.
    fn accessor(&self, entity_kind: &str) -> Result<Box<dyn DataAccessor>, TxError>;

    /// Concrete downcast hook for resource implementations.
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHandle({})", self.id())
    }
}

/// A provider of physical transactions.
///
/// The closure-style begin/commit contract is split into object-safe
/// primitives; the coordinator owns the commit-on-success /
/// rollback-on-failure composition. Finalizing a handle twice is an error
/// (`TxError::HandleClosed`), and finalization always releases the
/// underlying connection.
#[async_trait]
pub trait TransactionalResource: Send + Sync {
    /// Begin a new physical transaction.
    async fn begin(&self) -> Result<TxHandle, TxError>;

    /// Commit a transaction previously returned by `begin`.
    async fn commit(&self, handle: &TxHandle) -> Result<(), TxError>;

    /// Roll back a transaction previously returned by `begin`.
    async fn rollback(&self, handle: &TxHandle) -> Result<(), TxError>;
}

/// Entity-kind-scoped CRUD over JSON records, bound to one transaction.
#[async_trait]
pub trait DataAccessor: Send + Sync {
    async fn insert(&self, record: Map<String, Value>) -> Result<Map<String, Value>, TxError>;

    async fn update(
        &self,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>, TxError>;

    async fn delete(&self, id: Uuid) -> Result<(), TxError>;

    async fn select_one(&self, id: Uuid) -> Result<Option<Map<String, Value>>, TxError>;

    async fn select_all(&self) -> Result<Vec<Map<String, Value>>, TxError>;
}

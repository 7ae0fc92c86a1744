use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ambient_tx::{DataAccessor, TransactionHandle, TransactionalResource, TxError, TxHandle};
use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

/// In-memory resource that counts physical begin/commit/rollback calls and
/// records accessor operations, with injectable failures.
pub struct RecordingResource {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_begin: bool,
    fail_rollback: bool,
    operations: Arc<Mutex<Vec<String>>>,
}

impl RecordingResource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            begins: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            fail_begin: false,
            fail_rollback: false,
            operations: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn failing_begin() -> Arc<Self> {
        let mut resource = Self::unwrapped();
        resource.fail_begin = true;
        Arc::new(resource)
    }

    pub fn failing_rollback() -> Arc<Self> {
        let mut resource = Self::unwrapped();
        resource.fail_rollback = true;
        Arc::new(resource)
    }

    fn unwrapped() -> Self {
        Self {
            begins: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            fail_begin: false,
            fail_rollback: false,
            operations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionalResource for RecordingResource {
    async fn begin(&self) -> Result<TxHandle, TxError> {
        if self.fail_begin {
            return Err(TxError::Storage("injected begin failure".to_string()));
        }
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingHandle {
            id: Uuid::new_v4(),
            operations: Arc::clone(&self.operations),
        }))
    }

    async fn commit(&self, _handle: &TxHandle) -> Result<(), TxError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _handle: &TxHandle) -> Result<(), TxError> {
        if self.fail_rollback {
            return Err(TxError::Storage("injected rollback failure".to_string()));
        }
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct RecordingHandle {
    id: Uuid,
    operations: Arc<Mutex<Vec<String>>>,
}

impl TransactionHandle for RecordingHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    fn accessor(&self, entity_kind: &str) -> Result<Box<dyn DataAccessor>, TxError> {
        Ok(Box::new(RecordingAccessor {
            entity_kind: entity_kind.to_string(),
            operations: Arc::clone(&self.operations),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct RecordingAccessor {
    entity_kind: String,
    operations: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl DataAccessor for RecordingAccessor {
    async fn insert(&self, mut record: Map<String, Value>) -> Result<Map<String, Value>, TxError> {
        record
            .entry("id".to_string())
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        self.operations
            .lock()
            .unwrap()
            .push(format!("{}:insert", self.entity_kind));
        Ok(record)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>, TxError> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("{}:update:{}", self.entity_kind, id));
        Ok(changes)
    }

    async fn delete(&self, id: Uuid) -> Result<(), TxError> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("{}:delete:{}", self.entity_kind, id));
        Ok(())
    }

    async fn select_one(&self, id: Uuid) -> Result<Option<Map<String, Value>>, TxError> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("{}:select_one:{}", self.entity_kind, id));
        Ok(None)
    }

    async fn select_all(&self) -> Result<Vec<Map<String, Value>>, TxError> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("{}:select_all", self.entity_kind));
        Ok(Vec::new())
    }
}

/// Caller-side error type, to assert that business errors cross the
/// transaction layer unchanged.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("Transaction error: {0}")]
    Tx(#[from] TxError),

    #[error("{0}")]
    Boom(String),
}

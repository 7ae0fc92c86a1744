//! Ambient context store: per-call-tree typed slots that survive async
//! suspension points without leaking between concurrently interleaved tasks.
//!
//! Built on tokio's task-local storage, so a scope established at the root of
//! a logical operation is visible to every continuation it spawns and to
//! nothing else. Slots are keyed by type, same pattern as typed metadata on a
//! pipeline context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task_local;

task_local! {
    static CURRENT: Arc<AmbientScope>;
}

type Slot = Arc<dyn Any + Send + Sync>;

/// A single ambient scope: typed slots plus an optional parent link.
///
/// Reads fall through to the parent chain; writes always land in the
/// innermost scope and vanish when it is torn down. This gives nested scopes
/// "same scope by default" read semantics while keeping writes local.
pub struct AmbientScope {
    parent: Option<Arc<AmbientScope>>,
    slots: Mutex<HashMap<TypeId, Slot>>,
}

impl AmbientScope {
    fn root() -> Self {
        Self {
            parent: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn child(parent: Arc<AmbientScope>) -> Self {
        Self {
            parent: Some(parent),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn put(&self, key: TypeId, value: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(key, value);
    }

    fn lookup(&self, key: TypeId) -> Option<Slot> {
        {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(value) = slots.get(&key) {
                return Some(Arc::clone(value));
            }
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(key))
    }
}

/// Scope currently active on this logical task, if any.
pub fn current() -> Option<Arc<AmbientScope>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// True when called anywhere inside a `run`/`run_isolated` call tree.
pub fn is_active() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

/// Run `body` inside a child of the current scope (or a fresh root scope when
/// none is active).
///
/// Every continuation reachable from `body` observes the same scope, however
/// deeply nested or interleaved with unrelated tasks. The scope is torn down
/// deterministically when `body` completes; errors and panics propagate
/// unchanged.
pub async fn run<F>(body: F) -> F::Output
where
    F: Future,
{
    let scope = match current() {
        Some(parent) => AmbientScope::child(parent),
        None => AmbientScope::root(),
    };
    CURRENT.scope(Arc::new(scope), body).await
}

/// Run `body` in a fresh root scope, hiding any outer scope's slots.
pub async fn run_isolated<F>(body: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(Arc::new(AmbientScope::root()), body).await
}

/// Write a typed slot in the active scope.
///
/// Returns false (and does nothing) outside any scope, so boundary code can
/// call it unconditionally.
pub fn set<T: Send + Sync + 'static>(value: T) -> bool {
    match current() {
        Some(scope) => {
            scope.put(TypeId::of::<T>(), Arc::new(value));
            true
        }
        None => false,
    }
}

/// Read a typed slot, walking the parent chain. `None` outside any scope;
/// never panics.
pub fn get<T: Send + Sync + 'static>() -> Option<Arc<T>> {
    let scope = current()?;
    scope.lookup(TypeId::of::<T>())?.downcast::<T>().ok()
}

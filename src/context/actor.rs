//! Actor/audit context: ambient identity of the acting principal.
//!
//! Structurally the same mechanism as transaction scoping (a typed slot in
//! the ambient scope) but with no rollback semantics: persistence code reads
//! the current actor to stamp created-by/updated-by fields, and the slot is
//! set once near the system boundary after authentication.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::scope;

/// Identity of the acting principal for audit stamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub actor_id: String,
    pub display_name: Option<String>,
}

impl ActorIdentity {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

impl From<&str> for ActorIdentity {
    fn from(actor_id: &str) -> Self {
        Self::new(actor_id)
    }
}

impl From<String> for ActorIdentity {
    fn from(actor_id: String) -> Self {
        Self::new(actor_id)
    }
}

// The slot holds an Option so an explicit clear shadows an actor inherited
// from a parent scope, instead of merely deleting the local entry.
struct ActorSlot(Option<ActorIdentity>);

/// Set the ambient actor. Returns false outside any ambient scope.
pub fn set_actor(actor: ActorIdentity) -> bool {
    scope::set(ActorSlot(Some(actor)))
}

/// Clear the ambient actor for the rest of the current scope, shadowing any
/// inherited one. Returns false outside any ambient scope.
pub fn clear_actor() -> bool {
    scope::set(ActorSlot(None))
}

/// Actor currently in scope, if any.
pub fn current_actor() -> Option<ActorIdentity> {
    scope::get::<ActorSlot>().and_then(|slot| slot.0.clone())
}

/// Run `body` with `actor` as the ambient actor, restoring the previous
/// actor (if any) afterwards. Nests independently of transaction scoping.
pub async fn run_as<A, F>(actor: A, body: F) -> F::Output
where
    A: Into<ActorIdentity>,
    F: Future,
{
    let actor = actor.into();
    scope::run(async move {
        set_actor(actor);
        body.await
    })
    .await
}

/// Run `body` with no ambient actor, e.g. for seeds and system-initiated
/// work, even when an outer scope carries one.
pub async fn run_without_actor<F>(body: F) -> F::Output
where
    F: Future,
{
    scope::run(async move {
        clear_actor();
        body.await
    })
    .await
}

/// Partial field set to merge into a newly created entity.
pub fn creation_stamp_for(actor: Option<&ActorIdentity>) -> Map<String, Value> {
    let mut stamp = Map::new();
    if let Some(actor) = actor {
        stamp.insert(
            "created_by".to_string(),
            Value::String(actor.actor_id.clone()),
        );
    }
    stamp
}

/// Partial field set to merge into an updated entity.
pub fn update_stamp_for(actor: Option<&ActorIdentity>) -> Map<String, Value> {
    let mut stamp = Map::new();
    if let Some(actor) = actor {
        stamp.insert(
            "updated_by".to_string(),
            Value::String(actor.actor_id.clone()),
        );
    }
    stamp
}

/// Creation stamp for the ambient actor; empty when none is set.
pub fn creation_stamp() -> Map<String, Value> {
    creation_stamp_for(current_actor().as_ref())
}

/// Update stamp for the ambient actor; empty when none is set.
pub fn update_stamp() -> Map<String, Value> {
    update_stamp_for(current_actor().as_ref())
}

pub mod actor;
pub mod scope;

pub use actor::ActorIdentity;
pub use scope::AmbientScope;

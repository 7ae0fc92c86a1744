pub mod config;
pub mod context;
pub mod registry;
pub mod transaction;

pub use context::actor::ActorIdentity;
pub use registry::{
    method_fn, InstrumentationReport, Instrumenter, ServiceBuilder, ServiceError, ServiceMethod,
    ServiceRegistry,
};
pub use transaction::postgres::PgResource;
pub use transaction::{
    current_handle, is_transaction_active, run_with_handle, DataAccessor, TransactionCoordinator,
    TransactionHandle, TransactionalResource, TxError, TxHandle,
};

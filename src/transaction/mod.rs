pub mod coordinator;
pub mod error;
pub mod postgres;
pub mod resource;

pub use coordinator::{
    current_handle, is_transaction_active, run_with_handle, TransactionCoordinator,
};
pub use error::TxError;
pub use resource::{DataAccessor, TransactionHandle, TransactionalResource, TxHandle};

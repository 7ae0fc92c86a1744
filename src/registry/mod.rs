pub mod instrument;
pub mod service;

pub use instrument::{InstrumentationReport, Instrumenter};
pub use service::{method_fn, ServiceBuilder, ServiceError, ServiceMethod, ServiceRegistry};

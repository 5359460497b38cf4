//! The Loom read service: Fact and Object search, Object statistics and
//! graph traversal on behalf of an access-scoped caller.

pub mod config;
pub mod error;
pub mod service;

pub use config::{SearchConfig, ServiceConfig};
pub use error::{Error, ErrorKind, Result};
pub use service::{DEFAULT_MAX_FACT_RESULTS, FactResultSet, LoomService};

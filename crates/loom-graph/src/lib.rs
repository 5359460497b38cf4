//! Access-controlled, lazily materialised graph traversal.
//!
//! [`GraphView`] exposes the Objects and Facts of the primary store as a
//! property graph restricted to what one caller may read. Queries are written
//! in a small read-only step language (see [`language`]) and evaluated by
//! [`TraversalExecutor`] under a time limit.

pub mod error;
pub mod executor;
pub mod language;
pub mod value;
pub mod view;

pub use error::{Error, Result};
pub use executor::{TraversalExecutor, TraversalSettings};
pub use value::TraversalValue;
pub use view::{GraphView, TraverseParams};

#[cfg(test)]
mod tests;

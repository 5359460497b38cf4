//! Search and aggregation over the sharded Fact index.
//!
//! [`criteria::SearchCriteria`] is compiled into a backend-neutral
//! [`query::Query`] and, for Object search and statistics, an
//! [`aggregation::Aggregation`] tree. An [`backend::IndexBackend`] runs them:
//! [`elastic::ElasticBackend`] against an Elasticsearch cluster,
//! [`memory::MemoryIndex`] in-process.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod aggregation;
pub mod backend;
pub mod criteria;
pub mod document;
pub mod elastic;
pub mod error;
pub mod index;
pub mod manager;
pub mod mapping;
pub mod memory;
pub mod query;
pub mod scroll;

pub use error::{Error, Result};
pub use manager::{FactSearchManager, SearchResult, SearchSettings};

#[cfg(test)]
mod tests;

//! Core types and trait definitions for the Loom knowledge graph.
//!
//! This crate is deliberately free of HTTP, search and database dependencies.
//! It owns the Object/Fact model, the access-control contract shared by the
//! search and traversal subsystems, the primary store abstraction and the
//! per-caller retraction resolver.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod access;
pub mod error;
pub mod fact;
pub mod object;
pub mod retraction;
pub mod store;

pub use error::{Error, Result};

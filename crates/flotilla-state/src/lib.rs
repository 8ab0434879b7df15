//! flotilla-state — embedded state store for Flotilla.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for servers, projects, deployments, containers, and the
//! durable container-action queue.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.
//!
//! Cross-trigger coordination (idle sweep vs. edge wake vs. reconciliation)
//! is done exclusively through **conditional updates** on container rows:
//! a write transaction reads the current value, compares it against the
//! expected prior state, and only then writes. The boolean result tells the
//! caller whether its transition was the one that took effect. There are no
//! in-process locks guarding lifecycle state.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;

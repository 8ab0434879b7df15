//! Flotilla placement scheduler — weighted best-fit server selection.
//!
//! This crate decides which server should run a given workload. It is a
//! pure function over the server list: it performs no I/O and does NOT
//! reserve capacity (the caller persists the allocation via
//! `StateStore::reserve_capacity` after a server is selected).
//!
//! The heuristic is greedy best-fit by weighted utilization: it favors
//! servers with larger contiguous free capacity over perfectly balanced
//! load, which reduces future placement failures. Capacity is a hard
//! filter, not a score component — a server that cannot fit the request
//! is never returned no matter how healthy it is.

pub mod scorer;

pub use scorer::{PlacementError, ServerScore, pick_best_server, rank_servers, score_server};

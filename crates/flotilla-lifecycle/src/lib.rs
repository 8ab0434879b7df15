//! Flotilla container lifecycle — the awake/sleeping/waking state machine.
//!
//! Three independent triggers drive the same container records: the
//! periodic idle sweep, edge-triggered wakes, and the startup
//! reconciliation pass. They coordinate exclusively through conditional
//! updates in the state store (see `flotilla-state`); this crate holds no
//! locks of its own, so any number of processes can race safely.
//!
//! # Components
//!
//! - **`bus`** — per-deployment broadcast channels for lifecycle events
//! - **`manager`** — wake-on-demand, idle sweep, and startup reconciliation

pub mod bus;
pub mod manager;

pub use bus::EventBus;
pub use manager::{LifecycleManager, SweepReport, WakeOutcome};

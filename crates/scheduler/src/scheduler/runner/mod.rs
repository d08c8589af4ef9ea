//! Scheduler runner -- lifecycle, admission, dispatch and the barrier.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, shared state, constructors and read-only accessors
//! - `execution`: start/stop, the dispatch loop and completion accounting
//! - `scheduling`: admission (`submit*`)
//! - `barrier`: `wait_for_synchronization` and `clear`

mod barrier;
mod core;
mod execution;
mod scheduling;

pub use self::core::Scheduler;
pub(crate) use self::core::Shared;

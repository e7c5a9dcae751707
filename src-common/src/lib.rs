//! framecap common library
//!
//! Shared types, the IPC protocol and the shared-memory segment used on both
//! sides of the process boundary between the capture pipeline and its encode
//! workers.

pub mod ipc;
pub mod logging;
pub mod security;
pub mod shm;
pub mod types;

pub use types::*;

//! Background Tasks Module
//!
//! # Tasks
//! - TTL Cleanup: purges expired memory-store entries at a configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;

//! Execution core.
//!
//! Covers the session registry, completion detection, the subtask worker,
//! the DAG scheduler, and the top-level run.

pub mod completion;
pub mod runner;
pub mod scheduler;
pub mod session_registry;
pub mod worker;

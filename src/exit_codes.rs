//! Stable process exit codes.

/// At least one subtask succeeded, or the plan was empty.
pub const OK: i32 = 0;
/// Runtime failure: configuration, session creation, or planner error.
pub const RUNTIME: i32 = 1;
/// The planner's graph failed validation; nothing ran.
pub const PLAN_INVALID: i32 = 2;
/// Every subtask failed or was skipped.
pub const NO_SUCCESS: i32 = 3;

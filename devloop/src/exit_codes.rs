//! Stable exit codes for devloop CLI commands.

/// The run passed its checks, or a non-run command succeeded.
pub const OK: i32 = 0;
/// Invalid input, configuration, internal error, or cancellation.
pub const INVALID: i32 = 1;
/// The generation backend failed; no usable iteration was produced.
pub const GENERATION_FAILED: i32 = 2;
/// The iteration budget ran out without a passing iteration.
pub const BUDGET_EXHAUSTED: i32 = 3;

//! Deterministic, pure logic shared by the loop controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod gate;
pub mod path_filter;
pub mod policy;
pub mod run_state;
pub mod text;
pub mod types;

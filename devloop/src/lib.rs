//! Generate → review → fix iteration loop.
//!
//! A task description goes to a code-generation backend, the proposed files are
//! filtered and applied to the project, quality checks run against them, and the
//! loop retries with a critique until the checks pass or the iteration budget runs
//! out. The final state is then handed to a publisher.
//!
//! - **[`core`]**: Pure, deterministic logic (gate, path filter, stopping policy,
//!   run state). No I/O.
//! - **[`io`]**: Side-effecting adapters (processes, checks, generation backend,
//!   workspace, git, config, report).
//! - **[`events`]**: In-memory event bus observing every loop transition.
//!
//! [`controller`] drives the loop; [`run`] wires it to configuration and the real
//! adapters for the CLI.

pub mod controller;
pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

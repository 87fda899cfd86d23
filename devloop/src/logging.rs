//! Development-time tracing.
//!
//! - **Tracing (this module)**: developer diagnostics via `RUST_LOG`, written to stderr.
//! - **Event bus history**: the product-level record of a run, persisted in the run
//!   report and unaffected by `RUST_LOG`.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::events::Event;

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn`. Output: stderr, compact format.
///
/// ```bash
/// RUST_LOG=devloop=debug devloop run --task-key PROJ-1 --task "..."
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// Bus subscriber that mirrors every event into tracing at `info`.
pub fn trace_events(event: &Event) -> Result<()> {
    let payload = serde_json::Value::Object(event.payload.clone());
    info!(
        target: "devloop::events",
        event_type = %event.event_type,
        correlation_id = %event.correlation_id,
        component = event.component.as_deref().unwrap_or("-"),
        payload = %payload,
        "event"
    );
    Ok(())
}

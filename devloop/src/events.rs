//! In-memory event bus for one run.
//!
//! The bus keeps an append-only history and fans each event out to the handlers
//! subscribed to its type, synchronously and in registration order. Delivery
//! completes before [`EventBus::publish`] returns.
//!
//! A handler that returns an error or panics is isolated: the fault is logged,
//! recorded in [`EventBus::faults`], and delivery continues with the next handler.
//! The publisher never sees handler failures.
//!
//! Constraint: handlers must not subscribe (or otherwise mutate the handler list)
//! while an event is being dispatched. [`EventBus::subscribe`] refuses with
//! [`BusError::DispatchInProgress`] in that case. Reading [`EventBus::history`]
//! from inside a handler is fine.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Closed set of event kinds published during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Lifecycle
    Started,
    Completed,
    Cancelled,

    // Generation
    Generated,
    GenerationFailed,
    FileRejected,

    // Review
    ReviewPassed,
    ReviewSoftFail,
    ReviewHardFail,
    ReviewFailed,

    // Iteration
    IterationStarted,
    MaxIterationsReached,

    // Publish
    PublishSkipped,
    BranchCreated,
    CommitCreated,
    PublishFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Started => "started",
            EventType::Completed => "completed",
            EventType::Cancelled => "cancelled",
            EventType::Generated => "generated",
            EventType::GenerationFailed => "generation_failed",
            EventType::FileRejected => "file_rejected",
            EventType::ReviewPassed => "review_passed",
            EventType::ReviewSoftFail => "review_soft_fail",
            EventType::ReviewHardFail => "review_hard_fail",
            EventType::ReviewFailed => "review_failed",
            EventType::IterationStarted => "iteration_started",
            EventType::MaxIterationsReached => "max_iterations_reached",
            EventType::PublishSkipped => "publish_skipped",
            EventType::BranchCreated => "branch_created",
            EventType::CommitCreated => "commit_created",
            EventType::PublishFailed => "publish_failed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable fact appended to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Map<String, Value>,
    pub correlation_id: String,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Name of the component that published the event.
    pub component: Option<String>,
}

impl Event {
    /// Build an event stamped with the current time.
    ///
    /// A non-object `payload` is wrapped as `{"value": payload}`; `null` becomes an
    /// empty object.
    pub fn new(event_type: EventType, correlation_id: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            event_type,
            payload,
            correlation_id: correlation_id.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            component: None,
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Convenience accessor for integer payload fields.
    pub fn payload_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Diagnostic for a handler that failed during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    pub event_type: EventType,
    /// Registration index of the failing handler.
    pub handler: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("cannot subscribe while an event is being dispatched")]
    DispatchInProgress,
}

type Handler = Box<dyn Fn(&Event) -> Result<()>>;

struct Subscription {
    /// `None` receives every event type.
    event_type: Option<EventType>,
    handler: Handler,
}

/// Synchronous publish/subscribe log. One bus per run.
#[derive(Default)]
pub struct EventBus {
    history: RefCell<Vec<Event>>,
    subscriptions: RefCell<Vec<Subscription>>,
    faults: RefCell<Vec<HandlerFault>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `event_type`.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Result<(), BusError>
    where
        F: Fn(&Event) -> Result<()> + 'static,
    {
        self.add_subscription(Some(event_type), Box::new(handler))
    }

    /// Register `handler` for every event type.
    pub fn subscribe_all<F>(&self, handler: F) -> Result<(), BusError>
    where
        F: Fn(&Event) -> Result<()> + 'static,
    {
        self.add_subscription(None, Box::new(handler))
    }

    fn add_subscription(
        &self,
        event_type: Option<EventType>,
        handler: Handler,
    ) -> Result<(), BusError> {
        let mut subscriptions = self
            .subscriptions
            .try_borrow_mut()
            .map_err(|_| BusError::DispatchInProgress)?;
        subscriptions.push(Subscription {
            event_type,
            handler,
        });
        Ok(())
    }

    /// Append `event` to the history, then deliver it to matching handlers.
    pub fn publish(&self, event: Event) {
        debug!(event_type = %event.event_type, correlation_id = %event.correlation_id, "publish");
        self.history.borrow_mut().push(event.clone());

        let subscriptions = self.subscriptions.borrow();
        for (index, subscription) in subscriptions.iter().enumerate() {
            if subscription
                .event_type
                .is_some_and(|wanted| wanted != event.event_type)
            {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscription.handler)(&event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
            };
            warn!(
                event_type = %event.event_type,
                handler = index,
                error = %message,
                "event handler failed"
            );
            self.faults.borrow_mut().push(HandlerFault {
                event_type: event.event_type,
                handler: index,
                message,
            });
        }
    }

    /// Events in publish order, optionally restricted to one type.
    pub fn history(&self, filter: Option<EventType>) -> Vec<Event> {
        self.history
            .borrow()
            .iter()
            .filter(|event| filter.is_none_or(|wanted| event.event_type == wanted))
            .cloned()
            .collect()
    }

    /// Event types in publish order.
    pub fn event_types(&self) -> Vec<EventType> {
        self.history.borrow().iter().map(|e| e.event_type).collect()
    }

    pub fn len(&self) -> usize {
        self.history.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.borrow().is_empty()
    }

    pub fn faults(&self) -> Vec<HandlerFault> {
        self.faults.borrow().clone()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.clone();
    }
    "unknown panic payload".to_string()
}

/// Publishes events on behalf of one component with a fixed correlation id.
#[derive(Clone, Copy)]
pub struct Emitter<'a> {
    bus: &'a EventBus,
    correlation_id: &'a str,
    component: &'static str,
}

impl<'a> Emitter<'a> {
    pub fn new(bus: &'a EventBus, correlation_id: &'a str, component: &'static str) -> Self {
        Self {
            bus,
            correlation_id,
            component,
        }
    }

    pub fn emit(&self, event_type: EventType, payload: Value) {
        self.bus.publish(
            Event::new(event_type, self.correlation_id, payload).with_component(self.component),
        );
    }
}

//! Outbound collaborators of the workflow engine

pub mod events;

pub use events::{BroadcastEventSink, EventSink, TracingEventSink};

//! Lifecycle events: emitter, event types and the pipeline adapters drive.

pub mod emitter;
pub mod event;
pub mod pipeline;

pub use emitter::{Emitter, EventName, Listener, ListenerId, ListenerResult, Priority, Subscriber};
pub use event::{BeforeEvent, CompleteEvent, ErrorEvent, Event, HeadersEvent};
pub use pipeline::{emit_before, emit_complete, emit_error, emit_headers, Outcome};

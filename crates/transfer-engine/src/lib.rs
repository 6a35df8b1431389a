//! # Transfer Engine
//!
//! HTTP client transfer engine: a per-request event pipeline, a
//! bounded-concurrency scheduler over libcurl's multi interface, and a
//! blocking alternate transport.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): messages and state, no I/O
//!   - `Request`, `Response`, `Headers`, `Stream`
//!   - `Transaction`: request/response/exception slots plus lifecycle state
//!   - `RequestConfig`: per-request transfer options
//!   - `EngineConfig`: engine configuration with validation
//!
//! - **Events Layer** (`events/`): lifecycle hooks
//!   - `Emitter`: priority-ordered, stoppable dispatch
//!   - `BeforeEvent`, `HeadersEvent`, `CompleteEvent`, `ErrorEvent`
//!   - `pipeline`: the emit functions every adapter drives, returning `Outcome`
//!
//! - **Ports Layer** (`ports/`): `Adapter` and `ParallelAdapter`
//!
//! - **Adapters Layer** (`adapters/`):
//!   - `MultiAdapter`: multiplexed libcurl scheduler with a sliding window
//!   - `StreamAdapter`: one blocking exchange per call
//!   - `MockAdapter`, `FakeParallelAdapter`, `StreamingProxyAdapter`
//!
//! ```text
//!  TransactionSource ──▶ ParallelAdapter::send_all ──┐
//!                                                    ▼
//!   Request ─▶ Transaction ─▶ before ─▶ OptionCompiler ─▶ Multi ─▶ Mediator
//!                                                                   │
//!                      Outcome ◀── complete / error ◀── headers ◀───┘
//! ```
//!
//! ## Event order
//!
//! For one transaction: `before`, then `headers` once the response head is
//! in, then `complete` or `error` (followed by `complete` when a listener
//! recovers the failure). A `before` listener that intercepts skips the
//! transfer and goes straight to `complete`.
//!
//! ## Usage Example
//!
//! ```ignore
//! use transfer_engine::{Adapter, MultiAdapter, ParallelAdapter, Request, Transaction, TransactionSource};
//!
//! let adapter = MultiAdapter::default();
//! let response = adapter.send(&Transaction::new(Request::get("http://localhost:8080/")))?;
//!
//! let requests = (0..100).map(|i| Request::get(format!("http://localhost:8080/{i}")));
//! adapter.send_all(TransactionSource::new(requests).boxed(), 10)?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ports;
pub mod source;

// Re-exports for convenience
pub use adapters::{
    FakeParallelAdapter, MockAdapter, MockReply, MultiAdapter, OptionCompiler, StreamAdapter,
    StreamingProxyAdapter,
};
pub use domain::{
    Credentials, DebugOutput, EngineConfig, Headers, KeyFile, Proxy, RawValue, Request,
    RequestConfig, Response, SaveTo, Stream, Transaction, TransactionId, TransactionState,
    TransferInfo, Verify,
};
pub use error::{AdapterError, ConfigError, RequestError, SendError};
pub use events::{
    BeforeEvent, CompleteEvent, Emitter, ErrorEvent, Event, EventName, HeadersEvent, Listener,
    ListenerId, Outcome, Priority, Subscriber,
};
pub use metrics::{SchedulerStats, StatsSnapshot};
pub use ports::{Adapter, ParallelAdapter, TransactionIter};
pub use source::{ListenerSpec, TransactionSource};

//! # Transfer Engine Test Suite
//!
//! End-to-end tests that drive the adapters against a real socket.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support/          # Scripted HTTP/1.1 server, tracing setup
//! │   ├── mod.rs
//! │   └── server.rs
//! │
//! └── integration/      # Scenarios per adapter
//!     ├── scenarios.rs  # Single sends, batches, failures
//!     ├── scheduler.rs  # Sliding window, re-entrancy, retries
//!     ├── bodies.rs     # Uploads, save_to, debug sinks
//!     └── stream.rs     # Blocking adapter and combinators
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p transfer-tests
//!
//! # By category
//! cargo test -p transfer-tests integration::scheduler::
//!
//! # With wire logging
//! RUST_LOG=transfer_engine=debug cargo test -p transfer-tests -- --nocapture
//! ```

#![allow(dead_code)]

pub mod integration;
pub mod support;

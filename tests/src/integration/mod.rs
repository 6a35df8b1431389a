//! End-to-end scenarios against the scripted server.

pub mod bodies;
pub mod scenarios;
pub mod stream;

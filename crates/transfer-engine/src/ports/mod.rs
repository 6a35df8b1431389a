//! Ports layer: the adapter contracts.

pub mod adapter;

pub use adapter::{Adapter, ParallelAdapter, TransactionIter};

//! libcurl transport: option compilation, per-transfer mediation and the
//! multiplexed scheduler.

mod batch;
pub mod compiler;
pub mod mediator;
pub mod multi;
pub mod options;

pub use compiler::OptionCompiler;
pub use mediator::Mediator;
pub use multi::MultiAdapter;
pub use options::{CurlOpt, DebugSink, OptionValue, TransportOptions};

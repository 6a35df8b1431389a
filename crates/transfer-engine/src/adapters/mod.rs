//! Adapters layer: transports and combinators implementing the ports.

pub mod curl;
pub mod mock;
pub mod parallel;
pub mod parse;
pub mod stream;

pub use self::curl::{MultiAdapter, OptionCompiler};
pub use mock::{MockAdapter, MockReply};
pub use parallel::{FakeParallelAdapter, StreamingProxyAdapter};
pub use stream::StreamAdapter;

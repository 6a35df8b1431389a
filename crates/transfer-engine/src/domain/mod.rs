//! Domain layer: messages, configuration and the transaction.

pub mod config;
pub mod headers;
pub mod options;
pub mod request;
pub mod response;
pub mod stream;
pub mod transaction;

pub use config::EngineConfig;
pub use headers::Headers;
pub use options::{
    Credentials, DebugOutput, KeyFile, Proxy, RawValue, RequestConfig, SaveTo, Verify,
};
pub use request::Request;
pub use response::Response;
pub use stream::Stream;
pub use transaction::{
    ClientHandle, Transaction, TransactionId, TransactionState, TransferInfo,
};

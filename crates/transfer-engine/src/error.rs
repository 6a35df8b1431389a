//! Error types for the transfer engine
//!
//! Three families:
//!
//! - [`AdapterError`]: fatal configuration and contract errors. Raised
//!   immediately and never routed through the event pipeline.
//! - [`RequestError`]: transport failures. Routed through the `error` event
//!   where a listener may recover them.
//! - [`SendError`]: what a single-transaction `send` surfaces to its caller.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Request, Response, TransactionId, TransferInfo};

/// Boxed source error carried by a [`RequestError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fatal errors raised by adapters before or around a transfer.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("SSL certificate authority file not found: {0}")]
    CaBundleNotFound(PathBuf),

    #[error("SSL certificate not found: {0}")]
    CertificateNotFound(PathBuf),

    #[error("SSL private key not found: {0}")]
    PrivateKeyNotFound(PathBuf),

    #[error("Unknown authentication scheme: {0} (expected basic, digest, ntlm or any)")]
    UnknownAuthScheme(String),

    #[error(
        "The multiplexed curl adapter does not support the \"stream\" request option. \
         Incremental response bodies require the stream adapter, or use \
         StreamingProxyAdapter to route streaming requests to it."
    )]
    StreamingUnsupported,

    #[error("Unknown transport option: {0}")]
    UnknownTransportOption(String),

    #[error("Invalid value for transport option {name}: {reason}")]
    InvalidTransportOption { name: String, reason: String },

    #[error("cURL error {code}: {description}")]
    Multi { code: i32, description: String },

    #[error("Transaction already registered: {0}")]
    AlreadyRegistered(TransactionId),

    #[error("Transaction not registered: {0}")]
    NotRegistered(TransactionId),

    #[error("No curl handle was found for token {0}")]
    HandleNotFound(usize),

    #[error("A headers event cannot be created before the transaction has a response")]
    MissingResponse,

    #[error("Failed to configure transfer handle: {0}")]
    Handle(#[from] curl::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Engine configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),
}

/// A transport failure for one request.
///
/// Carries enough context to diagnose the failure without a debugger: the
/// request method and URL, the native result code when there is one, and
/// whatever response and transfer statistics were gathered before it failed.
pub struct RequestError {
    message: String,
    method: String,
    url: String,
    code: Option<i32>,
    response: Option<Response>,
    transfer_info: Option<TransferInfo>,
    source: Option<BoxError>,
    emitted: AtomicBool,
    suppressed: AtomicBool,
}

impl RequestError {
    /// Create a failure for `request` with a free-form message.
    pub fn new(message: impl Into<String>, request: &Request) -> Self {
        Self {
            message: message.into(),
            method: request.method().to_string(),
            url: request.url().to_string(),
            code: None,
            response: None,
            transfer_info: None,
            source: None,
            emitted: AtomicBool::new(false),
            suppressed: AtomicBool::new(false),
        }
    }

    /// Failure reported by a finished native transfer.
    pub fn from_curl(request: &Request, error: &curl::Error) -> Self {
        let mut description = error.description().to_string();
        if let Some(extra) = error.extra_description() {
            description = format!("{description} ({extra})");
        }
        let code = curl_code(error);
        Self::new(
            format!("[curl] (#{code}) {description} [url] {}", request.url()),
            request,
        )
        .with_code(code)
    }

    /// Failure for a transfer that finished without ever producing a response.
    pub fn no_response(request: &Request) -> Self {
        Self::new(
            format!(
                "No response was received for {} {}",
                request.method(),
                request.url()
            ),
            request,
        )
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_response(mut self, response: Option<Response>) -> Self {
        self.response = response;
        self
    }

    pub fn with_transfer_info(mut self, info: TransferInfo) -> Self {
        self.transfer_info = Some(info);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Native result code, if the failure came from the transport.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn transfer_info(&self) -> Option<&TransferInfo> {
        self.transfer_info.as_ref()
    }

    /// Whether this failure has already been dispatched to `error` listeners.
    pub fn is_emitted(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_emitted(&self) {
        self.emitted.store(true, Ordering::Release);
    }

    /// Whether an `error` listener stopped propagation without supplying a
    /// response. A suppressed failure stays attached but is not raised.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_suppressed(&self) {
        self.suppressed.store(true, Ordering::Release);
    }
}

/// Native transfer result code as a signed integer.
///
/// `CURLcode` is unsigned on most targets; every defined code fits.
pub(crate) fn curl_code(error: &curl::Error) -> i32 {
    i32::try_from(error.code()).unwrap_or(i32::MAX)
}

impl fmt::Debug for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestError")
            .field("message", &self.message)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("code", &self.code)
            .field("has_response", &self.response.is_some())
            .field("emitted", &self.is_emitted())
            .field("suppressed", &self.is_suppressed())
            .finish()
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error returned by [`Adapter::send`](crate::ports::Adapter::send).
#[derive(Debug, Error)]
pub enum SendError {
    /// An unrecovered transport failure.
    #[error(transparent)]
    Request(Arc<RequestError>),

    /// A fatal configuration or contract error.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl SendError {
    /// The transport failure, if this is one.
    pub fn request_error(&self) -> Option<&Arc<RequestError>> {
        match self {
            SendError::Request(e) => Some(e),
            SendError::Adapter(_) => None,
        }
    }
}

impl From<Arc<RequestError>> for SendError {
    fn from(e: Arc<RequestError>) -> Self {
        SendError::Request(e)
    }
}

/// Map a native multiplexer result code to a fatal error.
///
/// `0` (OK) and `-1` (call again) are the only non-fatal codes.
pub fn check_multi_code(code: i32) -> Result<(), AdapterError> {
    const CURLM_CALL_MULTI_PERFORM: i32 = -1;
    const CURLM_OK: i32 = 0;

    if code == CURLM_OK || code == CURLM_CALL_MULTI_PERFORM {
        return Ok(());
    }
    let description = curl::MultiError::new(code).description().to_string();
    tracing::error!(code, %description, "fatal multiplexer result");
    Err(AdapterError::Multi { code, description })
}

impl From<curl::MultiError> for AdapterError {
    fn from(e: curl::MultiError) -> Self {
        AdapterError::Multi {
            code: e.code(),
            description: e.description().to_string(),
        }
    }
}

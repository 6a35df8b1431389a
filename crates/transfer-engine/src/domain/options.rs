//! Per-request transfer configuration.
//!
//! Every field maps to one compiler visitor; `curl` is the raw escape hatch
//! merged last over whatever the visitors computed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::Stream;

/// Proxy selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proxy {
    /// One proxy for every scheme.
    All(String),
    /// Proxy keyed by request scheme (`http`, `https`).
    PerScheme(BTreeMap<String, String>),
}

impl Proxy {
    /// The proxy to use for a request with `scheme`.
    pub fn for_scheme(&self, scheme: &str) -> Option<&str> {
        match self {
            Proxy::All(url) => Some(url),
            Proxy::PerScheme(map) => map.get(scheme).map(String::as_str),
        }
    }
}

/// TLS peer verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verify {
    Enabled(bool),
    /// Verify against a pinned CA bundle.
    CaBundle(PathBuf),
}

/// A client certificate or private key file, optionally password protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    pub path: PathBuf,
    pub password: Option<String>,
}

impl KeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// HTTP authentication credentials.
///
/// `scheme` is one of `basic`, `digest`, `ntlm` or `any`; it is checked when
/// the request is compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub scheme: String,
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(username, password, "basic")
    }

    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            scheme: scheme.into(),
        }
    }
}

/// Diagnostic output.
#[derive(Debug, Clone)]
pub enum DebugOutput {
    Enabled(bool),
    /// Write transport diagnostics into this stream.
    Sink(Stream),
}

/// Response body destination.
#[derive(Debug, Clone)]
pub enum SaveTo {
    /// Opened in write mode when the first byte arrives.
    Path(PathBuf),
    Stream(Stream),
}

impl SaveTo {
    pub fn into_stream(self) -> Stream {
        match self {
            SaveTo::Path(path) => Stream::lazy_file(path),
            SaveTo::Stream(stream) => stream,
        }
    }
}

/// Value of a raw transport option override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

/// Per-request configuration consumed by the option compilers.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub connect_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
    pub proxy: Option<Proxy>,
    pub verify: Option<Verify>,
    pub cert: Option<KeyFile>,
    pub ssl_key: Option<KeyFile>,
    pub auth: Option<Credentials>,
    pub debug: Option<DebugOutput>,
    pub save_to: Option<SaveTo>,
    /// Deliver the response body incrementally instead of buffering it.
    pub stream: bool,
    /// Let the transport negotiate and decode content encodings.
    pub decode_content: bool,
    /// Always hand the request body to the transport in memory.
    pub body_as_string: bool,
    /// Raw transport options keyed by symbolic name or numeric id.
    pub curl: BTreeMap<String, RawValue>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            timeout: None,
            proxy: None,
            verify: None,
            cert: None,
            ssl_key: None,
            auth: None,
            debug: None,
            save_to: None,
            stream: false,
            decode_content: true,
            body_as_string: false,
            curl: BTreeMap::new(),
        }
    }
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_verify(mut self, verify: Verify) -> Self {
        self.verify = Some(verify);
        self
    }

    pub fn with_cert(mut self, cert: KeyFile) -> Self {
        self.cert = Some(cert);
        self
    }

    pub fn with_ssl_key(mut self, key: KeyFile) -> Self {
        self.ssl_key = Some(key);
        self
    }

    pub fn with_auth(mut self, auth: Credentials) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_debug(mut self, debug: DebugOutput) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_save_to(mut self, save_to: SaveTo) -> Self {
        self.save_to = Some(save_to);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_decode_content(mut self, decode: bool) -> Self {
        self.decode_content = decode;
        self
    }

    pub fn with_body_as_string(mut self, eager: bool) -> Self {
        self.body_as_string = eager;
        self
    }

    pub fn with_curl_option(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.curl.insert(name.into(), value.into());
        self
    }
}

//! Compiled transport options and their application to a curl handle.
//!
//! The compiler produces a [`TransportOptions`] value that can be inspected
//! without touching libcurl. [`TransportOptions::apply`] then maps every
//! option onto the corresponding `Easy2` setter.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use curl::easy::{Auth, Easy2, Handler, HttpVersion, List};

use crate::domain::{RawValue, Stream};
use crate::error::AdapterError;

/// `CURLAUTH_*` bits.
pub const AUTH_BASIC: i64 = 1;
pub const AUTH_DIGEST: i64 = 1 << 1;
pub const AUTH_NTLM: i64 = 1 << 3;
/// `CURLAUTH_ANY`: every method except IE-flavoured digest.
pub const AUTH_ANY: i64 = !(1 << 4);

/// `CURL_HTTP_VERSION_*` values.
pub const HTTP_VERSION_1_0: i64 = 1;
pub const HTTP_VERSION_1_1: i64 = 2;
pub const HTTP_VERSION_2_0: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Int,
    Text,
    Bytes,
    Path,
}

macro_rules! curl_options {
    ($( $variant:ident = $id:literal, $kind:ident, [$($name:literal),+] );+ $(;)?) => {
        /// The libcurl options the engine knows how to set.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum CurlOpt {
            $($variant),+
        }

        impl CurlOpt {
            /// Native `CURLOPT_*` identifier.
            pub const fn id(self) -> i64 {
                match self {
                    $(CurlOpt::$variant => $id),+
                }
            }

            fn kind(self) -> Kind {
                match self {
                    $(CurlOpt::$variant => Kind::$kind),+
                }
            }

            /// Canonical `CURLOPT_*` name.
            pub fn name(self) -> &'static str {
                match self {
                    $(CurlOpt::$variant => [$(concat!("CURLOPT_", $name)),+][0]),+
                }
            }

            fn from_bare_name(name: &str) -> Option<Self> {
                $(
                    if [$($name),+].iter().any(|n| n.eq_ignore_ascii_case(name)) {
                        return Some(CurlOpt::$variant);
                    }
                )+
                None
            }
        }
    };
}

curl_options! {
    Url = 10002, Text, ["URL"];
    Timeout = 13, Int, ["TIMEOUT"];
    TimeoutMs = 155, Int, ["TIMEOUT_MS"];
    ConnectTimeout = 78, Int, ["CONNECTTIMEOUT"];
    ConnectTimeoutMs = 156, Int, ["CONNECTTIMEOUT_MS"];
    HttpVersion = 84, Int, ["HTTP_VERSION"];
    SslVerifyPeer = 64, Bool, ["SSL_VERIFYPEER"];
    SslVerifyHost = 81, Int, ["SSL_VERIFYHOST"];
    CaInfo = 10065, Path, ["CAINFO"];
    SslCert = 10025, Path, ["SSLCERT"];
    KeyPassword = 10026, Text, ["KEYPASSWD", "SSLCERTPASSWD", "SSLKEYPASSWD"];
    SslKey = 10087, Path, ["SSLKEY"];
    Proxy = 10004, Text, ["PROXY"];
    Username = 10173, Text, ["USERNAME"];
    Password = 10174, Text, ["PASSWORD"];
    HttpAuth = 107, Int, ["HTTPAUTH"];
    Verbose = 41, Bool, ["VERBOSE"];
    NoBody = 44, Bool, ["NOBODY"];
    CustomRequest = 10036, Text, ["CUSTOMREQUEST"];
    PostFields = 10165, Bytes, ["COPYPOSTFIELDS", "POSTFIELDS"];
    Upload = 46, Bool, ["UPLOAD"];
    InFileSize = 30115, Int, ["INFILESIZE_LARGE", "INFILESIZE"];
    AcceptEncoding = 10102, Text, ["ACCEPT_ENCODING", "ENCODING"];
    UserAgent = 10018, Text, ["USERAGENT"];
    Referer = 10016, Text, ["REFERER"];
    FollowLocation = 52, Bool, ["FOLLOWLOCATION"];
    MaxRedirs = 68, Int, ["MAXREDIRS"];
    NoSignal = 99, Bool, ["NOSIGNAL"];
    LowSpeedLimit = 19, Int, ["LOW_SPEED_LIMIT"];
    LowSpeedTime = 20, Int, ["LOW_SPEED_TIME"];
    ForbidReuse = 75, Bool, ["FORBID_REUSE"];
    FreshConnect = 74, Bool, ["FRESH_CONNECT"];
    TcpNoDelay = 121, Bool, ["TCP_NODELAY"];
}

impl CurlOpt {
    /// Resolve a symbolic name (`CURLOPT_TIMEOUT_MS`, `timeout_ms`) or a
    /// numeric identifier (`"155"`).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Ok(id) = name.parse::<i64>() {
            return Self::from_id(id);
        }
        let bare = match name.get(..8) {
            Some(prefix) if prefix.eq_ignore_ascii_case("CURLOPT_") => &name[8..],
            _ => name,
        };
        Self::from_bare_name(bare)
    }

    pub fn from_id(id: i64) -> Option<Self> {
        const LEGACY: [(i64, CurlOpt); 2] = [(10015, CurlOpt::PostFields), (14, CurlOpt::InFileSize)];
        if let Some((_, opt)) = LEGACY.iter().find(|(legacy, _)| *legacy == id) {
            return Some(*opt);
        }
        ALL.iter().copied().find(|opt| opt.id() == id)
    }
}

const ALL: [CurlOpt; 33] = [
    CurlOpt::Url,
    CurlOpt::Timeout,
    CurlOpt::TimeoutMs,
    CurlOpt::ConnectTimeout,
    CurlOpt::ConnectTimeoutMs,
    CurlOpt::HttpVersion,
    CurlOpt::SslVerifyPeer,
    CurlOpt::SslVerifyHost,
    CurlOpt::CaInfo,
    CurlOpt::SslCert,
    CurlOpt::KeyPassword,
    CurlOpt::SslKey,
    CurlOpt::Proxy,
    CurlOpt::Username,
    CurlOpt::Password,
    CurlOpt::HttpAuth,
    CurlOpt::Verbose,
    CurlOpt::NoBody,
    CurlOpt::CustomRequest,
    CurlOpt::PostFields,
    CurlOpt::Upload,
    CurlOpt::InFileSize,
    CurlOpt::AcceptEncoding,
    CurlOpt::UserAgent,
    CurlOpt::Referer,
    CurlOpt::FollowLocation,
    CurlOpt::MaxRedirs,
    CurlOpt::NoSignal,
    CurlOpt::LowSpeedLimit,
    CurlOpt::LowSpeedTime,
    CurlOpt::ForbidReuse,
    CurlOpt::FreshConnect,
    CurlOpt::TcpNoDelay,
];

/// Value of one compiled option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl OptionValue {
    /// Convert a raw override to the value type `opt` expects.
    pub fn from_raw(opt: CurlOpt, raw: &RawValue) -> Result<Self, AdapterError> {
        let invalid = |reason: &str| AdapterError::InvalidTransportOption {
            name: opt.name().to_string(),
            reason: reason.to_string(),
        };
        Ok(match (opt.kind(), raw) {
            (Kind::Bool, RawValue::Bool(b)) => OptionValue::Bool(*b),
            (Kind::Bool, RawValue::Int(i)) => OptionValue::Bool(*i != 0),
            (Kind::Int, RawValue::Int(i)) => OptionValue::Int(*i),
            (Kind::Int, RawValue::Bool(b)) => OptionValue::Int(i64::from(*b)),
            (Kind::Int, RawValue::Text(s)) => OptionValue::Int(
                s.trim()
                    .parse()
                    .map_err(|_| invalid("expected an integer"))?,
            ),
            (Kind::Text, RawValue::Text(s)) => OptionValue::Text(s.clone()),
            (Kind::Text, RawValue::Int(i)) => OptionValue::Text(i.to_string()),
            (Kind::Bytes, RawValue::Text(s)) => OptionValue::Bytes(s.clone().into_bytes()),
            (Kind::Path, RawValue::Text(s)) => OptionValue::Path(PathBuf::from(s)),
            (Kind::Bool, RawValue::Text(_)) => return Err(invalid("expected a boolean")),
            _ => return Err(invalid("expected a string")),
        })
    }

    fn invalid(&self, opt: CurlOpt) -> AdapterError {
        AdapterError::InvalidTransportOption {
            name: opt.name().to_string(),
            reason: format!("unexpected value {self:?}"),
        }
    }

    fn as_bool(&self, opt: CurlOpt) -> Result<bool, AdapterError> {
        match self {
            OptionValue::Bool(b) => Ok(*b),
            OptionValue::Int(i) => Ok(*i != 0),
            _ => Err(self.invalid(opt)),
        }
    }

    fn as_int(&self, opt: CurlOpt) -> Result<i64, AdapterError> {
        match self {
            OptionValue::Int(i) => Ok(*i),
            OptionValue::Bool(b) => Ok(i64::from(*b)),
            _ => Err(self.invalid(opt)),
        }
    }

    fn as_u64(&self, opt: CurlOpt) -> Result<u64, AdapterError> {
        u64::try_from(self.as_int(opt)?).map_err(|_| self.invalid(opt))
    }

    fn as_text(&self, opt: CurlOpt) -> Result<&str, AdapterError> {
        match self {
            OptionValue::Text(s) => Ok(s),
            _ => Err(self.invalid(opt)),
        }
    }

    fn as_path(&self, opt: CurlOpt) -> Result<PathBuf, AdapterError> {
        match self {
            OptionValue::Path(p) => Ok(p.clone()),
            OptionValue::Text(s) => Ok(PathBuf::from(s)),
            _ => Err(self.invalid(opt)),
        }
    }
}

/// Where transport diagnostics go.
#[derive(Debug, Clone)]
pub enum DebugSink {
    /// `tracing` events on the `transfer_engine::wire` target.
    Log,
    Stream(Stream),
}

/// Everything the transport needs for one transfer.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    options: BTreeMap<CurlOpt, OptionValue>,
    headers: Vec<String>,
    read_body: bool,
    save_to: Option<Stream>,
    debug: Option<DebugSink>,
}

impl TransportOptions {
    pub fn get(&self, opt: CurlOpt) -> Option<&OptionValue> {
        self.options.get(&opt)
    }

    pub fn contains(&self, opt: CurlOpt) -> bool {
        self.options.contains_key(&opt)
    }

    pub fn set(&mut self, opt: CurlOpt, value: OptionValue) {
        self.options.insert(opt, value);
    }

    pub fn remove(&mut self, opt: CurlOpt) -> Option<OptionValue> {
        self.options.remove(&opt)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CurlOpt, &OptionValue)> {
        self.options.iter().map(|(k, v)| (*k, v))
    }

    /// Explicit header lines, in send order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn push_header(&mut self, line: impl Into<String>) {
        self.headers.push(line.into());
    }

    /// Whether an explicit line for header `name` is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|line| header_name(line).eq_ignore_ascii_case(name))
    }

    /// Whether the transport pulls the request body through the read callback.
    pub fn reads_body(&self) -> bool {
        self.read_body
    }

    pub(crate) fn set_reads_body(&mut self, reads: bool) {
        self.read_body = reads;
    }

    pub fn save_to(&self) -> Option<&Stream> {
        self.save_to.as_ref()
    }

    pub(crate) fn set_save_to(&mut self, stream: Stream) {
        self.save_to = Some(stream);
    }

    pub fn debug_sink(&self) -> Option<&DebugSink> {
        self.debug.as_ref()
    }

    pub(crate) fn set_debug_sink(&mut self, sink: DebugSink) {
        self.debug = Some(sink);
    }

    /// Configure `easy` with every compiled option and header line.
    pub fn apply<H: Handler>(&self, easy: &mut Easy2<H>) -> Result<(), AdapterError> {
        for (opt, value) in &self.options {
            apply_one(easy, *opt, value)?;
        }
        let mut list = List::new();
        for line in &self.headers {
            list.append(line)?;
        }
        easy.http_headers(list)?;
        Ok(())
    }
}

fn header_name(line: &str) -> &str {
    line.split_once(':').map_or(line, |(name, _)| name).trim()
}

fn apply_one<H: Handler>(easy: &mut Easy2<H>, opt: CurlOpt, value: &OptionValue) -> Result<(), AdapterError> {
    match opt {
        CurlOpt::Url => easy.url(value.as_text(opt)?)?,
        CurlOpt::Timeout => easy.timeout(Duration::from_secs(value.as_u64(opt)?))?,
        CurlOpt::TimeoutMs => easy.timeout(Duration::from_millis(value.as_u64(opt)?))?,
        CurlOpt::ConnectTimeout => easy.connect_timeout(Duration::from_secs(value.as_u64(opt)?))?,
        CurlOpt::ConnectTimeoutMs => {
            easy.connect_timeout(Duration::from_millis(value.as_u64(opt)?))?
        }
        CurlOpt::HttpVersion => easy.http_version(match value.as_int(opt)? {
            HTTP_VERSION_1_0 => HttpVersion::V10,
            HTTP_VERSION_1_1 => HttpVersion::V11,
            HTTP_VERSION_2_0 => HttpVersion::V2,
            _ => HttpVersion::Any,
        })?,
        CurlOpt::SslVerifyPeer => easy.ssl_verify_peer(value.as_bool(opt)?)?,
        CurlOpt::SslVerifyHost => easy.ssl_verify_host(value.as_int(opt)? != 0)?,
        CurlOpt::CaInfo => easy.cainfo(value.as_path(opt)?)?,
        CurlOpt::SslCert => easy.ssl_cert(value.as_path(opt)?)?,
        CurlOpt::KeyPassword => easy.key_password(value.as_text(opt)?)?,
        CurlOpt::SslKey => easy.ssl_key(value.as_path(opt)?)?,
        CurlOpt::Proxy => easy.proxy(value.as_text(opt)?)?,
        CurlOpt::Username => easy.username(value.as_text(opt)?)?,
        CurlOpt::Password => easy.password(value.as_text(opt)?)?,
        CurlOpt::HttpAuth => {
            let bits = value.as_int(opt)?;
            let mut auth = Auth::new();
            auth.basic(bits & AUTH_BASIC != 0)
                .digest(bits & AUTH_DIGEST != 0)
                .ntlm(bits & AUTH_NTLM != 0);
            easy.http_auth(&auth)?
        }
        CurlOpt::Verbose => easy.verbose(value.as_bool(opt)?)?,
        CurlOpt::NoBody => easy.nobody(value.as_bool(opt)?)?,
        CurlOpt::CustomRequest => easy.custom_request(value.as_text(opt)?)?,
        CurlOpt::PostFields => match value {
            OptionValue::Bytes(bytes) => easy.post_fields_copy(bytes)?,
            OptionValue::Text(text) => easy.post_fields_copy(text.as_bytes())?,
            other => return Err(other.invalid(opt)),
        },
        CurlOpt::Upload => easy.upload(value.as_bool(opt)?)?,
        CurlOpt::InFileSize => easy.in_filesize(value.as_u64(opt)?)?,
        CurlOpt::AcceptEncoding => easy.accept_encoding(value.as_text(opt)?)?,
        CurlOpt::UserAgent => easy.useragent(value.as_text(opt)?)?,
        CurlOpt::Referer => easy.referer(value.as_text(opt)?)?,
        CurlOpt::FollowLocation => easy.follow_location(value.as_bool(opt)?)?,
        CurlOpt::MaxRedirs => easy.max_redirections(
            u32::try_from(value.as_int(opt)?).map_err(|_| value.invalid(opt))?,
        )?,
        CurlOpt::NoSignal => easy.signal(!value.as_bool(opt)?)?,
        CurlOpt::LowSpeedLimit => easy.low_speed_limit(
            u32::try_from(value.as_int(opt)?).map_err(|_| value.invalid(opt))?,
        )?,
        CurlOpt::LowSpeedTime => easy.low_speed_time(Duration::from_secs(value.as_u64(opt)?))?,
        CurlOpt::ForbidReuse => easy.forbid_reuse(value.as_bool(opt)?)?,
        CurlOpt::FreshConnect => easy.fresh_connect(value.as_bool(opt)?)?,
        CurlOpt::TcpNoDelay => easy.tcp_nodelay(value.as_bool(opt)?)?,
    }
    Ok(())
}

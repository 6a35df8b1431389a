//! Request to transport option compilation.
//!
//! Compilation runs in a fixed order: base options, method policy (which
//! may pull in the body policy), header policy, the per-key visitors, and
//! finally the raw `curl` overrides, which win over everything else.

use std::path::Path;
use std::time::Duration;

use tracing::trace;

use super::options::{
    CurlOpt, DebugSink, OptionValue, TransportOptions, AUTH_ANY, AUTH_BASIC, AUTH_DIGEST,
    AUTH_NTLM, HTTP_VERSION_1_0, HTTP_VERSION_1_1,
};
use crate::domain::{DebugOutput, EngineConfig, Headers, Request, Stream, Verify};
use crate::error::AdapterError;

type Visitor = fn(&Request, &mut TransportOptions) -> Result<bool, AdapterError>;

/// Per-key visitors, applied in this order after the header policy.
const VISITORS: &[(&str, Visitor)] = &[
    ("proxy", visit_proxy),
    ("timeout", visit_timeout),
    ("connect_timeout", visit_connect_timeout),
    ("verify", visit_verify),
    ("cert", visit_cert),
    ("ssl_key", visit_ssl_key),
    ("auth", visit_auth),
    ("debug", visit_debug),
    ("save_to", visit_save_to),
    ("decode_content", visit_decode_content),
];

/// Compiles requests into [`TransportOptions`].
#[derive(Debug, Clone)]
pub struct OptionCompiler {
    connect_timeout: Duration,
    eager_body_threshold: u64,
}

impl Default for OptionCompiler {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl OptionCompiler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            eager_body_threshold: config.eager_body_threshold,
        }
    }

    /// Build the full option set for `request`.
    ///
    /// Fails fast on configuration that can never succeed: a missing CA
    /// bundle, certificate or key, an unknown auth scheme, an unknown raw
    /// option, or a request asking for a streamed body.
    pub fn compile(&self, request: &Request) -> Result<TransportOptions, AdapterError> {
        let config = request.config();
        if config.stream {
            return Err(AdapterError::StreamingUnsupported);
        }

        let mut options = TransportOptions::default();
        options.set(CurlOpt::Url, OptionValue::Text(strip_fragment(request.url()).to_string()));
        options.set(
            CurlOpt::ConnectTimeoutMs,
            OptionValue::Int(duration_ms(self.connect_timeout)),
        );
        options.set(
            CurlOpt::HttpVersion,
            OptionValue::Int(if request.protocol_version() == "1.0" {
                HTTP_VERSION_1_0
            } else {
                HTTP_VERSION_1_1
            }),
        );
        options.set(CurlOpt::SslVerifyPeer, OptionValue::Bool(true));
        options.set(CurlOpt::SslVerifyHost, OptionValue::Int(2));

        let mut headers = request.headers().clone();
        let blank_content_type = self.apply_method(request, &mut headers, &mut options)?;
        apply_headers(headers, blank_content_type, &mut options);

        for (key, visit) in VISITORS {
            if visit(request, &mut options)? {
                trace!(option = *key, url = %request.url(), "applied request option");
            }
        }

        for (name, raw) in &config.curl {
            let opt = CurlOpt::from_name(name)
                .ok_or_else(|| AdapterError::UnknownTransportOption(name.clone()))?;
            options.set(opt, OptionValue::from_raw(opt, raw)?);
        }

        Ok(options)
    }

    /// Returns whether a blank `Content-Type:` line must suppress the
    /// transport's default form content type.
    fn apply_method(
        &self,
        request: &Request,
        headers: &mut Headers,
        options: &mut TransportOptions,
    ) -> Result<bool, AdapterError> {
        match request.method() {
            "HEAD" => {
                options.set(CurlOpt::NoBody, OptionValue::Bool(true));
                options.set_reads_body(false);
                Ok(false)
            }
            "GET" => Ok(false),
            method => {
                options.set(CurlOpt::CustomRequest, OptionValue::Text(method.to_string()));
                match request.body() {
                    Some(body) => self.apply_body(request, body, headers, options),
                    None => {
                        options.set_reads_body(false);
                        Ok(false)
                    }
                }
            }
        }
    }

    fn apply_body(
        &self,
        request: &Request,
        body: &Stream,
        headers: &mut Headers,
        options: &mut TransportOptions,
    ) -> Result<bool, AdapterError> {
        let size = body.size();
        let eager = request.config().body_as_string
            || size.is_some_and(|size| size < self.eager_body_threshold);

        if eager {
            options.set(CurlOpt::PostFields, OptionValue::Bytes(body.contents()?));
            options.set_reads_body(false);
            headers.remove("Content-Length");
            headers.remove("Transfer-Encoding");
            return Ok(!headers.has("Content-Type"));
        }

        options.set(CurlOpt::Upload, OptionValue::Bool(true));
        options.set_reads_body(true);
        headers.remove("Content-Length");
        match size {
            Some(size) => {
                let size = i64::try_from(size).map_err(|_| AdapterError::InvalidTransportOption {
                    name: CurlOpt::InFileSize.name().to_string(),
                    reason: format!("body of {size} bytes is too large"),
                })?;
                options.set(CurlOpt::InFileSize, OptionValue::Int(size));
            }
            None => {
                if !headers.has("Transfer-Encoding") {
                    headers.set("Transfer-Encoding", "chunked");
                }
            }
        }
        Ok(false)
    }
}

fn apply_headers(mut headers: Headers, blank_content_type: bool, options: &mut TransportOptions) {
    if let Some(encoding) = headers.get("Accept-Encoding") {
        options.set(CurlOpt::AcceptEncoding, OptionValue::Text(encoding));
        headers.remove("Accept-Encoding");
    }

    for line in headers.to_lines() {
        options.push_header(line);
    }
    if blank_content_type {
        options.push_header("Content-Type:");
    }
    // Suppress headers the transport would otherwise add on its own.
    if !headers.has("Expect") {
        options.push_header("Expect:");
    }
    if !headers.has("Accept") {
        options.push_header("Accept:");
    }
}

fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(before, _)| before)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn visit_proxy(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    let scheme = request.scheme();
    let Some(proxy) = request.config().proxy.as_ref().and_then(|p| p.for_scheme(&scheme)) else {
        return Ok(false);
    };
    options.set(CurlOpt::Proxy, OptionValue::Text(proxy.to_string()));
    Ok(true)
}

fn visit_timeout(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    let Some(timeout) = request.config().timeout else {
        return Ok(false);
    };
    options.set(CurlOpt::TimeoutMs, OptionValue::Int(duration_ms(timeout)));
    Ok(true)
}

fn visit_connect_timeout(
    request: &Request,
    options: &mut TransportOptions,
) -> Result<bool, AdapterError> {
    let Some(timeout) = request.config().connect_timeout else {
        return Ok(false);
    };
    options.set(CurlOpt::ConnectTimeoutMs, OptionValue::Int(duration_ms(timeout)));
    Ok(true)
}

fn visit_verify(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    match &request.config().verify {
        None => return Ok(false),
        Some(Verify::Enabled(false)) => {
            options.set(CurlOpt::SslVerifyPeer, OptionValue::Bool(false));
            options.set(CurlOpt::SslVerifyHost, OptionValue::Int(0));
            options.remove(CurlOpt::CaInfo);
        }
        Some(Verify::Enabled(true)) => {
            options.set(CurlOpt::SslVerifyPeer, OptionValue::Bool(true));
            options.set(CurlOpt::SslVerifyHost, OptionValue::Int(2));
        }
        Some(Verify::CaBundle(path)) => {
            if !path.exists() {
                return Err(AdapterError::CaBundleNotFound(path.clone()));
            }
            options.set(CurlOpt::CaInfo, OptionValue::Path(path.clone()));
            options.set(CurlOpt::SslVerifyPeer, OptionValue::Bool(true));
            options.set(CurlOpt::SslVerifyHost, OptionValue::Int(2));
        }
    }
    Ok(true)
}

fn visit_cert(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    let Some(cert) = &request.config().cert else {
        return Ok(false);
    };
    require_file(&cert.path, AdapterError::CertificateNotFound)?;
    options.set(CurlOpt::SslCert, OptionValue::Path(cert.path.clone()));
    if let Some(password) = &cert.password {
        options.set(CurlOpt::KeyPassword, OptionValue::Text(password.clone()));
    }
    Ok(true)
}

fn visit_ssl_key(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    let Some(key) = &request.config().ssl_key else {
        return Ok(false);
    };
    require_file(&key.path, AdapterError::PrivateKeyNotFound)?;
    options.set(CurlOpt::SslKey, OptionValue::Path(key.path.clone()));
    if let Some(password) = &key.password {
        options.set(CurlOpt::KeyPassword, OptionValue::Text(password.clone()));
    }
    Ok(true)
}

fn require_file(path: &Path, missing: fn(std::path::PathBuf) -> AdapterError) -> Result<(), AdapterError> {
    if path.exists() {
        Ok(())
    } else {
        Err(missing(path.to_path_buf()))
    }
}

fn visit_auth(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    let Some(auth) = &request.config().auth else {
        return Ok(false);
    };
    let bits = match auth.scheme.to_ascii_lowercase().as_str() {
        "basic" => AUTH_BASIC,
        "digest" => AUTH_DIGEST,
        "ntlm" => AUTH_NTLM,
        "any" => AUTH_ANY,
        _ => return Err(AdapterError::UnknownAuthScheme(auth.scheme.clone())),
    };
    options.set(CurlOpt::HttpAuth, OptionValue::Int(bits));
    options.set(CurlOpt::Username, OptionValue::Text(auth.username.clone()));
    options.set(CurlOpt::Password, OptionValue::Text(auth.password.clone()));
    Ok(true)
}

fn visit_debug(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    let sink = match &request.config().debug {
        None | Some(DebugOutput::Enabled(false)) => return Ok(false),
        Some(DebugOutput::Enabled(true)) => DebugSink::Log,
        Some(DebugOutput::Sink(stream)) => DebugSink::Stream(stream.clone()),
    };
    options.set(CurlOpt::Verbose, OptionValue::Bool(true));
    options.set_debug_sink(sink);
    Ok(true)
}

fn visit_save_to(request: &Request, options: &mut TransportOptions) -> Result<bool, AdapterError> {
    let Some(save_to) = &request.config().save_to else {
        return Ok(false);
    };
    options.set_save_to(save_to.clone().into_stream());
    Ok(true)
}

fn visit_decode_content(
    request: &Request,
    options: &mut TransportOptions,
) -> Result<bool, AdapterError> {
    if !request.config().decode_content || options.contains(CurlOpt::AcceptEncoding) {
        return Ok(false);
    }
    // Empty string: offer every encoding the transport can decode.
    options.set(CurlOpt::AcceptEncoding, OptionValue::Text(String::new()));
    Ok(true)
}

//! Blocking single-transfer adapter.
//!
//! Each `send` builds a dedicated `reqwest` blocking client from the
//! request's configuration, performs one exchange and reads the response
//! either fully (into memory or the `save_to` destination) or, with
//! `stream=true`, lazily from the socket.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder, Response as RawResponse};
use reqwest::{Certificate, Identity, Method, Proxy, Url, Version};
use tracing::{debug, warn};

use super::parse::{parse_header_line, parse_status_line};
use crate::domain::{
    DebugOutput, EngineConfig, Headers, Request, Response, Stream, Transaction, TransactionState,
    Verify,
};
use crate::error::{AdapterError, RequestError, SendError};
use crate::events::pipeline::{final_response, relay_listener_failure};
use crate::events::{emit_before, emit_complete, emit_error, emit_headers, Outcome};
use crate::ports::Adapter;

type Visitor = fn(&Request, &mut StreamContext) -> Result<(), AdapterError>;

const VISITORS: &[(&str, Visitor)] = &[
    ("proxy", visit_proxy),
    ("timeout", visit_timeout),
    ("connect_timeout", visit_connect_timeout),
    ("verify", visit_verify),
    ("cert", visit_cert),
    ("ssl_key", visit_ssl_key),
    ("auth", visit_auth),
    ("debug", visit_debug),
];

/// Everything one blocking exchange needs.
#[derive(Debug)]
pub struct StreamContext {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    http_10: bool,
    proxy: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Duration,
    verify: bool,
    ca_bundle: Option<Vec<u8>>,
    cert_pem: Option<Vec<u8>>,
    key_pem: Option<Vec<u8>>,
    basic_auth: Option<(String, String)>,
    decode_content: bool,
    stream: bool,
    save_to: Option<Stream>,
    debug: Option<DebugOutput>,
}

impl StreamContext {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Request headers as one CRLF separated block.
    pub fn header_block(&self) -> String {
        self.headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("\r\n")
    }

    fn client(&self) -> Result<Client, String> {
        let mut builder: ClientBuilder = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(self.connect_timeout)
            .gzip(self.decode_content)
            .deflate(self.decode_content)
            .danger_accept_invalid_certs(!self.verify);

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &self.proxy {
            Some(proxy) => builder.proxy(Proxy::all(proxy).map_err(|e| e.to_string())?),
            None => builder.no_proxy(),
        };
        if let Some(pem) = &self.ca_bundle {
            builder = builder.add_root_certificate(Certificate::from_pem(pem).map_err(|e| e.to_string())?);
        }
        if let Some(cert) = &self.cert_pem {
            let mut pem = cert.clone();
            if let Some(key) = &self.key_pem {
                pem.push(b'\n');
                pem.extend_from_slice(key);
            }
            builder = builder.identity(Identity::from_pem(&pem).map_err(|e| e.to_string())?);
        }

        builder.build().map_err(|e| e.to_string())
    }

    fn execute(&self) -> Result<RawResponse, String> {
        let url = Url::parse(&self.url).map_err(|e| format!("URL is invalid: {e}"))?;
        let client = self.client()?;
        let method = Method::from_bytes(self.method.as_bytes()).map_err(|e| e.to_string())?;

        let mut builder = client.request(method, url);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if self.http_10 {
            builder = builder.version(Version::HTTP_10);
        }
        if let Some((username, password)) = &self.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }

        builder.send().map_err(|e| e.to_string())
    }

    fn notify(&self, event: &str, detail: Option<String>) {
        let line = match detail {
            Some(detail) => format!("<{}> [{event}] {detail}", self.url),
            None => format!("<{}> [{event}]", self.url),
        };
        match &self.debug {
            Some(DebugOutput::Enabled(true)) => {
                debug!(target: "transfer_engine::wire", "{line}");
            }
            Some(DebugOutput::Sink(sink)) => {
                if let Err(e) = sink.write(format!("{line}\n").as_bytes()) {
                    warn!(error = %e, "failed to write debug output");
                }
            }
            _ => {}
        }
    }
}

/// Sends one transaction per call over a blocking connection.
#[derive(Debug, Clone, Default)]
pub struct StreamAdapter {
    config: EngineConfig,
}

impl StreamAdapter {
    pub fn new(config: EngineConfig) -> Result<Self, AdapterError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Build the exchange for `request`.
    pub fn compile(&self, request: &Request) -> Result<StreamContext, AdapterError> {
        let config = request.config();
        let body = match request.body() {
            Some(body) => Some(body.contents()?),
            None => None,
        };
        let url = request.url();

        let mut context = StreamContext {
            method: request.method().to_string(),
            url: url.split_once('#').map_or(url, |(before, _)| before).to_string(),
            headers: request
                .headers()
                .iter()
                .flat_map(|(name, values)| values.iter().map(move |v| (name.to_string(), v.clone())))
                .collect(),
            body,
            http_10: request.protocol_version() == "1.0",
            proxy: None,
            timeout: None,
            connect_timeout: self.config.connect_timeout(),
            verify: true,
            ca_bundle: None,
            cert_pem: None,
            key_pem: None,
            basic_auth: None,
            decode_content: config.decode_content,
            stream: config.stream,
            save_to: config.save_to.clone().map(|s| s.into_stream()),
            debug: None,
        };

        for (_, visit) in VISITORS {
            visit(request, &mut context)?;
        }
        Ok(context)
    }

    fn transfer(&self, tx: &Transaction) -> Result<Outcome, AdapterError> {
        let request = tx.request();
        let context = self.compile(&request)?;
        tx.set_state(TransactionState::Transferring);
        context.notify("CONNECT", None);

        let raw = match context.execute() {
            Ok(raw) => raw,
            Err(detail) => {
                let error = creation_error(&request, &context, &detail);
                return Ok(emit_error(tx, Arc::new(error)));
            }
        };

        let response = head_from(&raw);
        context.notify("MIME_TYPE_IS", response.header("Content-Type"));
        if let Some(size) = raw.content_length() {
            context.notify("FILE_SIZE_IS", Some(size.to_string()));
        }

        let length = raw.content_length();
        let body = if context.stream {
            Stream::from_reader(raw, length)
        } else {
            let destination = context.save_to.clone().unwrap_or_default();
            if let Err(e) = drain(raw, &destination) {
                let error = RequestError::new(
                    format!("Error reading response body. [url] {} [error] {e}", context.url),
                    &request,
                )
                .with_response(Some(response.clone()))
                .with_source(e);
                return Ok(emit_error(tx, Arc::new(error)));
            }
            destination
        };

        tx.set_response(response.with_body(body));
        if let Err(e) = emit_headers(tx) {
            return Ok(relay_listener_failure(tx, e));
        }
        context.notify("COMPLETED", None);
        Ok(emit_complete(tx))
    }
}

fn creation_error(request: &Request, context: &StreamContext, detail: &str) -> RequestError {
    let mut message = format!("Error creating resource. [url] {} ", context.url);
    if let Some(proxy) = context.proxy() {
        message.push_str(&format!("[proxy] {proxy} "));
    }
    message.push_str(&format!("[error] {detail}"));
    RequestError::new(message.trim_end(), request)
}

/// Response head rebuilt from the client's status and header lines.
fn head_from(raw: &RawResponse) -> Response {
    let version = match raw.version() {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    };
    let status = raw.status();
    let line = format!(
        "HTTP/{version} {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );

    let mut headers = Headers::new();
    for (name, value) in raw.headers() {
        let line = format!("{}: {}", name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        if let Some((name, value)) = parse_header_line(&line) {
            headers.add(name, value);
        }
    }

    let mut response = Response::new(status.as_u16()).with_headers(headers);
    if let Some(parsed) = parse_status_line(&line) {
        response = response
            .with_reason(parsed.reason)
            .with_protocol_version(parsed.protocol_version);
    }
    response
}

fn drain(mut raw: RawResponse, destination: &Stream) -> io::Result<()> {
    let mut sink = destination.clone();
    io::copy(&mut raw, &mut sink)?;
    if destination.is_seekable() {
        destination.rewind()?;
    }
    Ok(())
}

fn visit_proxy(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    let scheme = request.scheme();
    context.proxy = request
        .config()
        .proxy
        .as_ref()
        .and_then(|p| p.for_scheme(&scheme))
        .map(str::to_string);
    Ok(())
}

fn visit_timeout(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    context.timeout = request.config().timeout;
    Ok(())
}

fn visit_connect_timeout(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    if let Some(timeout) = request.config().connect_timeout {
        context.connect_timeout = timeout;
    }
    Ok(())
}

fn visit_verify(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    match &request.config().verify {
        None | Some(Verify::Enabled(true)) => context.verify = true,
        Some(Verify::Enabled(false)) => context.verify = false,
        Some(Verify::CaBundle(path)) => {
            if !path.exists() {
                return Err(AdapterError::CaBundleNotFound(path.clone()));
            }
            context.verify = true;
            context.ca_bundle = Some(std::fs::read(path)?);
        }
    }
    Ok(())
}

fn visit_cert(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    let Some(cert) = &request.config().cert else {
        return Ok(());
    };
    if !cert.path.exists() {
        return Err(AdapterError::CertificateNotFound(cert.path.clone()));
    }
    if cert.password.is_some() {
        return Err(AdapterError::InvalidTransportOption {
            name: "cert".into(),
            reason: "password protected certificates need the curl adapter".into(),
        });
    }
    context.cert_pem = Some(std::fs::read(&cert.path)?);
    Ok(())
}

fn visit_ssl_key(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    let Some(key) = &request.config().ssl_key else {
        return Ok(());
    };
    if !key.path.exists() {
        return Err(AdapterError::PrivateKeyNotFound(key.path.clone()));
    }
    if key.password.is_some() {
        return Err(AdapterError::InvalidTransportOption {
            name: "ssl_key".into(),
            reason: "password protected keys need the curl adapter".into(),
        });
    }
    context.key_pem = Some(std::fs::read(&key.path)?);
    Ok(())
}

fn visit_auth(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    let Some(auth) = &request.config().auth else {
        return Ok(());
    };
    match auth.scheme.to_ascii_lowercase().as_str() {
        "basic" => {
            context.basic_auth = Some((auth.username.clone(), auth.password.clone()));
            Ok(())
        }
        "digest" | "ntlm" | "any" => Err(AdapterError::InvalidTransportOption {
            name: "auth".into(),
            reason: format!("{} authentication needs the curl adapter", auth.scheme),
        }),
        _ => Err(AdapterError::UnknownAuthScheme(auth.scheme.clone())),
    }
}

fn visit_debug(request: &Request, context: &mut StreamContext) -> Result<(), AdapterError> {
    context.debug = request.config().debug.clone();
    Ok(())
}

impl Adapter for StreamAdapter {
    fn send(&self, transaction: &Transaction) -> Result<Response, SendError> {
        // The blocking client reads to EOF; keep-alive would stall it.
        transaction.with_request_mut(|r| {
            if r.protocol_version() == "1.1" && !r.headers().has("Connection") {
                r.headers_mut().set("Connection", "close");
            }
        });

        loop {
            let outcome = match emit_before(transaction) {
                Outcome::Proceed => self.transfer(transaction)?,
                settled => settled,
            };
            match outcome {
                Outcome::Retry(delay) => {
                    debug!(transaction = %transaction.id(), ?delay, "retrying");
                    if let Some(delay) = delay {
                        std::thread::sleep(delay);
                    }
                }
                Outcome::Failed(error) => return Err(SendError::Request(error)),
                _ => return final_response(transaction),
            }
        }
    }
}

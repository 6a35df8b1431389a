//! Incoming response message.

use super::{Headers, Stream};

/// An HTTP response.
///
/// Clones share the body stream.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    reason: String,
    protocol_version: String,
    headers: Headers,
    body: Stream,
    effective_url: Option<String>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: canonical_reason(status).to_string(),
            protocol_version: "1.1".to_string(),
            headers: Headers::new(),
            body: Stream::empty(),
            effective_url: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Stream>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// All values of header `name` joined with `", "`.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Stream {
        &self.body
    }

    pub fn set_body(&mut self, body: Stream) {
        self.body = body;
    }

    pub fn effective_url(&self) -> Option<&str> {
        self.effective_url.as_deref()
    }

    pub fn set_effective_url(&mut self, url: impl Into<String>) {
        self.effective_url = Some(url.into());
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

//! Outgoing request message.

use super::{Headers, RequestConfig, Stream};
use crate::events::Emitter;

/// An HTTP request with its own event emitter and transfer configuration.
///
/// Cloning a request clones its listener list; the clones then evolve
/// independently. Bodies are shared [`Stream`] handles.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    url: String,
    protocol_version: String,
    headers: Headers,
    body: Option<Stream>,
    config: RequestConfig,
    emitter: Emitter,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            protocol_version: "1.1".to_string(),
            headers: Headers::new(),
            body: None,
            config: RequestConfig::default(),
            emitter: Emitter::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new("HEAD", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new("PUT", url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Stream>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// URL scheme, lower-cased. Defaults to `http` for scheme-less URLs.
    pub fn scheme(&self) -> String {
        match self.url.split_once("://") {
            Some((scheme, _)) => scheme.to_ascii_lowercase(),
            None => "http".to_string(),
        }
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

    pub fn body(&self) -> Option<&Stream> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: Option<Stream>) {
        self.body = body;
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RequestConfig {
        &mut self.config
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn emitter_mut(&mut self) -> &mut Emitter {
        &mut self.emitter
    }
}

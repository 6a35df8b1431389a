//! Per-transfer callbacks between libcurl and a transaction.
//!
//! The mediator assembles the response head line by line, emits `headers`
//! once the head is complete, and then streams body bytes into the
//! response. It also feeds streamed request bodies to the transport.

use std::io::SeekFrom;

use curl::easy::{Handler, InfoType, ReadError, SeekResult, WriteError};
use tracing::{debug, trace, warn};

use super::options::DebugSink;
use crate::adapters::parse::{parse_header_line, parse_status_line};
use crate::domain::{Headers, Response, Stream, Transaction};
use crate::events::emit_headers;

pub struct Mediator {
    transaction: Transaction,
    request_body: Option<Stream>,
    body: Option<Stream>,
    status: u16,
    reason: String,
    protocol_version: String,
    headers: Headers,
    debug: Option<DebugSink>,
    headers_failure: Option<anyhow::Error>,
}

impl Mediator {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            request_body: None,
            body: None,
            status: 0,
            reason: String::new(),
            protocol_version: String::new(),
            headers: Headers::new(),
            debug: None,
            headers_failure: None,
        }
    }

    /// Body the transport reads for streamed uploads. Rewound when seekable.
    pub fn with_request_body(mut self, body: Option<Stream>) -> Self {
        if let Some(body) = &body {
            if body.is_seekable() {
                if let Err(e) = body.rewind() {
                    warn!(transaction = %self.transaction.id(), error = %e, "could not rewind request body");
                }
            }
        }
        self.request_body = body;
        self
    }

    /// Pre-selected destination for a successful response body.
    pub fn with_response_body(mut self, body: Option<Stream>) -> Self {
        self.body = body;
        self
    }

    pub fn with_debug(mut self, sink: Option<DebugSink>) -> Self {
        self.debug = sink;
        self
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Failure raised by a `headers` listener, which aborted the transfer.
    pub fn take_headers_failure(&mut self) -> Option<anyhow::Error> {
        self.headers_failure.take()
    }

    /// Handle one raw header line. Returns the number of bytes consumed;
    /// anything other than `line.len()` aborts the transfer.
    pub fn receive_header_line(&mut self, line: &[u8]) -> usize {
        let length = line.len();
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);

        if text.starts_with("HTTP/") {
            if let Some(status) = parse_status_line(text) {
                // Only a 2xx body may land in a caller-chosen destination.
                if !(200..300).contains(&status.status) {
                    self.body = None;
                }
                self.status = status.status;
                self.reason = status.reason;
                self.protocol_version = status.protocol_version;
                self.headers.clear();
            }
        } else if text.is_empty() {
            // Interim 1xx heads end with a blank line too.
            if self.status >= 200 && !self.create_response() {
                return 0;
            }
        } else if let Some((name, value)) = parse_header_line(text) {
            self.headers.add(name, value);
        }

        length
    }

    fn create_response(&mut self) -> bool {
        let response = Response::new(self.status)
            .with_reason(std::mem::take(&mut self.reason))
            .with_protocol_version(self.protocol_version.clone())
            .with_headers(std::mem::take(&mut self.headers))
            .with_body(self.body.clone().unwrap_or_default());
        self.transaction.set_response(response);
        trace!(transaction = %self.transaction.id(), status = self.status, "response head received");

        match emit_headers(&self.transaction) {
            Ok(()) => true,
            Err(e) => {
                debug!(transaction = %self.transaction.id(), error = %e, "headers listener failed, aborting transfer");
                self.headers_failure = Some(e);
                false
            }
        }
    }

    /// Append body bytes to the response. Returns 0 when there is no
    /// response to write to, which makes the transport fail the transfer.
    pub fn write_body(&mut self, data: &[u8]) -> usize {
        let Some(body) = self.transaction.with_response_mut(|r| r.body().clone()) else {
            return 0;
        };
        match body.write(data) {
            Ok(written) => written,
            Err(e) => {
                warn!(transaction = %self.transaction.id(), error = %e, "failed to write response body");
                0
            }
        }
    }

    /// Fill `buf` from the request body. `Ok(0)` signals the end of it.
    pub fn read_body(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &self.request_body {
            Some(body) => body.read(buf),
            None => Ok(0),
        }
    }

    fn record_debug(&mut self, kind: InfoType, data: &[u8]) {
        let prefix = match kind {
            InfoType::Text => "*",
            InfoType::HeaderIn => "<",
            InfoType::HeaderOut => ">",
            _ => return,
        };
        let Some(sink) = &self.debug else {
            return;
        };
        let text = String::from_utf8_lossy(data);
        // The blank line closing a header block carries nothing to record.
        let lines = text.lines().filter(|line| !line.trim().is_empty());
        match sink {
            DebugSink::Log => {
                for line in lines {
                    debug!(target: "transfer_engine::wire", transaction = %self.transaction.id(), "{prefix} {line}");
                }
            }
            DebugSink::Stream(stream) => {
                for line in lines {
                    if let Err(e) = stream.write(format!("{prefix} {line}\n").as_bytes()) {
                        warn!(error = %e, "failed to write debug output");
                        return;
                    }
                }
            }
        }
    }
}

impl Handler for Mediator {
    fn header(&mut self, data: &[u8]) -> bool {
        self.receive_header_line(data) == data.len()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        Ok(self.write_body(data))
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        self.read_body(data).map_err(|e| {
            warn!(transaction = %self.transaction.id(), error = %e, "failed to read request body");
            ReadError::Abort
        })
    }

    fn seek(&mut self, whence: SeekFrom) -> SeekResult {
        match (&self.request_body, whence) {
            (Some(body), SeekFrom::Start(0)) if body.is_seekable() => match body.rewind() {
                Ok(()) => SeekResult::Ok,
                Err(_) => SeekResult::Fail,
            },
            _ => SeekResult::CantSeek,
        }
    }

    fn debug(&mut self, kind: InfoType, data: &[u8]) {
        self.record_debug(kind, data);
    }
}

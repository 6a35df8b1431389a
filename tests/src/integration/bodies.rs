//! # Request and Response Bodies
//!
//! Upload modes chosen by the body policy, response destinations, and the
//! wire-level debug sink.

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use transfer_engine::{
        Adapter, Credentials, DebugOutput, MultiAdapter, Request, RequestConfig, SaveTo, SendError,
        Stream, Transaction,
    };

    use crate::support::{init_tracing, response, TestServer};

    fn setup() -> (TestServer, MultiAdapter) {
        init_tracing();
        let server = TestServer::start();
        server.enqueue(response(200, "OK", &[], b"stored"));
        (server, MultiAdapter::default())
    }

    // =============================================================================
    // UPLOADS
    // =============================================================================

    #[test]
    fn test_small_body_is_sent_in_memory() {
        let (server, adapter) = setup();
        let request = Request::post(server.url("/form"))
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("a=1&b=2");

        adapter.send(&Transaction::new(request)).unwrap();

        let recorded = &server.requests()[0];
        assert_eq!(recorded.method, "POST");
        assert_eq!(recorded.body, b"a=1&b=2");
        assert_eq!(recorded.header("Content-Length"), Some("7"));
        assert_eq!(recorded.header("Content-Type"), Some("application/x-www-form-urlencoded"));
        assert!(!recorded.chunked);
    }

    #[test]
    fn test_large_known_size_body_is_streamed_with_length() {
        let (server, adapter) = setup();
        let body: Vec<u8> = (0..32_769u32).map(|i| (i % 251) as u8).collect();
        let request = Request::put(server.url("/blob")).with_body(body.clone());

        adapter.send(&Transaction::new(request)).unwrap();

        let recorded = &server.requests()[0];
        assert_eq!(recorded.method, "PUT");
        assert_eq!(recorded.header("Content-Length"), Some("32769"));
        assert_eq!(recorded.header_count("Content-Length"), 1);
        assert!(!recorded.chunked);
        assert_eq!(recorded.body, body);
    }

    #[test]
    fn test_unknown_size_body_is_chunked() {
        let (server, adapter) = setup();
        let payload = b"streamed without a known length".repeat(64);
        let request = Request::put(server.url("/chunked"))
            .with_body(Stream::from_reader(Cursor::new(payload.clone()), None));

        adapter.send(&Transaction::new(request)).unwrap();

        let recorded = &server.requests()[0];
        assert!(recorded.chunked);
        assert!(recorded.header("Content-Length").is_none());
        assert!(recorded.header("Expect").is_none());
        assert_eq!(recorded.body, payload);
    }

    #[test]
    fn test_body_as_string_forces_in_memory_upload() {
        let (server, adapter) = setup();
        let payload = vec![b'x'; 40_000];
        let request = Request::put(server.url("/eager"))
            .with_body(payload.clone())
            .with_config(RequestConfig::new().with_body_as_string(true));

        adapter.send(&Transaction::new(request)).unwrap();

        let recorded = &server.requests()[0];
        assert_eq!(recorded.header("Content-Length"), Some("40000"));
        assert_eq!(recorded.body.len(), payload.len());
    }

    #[test]
    fn test_basic_auth_header() {
        let (server, adapter) = setup();
        let request = Request::get(server.url("/private"))
            .with_config(RequestConfig::new().with_auth(Credentials::basic("user", "pass")));

        adapter.send(&Transaction::new(request)).unwrap();

        assert_eq!(
            server.requests()[0].header("Authorization"),
            Some("Basic dXNlcjpwYXNz")
        );
    }

    #[test]
    fn test_raw_option_override() {
        let (server, adapter) = setup();
        let request = Request::get(server.url("/"))
            .with_config(RequestConfig::new().with_curl_option("CURLOPT_USERAGENT", "transfer-tests/1"));

        adapter.send(&Transaction::new(request)).unwrap();
        assert_eq!(server.requests()[0].header("User-Agent"), Some("transfer-tests/1"));
    }

    #[test]
    fn test_timeout_fails_slow_transfer() {
        let (server, adapter) = setup();
        server.set_delay(Duration::from_millis(500));
        let request = Request::get(server.url("/slow"))
            .with_config(RequestConfig::new().with_timeout(Duration::from_millis(100)));

        match adapter.send(&Transaction::new(request)) {
            // Operation timed out.
            Err(SendError::Request(e)) => assert_eq!(e.code(), Some(28)),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    // =============================================================================
    // RESPONSE DESTINATIONS
    // =============================================================================

    #[test]
    fn test_save_to_path() {
        let (server, adapter) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download.txt");
        let request = Request::get(server.url("/file"))
            .with_config(RequestConfig::new().with_save_to(SaveTo::Path(path.clone())));

        let response = adapter.send(&Transaction::new(request)).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"stored");
        assert_eq!(response.body().text().unwrap(), "stored");
    }

    #[test]
    fn test_save_to_stream() {
        let (server, adapter) = setup();
        let sink = Stream::empty();
        let request = Request::get(server.url("/file"))
            .with_config(RequestConfig::new().with_save_to(SaveTo::Stream(sink.clone())));

        let response = adapter.send(&Transaction::new(request)).unwrap();

        assert!(response.body().ptr_eq(&sink));
        assert_eq!(sink.text().unwrap(), "stored");
    }

    #[test]
    fn test_error_status_does_not_write_to_save_to() {
        init_tracing();
        let server = TestServer::start();
        server.enqueue(response(404, "Not Found", &[], b"not here"));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.txt");
        let request = Request::get(server.url("/missing"))
            .with_config(RequestConfig::new().with_save_to(SaveTo::Path(path.clone())));

        let response = MultiAdapter::default()
            .send(&Transaction::new(request))
            .unwrap();

        assert_eq!(response.status(), 404);
        assert_eq!(response.body().text().unwrap(), "not here");
        assert!(!path.exists());
    }

    // =============================================================================
    // DEBUG OUTPUT
    // =============================================================================

    #[test]
    fn test_debug_sink_records_wire_traffic() {
        let (server, adapter) = setup();
        let sink = Stream::empty();
        let request = Request::get(server.url("/traced"))
            .with_config(RequestConfig::new().with_debug(DebugOutput::Sink(sink.clone())));

        adapter.send(&Transaction::new(request)).unwrap();

        let log = sink.text().unwrap();
        assert!(log.contains("> GET /traced HTTP/1.1"), "debug output: {log}");
        assert!(log.contains("< HTTP/1.1 200 OK"), "debug output: {log}");
        assert!(log.lines().any(|l| l.starts_with("* ")), "debug output: {log}");
    }

    #[test]
    fn test_debug_to_log_leaves_body_untouched() {
        let (server, adapter) = setup();
        let request = Request::get(server.url("/"))
            .with_config(RequestConfig::new().with_debug(DebugOutput::Enabled(true)));

        let response = adapter.send(&Transaction::new(request)).unwrap();
        assert_eq!(response.body().text().unwrap(), "stored");
    }
}

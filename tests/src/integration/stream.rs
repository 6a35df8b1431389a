//! # Blocking Adapter and Combinators
//!
//! The stream adapter against the scripted server, plus the mock adapter
//! and the adapter combinators wired to real transports.

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use parking_lot::Mutex;
    use transfer_engine::{
        Adapter, DebugOutput, FakeParallelAdapter, Listener, MockAdapter, MockReply, MultiAdapter,
        ParallelAdapter, Priority, Request, RequestConfig, Response, SaveTo, SendError,
        Stream, StreamAdapter, StreamingProxyAdapter, Transaction, TransactionSource,
    };

    use crate::support::{closed_port_url, init_tracing, response, TestServer};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn setup() -> (TestServer, StreamAdapter) {
        init_tracing();
        (TestServer::start(), StreamAdapter::default())
    }

    // =============================================================================
    // STREAM ADAPTER
    // =============================================================================

    #[test]
    fn test_stream_adapter_get() {
        let (server, adapter) = setup();
        server.enqueue(response(200, "OK", &[("Foo", "bar")], b"plain body"));

        let tx = Transaction::new(Request::get(server.url("/plain")));
        let response = adapter.send(&tx).unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.protocol_version(), "1.1");
        assert_eq!(response.header("Foo").as_deref(), Some("bar"));
        assert_eq!(response.body().text().unwrap(), "plain body");

        let recorded = &server.requests()[0];
        assert_eq!(recorded.target, "/plain");
        assert_eq!(recorded.header("Connection"), Some("close"));
    }

    #[test]
    fn test_stream_adapter_decodes_gzip() {
        let (server, adapter) = setup();
        let compressed = gzip(b"hello from a gzip body");
        server.enqueue(response(200, "OK", &[("Content-Encoding", "gzip")], &compressed));

        let response = adapter
            .send(&Transaction::new(Request::get(server.url("/gz"))))
            .unwrap();

        assert_eq!(response.body().text().unwrap(), "hello from a gzip body");
        let accept = server.requests()[0].header("Accept-Encoding").map(str::to_string);
        assert!(accept.is_some_and(|v| v.contains("gzip")));
    }

    #[test]
    fn test_stream_adapter_without_decoding_keeps_raw_bytes() {
        let (server, adapter) = setup();
        let compressed = gzip(b"left compressed");
        server.enqueue(response(200, "OK", &[("Content-Encoding", "gzip")], &compressed));

        let request = Request::get(server.url("/raw"))
            .with_config(RequestConfig::new().with_decode_content(false));
        let response = adapter.send(&Transaction::new(request)).unwrap();

        assert_eq!(response.body().contents().unwrap(), compressed);
        assert_eq!(response.header("Content-Encoding").as_deref(), Some("gzip"));
    }

    #[test]
    fn test_stream_adapter_sends_body_and_headers() {
        let (server, adapter) = setup();
        server.enqueue(response(201, "Created", &[], b""));

        let request = Request::post(server.url("/submit"))
            .with_header("X-Token", "abc")
            .with_body("payload");
        let response = adapter.send(&Transaction::new(request)).unwrap();

        assert_eq!(response.status(), 201);
        let recorded = &server.requests()[0];
        assert_eq!(recorded.method, "POST");
        assert_eq!(recorded.header("X-Token"), Some("abc"));
        assert_eq!(recorded.body, b"payload");
    }

    #[test]
    fn test_stream_adapter_streaming_body() {
        let (server, adapter) = setup();
        server.enqueue(response(200, "OK", &[], b"read on demand"));

        let request = Request::get(server.url("/stream"))
            .with_config(RequestConfig::new().with_stream(true));
        let response = adapter.send(&Transaction::new(request)).unwrap();

        assert!(!response.body().is_seekable());
        assert_eq!(response.body().text().unwrap(), "read on demand");
    }

    #[test]
    fn test_stream_adapter_save_to_and_debug() {
        let (server, adapter) = setup();
        server.enqueue(response(200, "OK", &[], b"saved"));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.txt");
        let debug = Stream::empty();

        let request = Request::get(server.url("/save")).with_config(
            RequestConfig::new()
                .with_save_to(SaveTo::Path(path.clone()))
                .with_debug(DebugOutput::Sink(debug.clone())),
        );
        adapter.send(&Transaction::new(request)).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"saved");
        let log = debug.text().unwrap();
        assert!(log.contains("[CONNECT]"), "debug output: {log}");
        assert!(log.contains("[COMPLETED]"), "debug output: {log}");
    }

    #[test]
    fn test_stream_adapter_connection_failure() {
        init_tracing();
        let url = closed_port_url();
        let errors = Arc::new(Mutex::new(0));
        let counter = errors.clone();
        let mut request = Request::get(url.clone());
        request.emitter_mut().on(
            Listener::error(move |_| {
                *counter.lock() += 1;
                Ok(())
            }),
            Priority::default(),
        );

        match StreamAdapter::default().send(&Transaction::new(request)) {
            Err(SendError::Request(e)) => {
                assert!(e.message().starts_with(&format!("Error creating resource. [url] {url}")));
                assert!(e.message().contains("[error]"));
            }
            other => panic!("expected a request failure, got {other:?}"),
        }
        assert_eq!(*errors.lock(), 1);
    }

    // =============================================================================
    // MOCK ADAPTER
    // =============================================================================

    #[test]
    fn test_mock_adapter_drives_full_event_sequence() {
        let adapter = MockAdapter::with_replies([
            MockReply::Response(Response::new(200).with_body("first")),
            MockReply::Failure("connection reset".into()),
        ]);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c, d) = (order.clone(), order.clone(), order.clone(), order.clone());
        let source = TransactionSource::new(vec![Request::get("http://mock/1"), Request::get("http://mock/2")])
            .with_listener(Listener::before(move |_| {
                a.lock().push("before");
                Ok(())
            }))
            .with_listener(Listener::headers(move |_| {
                b.lock().push("headers");
                Ok(())
            }))
            .with_listener(Listener::complete(move |_| {
                c.lock().push("complete");
                Ok(())
            }))
            .with_listener(Listener::error(move |_| {
                d.lock().push("error");
                Ok(())
            }));
        let txs: Vec<_> = source.collect();

        FakeParallelAdapter::new(Arc::new(adapter))
            .send_all(Box::new(txs.clone().into_iter()), 4)
            .unwrap();

        assert_eq!(
            *order.lock(),
            ["before", "headers", "complete", "before", "error"]
        );
        assert_eq!(txs[0].response().unwrap().body().text().unwrap(), "first");
        assert_eq!(txs[1].exception().unwrap().message(), "connection reset");
    }

    // =============================================================================
    // COMBINATORS
    // =============================================================================

    #[test]
    fn test_fake_parallel_over_stream_adapter() {
        let (server, adapter) = setup();
        server.enqueue_many((0..3).map(|i| response(200, "OK", &[], format!("r{i}").as_bytes())));

        let txs: Vec<_> = (0..3)
            .map(|i| Transaction::new(Request::get(server.url(&format!("/{i}")))))
            .collect();
        FakeParallelAdapter::new(Arc::new(adapter))
            .send_all(Box::new(txs.clone().into_iter()), 3)
            .unwrap();

        let bodies: Vec<_> = txs
            .iter()
            .map(|tx| tx.response().unwrap().body().text().unwrap())
            .collect();
        assert_eq!(bodies, ["r0", "r1", "r2"]);
    }

    #[test]
    fn test_streaming_proxy_routes_to_stream_adapter() {
        let (server, stream_adapter) = setup();
        server.enqueue_many([response(200, "OK", &[], b"buffered"), response(200, "OK", &[], b"streamed")]);

        let proxy = StreamingProxyAdapter::new(Arc::new(MultiAdapter::default()), Arc::new(stream_adapter));

        let buffered = proxy
            .send(&Transaction::new(Request::get(server.url("/buffered"))))
            .unwrap();
        let streamed = proxy
            .send(&Transaction::new(
                Request::get(server.url("/streamed")).with_config(RequestConfig::new().with_stream(true)),
            ))
            .unwrap();

        assert_eq!(buffered.body().text().unwrap(), "buffered");
        assert_eq!(streamed.body().text().unwrap(), "streamed");

        let requests = server.requests();
        // Only the blocking adapter forces the connection closed.
        assert!(requests[0].header("Connection").is_none());
        assert_eq!(requests[1].header("Connection"), Some("close"));
    }
}

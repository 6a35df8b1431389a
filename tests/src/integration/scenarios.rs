//! # Core Scenarios
//!
//! Single sends and small batches through the multiplexed curl adapter:
//!
//! 1. **Single GET**: status and headers come back from the wire
//! 2. **Mixed batch**: GET, PUT and HEAD all resolve under one `send_all`
//! 3. **Recovered listener failure**: a failing `complete` listener is
//!    routed to `error`, which substitutes a response or stops propagation
//! 4. **Transport failure in a batch**: stays attached to its transaction
//! 5. **Event order**: `before`, `headers`, `complete`

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use transfer_engine::{
        Adapter, Event, Listener, MultiAdapter, ParallelAdapter, Priority, Request, Response,
        SendError, Transaction, TransactionSource, TransactionState,
    };

    use crate::support::{closed_port_url, init_tracing, response, TestServer};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn setup() -> (TestServer, MultiAdapter) {
        init_tracing();
        (TestServer::start(), MultiAdapter::default())
    }

    // =============================================================================
    // SINGLE SEND
    // =============================================================================

    #[test]
    fn test_single_get_returns_wire_response() {
        let (server, adapter) = setup();
        server.enqueue("HTTP/1.1 200 OK\r\nFoo: bar\r\nContent-Length: 0\r\n\r\n");

        let tx = Transaction::new(Request::get(server.url("/")));
        let response = adapter.send(&tx).unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.header("Foo").as_deref(), Some("bar"));
        assert_eq!(tx.state(), TransactionState::Complete);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].target, "/");
    }

    #[test]
    fn test_response_body_and_transfer_info() {
        let (server, adapter) = setup();
        server.enqueue(response(200, "OK", &[("Content-Type", "text/plain")], b"hello world"));

        let tx = Transaction::new(Request::get(server.url("/greeting#ignored")));
        let response = adapter.send(&tx).unwrap();

        assert_eq!(response.body().text().unwrap(), "hello world");
        assert_eq!(server.requests()[0].target, "/greeting");

        let info = tx.transfer_info().unwrap();
        assert_eq!(info.response_code, Some(200));
        assert_eq!(info.result_code, Some(0));
        assert!(info.effective_url.unwrap().ends_with("/greeting"));
    }

    #[test]
    fn test_default_headers_are_suppressed() {
        let (server, adapter) = setup();
        server.enqueue(response(200, "OK", &[], b""));

        adapter
            .send(&Transaction::new(Request::get(server.url("/"))))
            .unwrap();

        let request = &server.requests()[0];
        assert!(request.header("Expect").is_none());
        assert!(request.header("Accept").is_none());
    }

    #[test]
    fn test_non_success_status_is_still_a_response() {
        let (server, adapter) = setup();
        server.enqueue(response(404, "Not Found", &[], b"missing"));

        let response = adapter
            .send(&Transaction::new(Request::get(server.url("/nope"))))
            .unwrap();

        assert_eq!(response.status(), 404);
        assert_eq!(response.body().text().unwrap(), "missing");
    }

    #[test]
    fn test_transport_failure_is_raised_from_send() {
        let (_server, adapter) = setup();
        let url = closed_port_url();

        let tx = Transaction::new(Request::get(url.clone()));
        let e = match adapter.send(&tx) {
            Err(SendError::Request(e)) => e,
            other => panic!("expected a request failure, got {other:?}"),
        };
        assert_eq!(e.code(), Some(7));
        assert!(e.message().contains(&url));
        assert!(e.is_emitted());
        assert_eq!(tx.state(), TransactionState::Error);
    }

    // =============================================================================
    // LISTENER FAILURES
    // =============================================================================

    #[test]
    fn test_complete_failure_recovered_by_error_listener() {
        let (server, adapter) = setup();
        server.enqueue(response(500, "Internal Server Error", &[], b""));

        let raised = Arc::new(AtomicBool::new(false));
        let flag = raised.clone();
        let mut request = Request::get(server.url("/"));
        request.emitter_mut().on(
            Listener::complete(move |_| {
                if !flag.swap(true, Ordering::SeqCst) {
                    anyhow::bail!("rejected by complete listener");
                }
                Ok(())
            }),
            Priority::default(),
        );
        request.emitter_mut().on(
            Listener::error(|e| {
                assert_eq!(e.exception().message(), "rejected by complete listener");
                e.intercept(Response::new(200).with_header("Foo", "bar"));
                Ok(())
            }),
            Priority::default(),
        );

        let response = adapter.send(&Transaction::new(request)).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("Foo").as_deref(), Some("bar"));
        assert!(raised.load(Ordering::SeqCst));
    }

    #[test]
    fn test_error_listener_stopping_without_intercept_does_not_raise() {
        let (server, adapter) = setup();
        server.enqueue(response(500, "Internal Server Error", &[], b"broken"));

        let mut request = Request::get(server.url("/"));
        request.emitter_mut().on(
            Listener::complete(|_| anyhow::bail!("rejected by complete listener")),
            Priority::default(),
        );
        request.emitter_mut().on(
            Listener::error(|e| {
                e.stop_propagation();
                Ok(())
            }),
            Priority::default(),
        );
        request
            .emitter_mut()
            .on(Listener::error(|_| panic!("propagation was stopped")), Priority::Last);

        let tx = Transaction::new(request);
        let response = adapter.send(&tx).unwrap();

        assert_eq!(response.status(), 500);
        assert_eq!(response.body().text().unwrap(), "broken");
        let error = tx.exception().expect("failure stays attached");
        assert_eq!(error.message(), "rejected by complete listener");
        assert!(error.is_suppressed());
        assert_eq!(tx.state(), TransactionState::Error);
    }

    #[test]
    fn test_stopped_transport_failure_without_response_is_raised() {
        let (_server, adapter) = setup();
        let mut request = Request::get(closed_port_url());
        request.emitter_mut().on(
            Listener::error(|e| {
                e.stop_propagation();
                Ok(())
            }),
            Priority::default(),
        );

        let tx = Transaction::new(request);
        match adapter.send(&tx) {
            Err(SendError::Request(e)) => {
                assert_eq!(e.code(), Some(7));
                assert!(e.is_suppressed());
            }
            other => panic!("expected the suppressed failure, got {other:?}"),
        }
        assert!(tx.exception().is_some());
    }

    // =============================================================================
    // BATCHES
    // =============================================================================

    #[test]
    fn test_mixed_batch_resolves_every_transaction() {
        let (server, adapter) = setup();
        server.enqueue_many([
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
            "HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
            "HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\n\r\n",
        ]);

        let txs = vec![
            Transaction::new(Request::get(server.url("/a"))),
            Transaction::new(Request::put(server.url("/b"))),
            Transaction::new(Request::head(server.url("/c"))),
        ];
        adapter.send_all(Box::new(txs.clone().into_iter()), 20).unwrap();

        for tx in &txs {
            let status = tx.response().expect("resolved").status();
            assert!([200, 201, 202].contains(&status), "unexpected status {status}");
            assert_eq!(tx.state(), TransactionState::Complete);
        }
        let mut methods: Vec<_> = server.requests().into_iter().map(|r| r.method).collect();
        methods.sort();
        assert_eq!(methods, ["GET", "HEAD", "PUT"]);
    }

    #[test]
    fn test_batch_failure_stays_on_transaction() {
        let (_server, adapter) = setup();
        let url = closed_port_url();

        let source = TransactionSource::new(vec![Request::get(url.clone())]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let source = source.with_listener(Listener::error(move |e| {
            sink.lock().push(e.transaction().clone());
            Ok(())
        }));

        adapter.send_all(source.boxed(), 5).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let error = seen[0].exception().expect("failure attached");
        assert!(error.message().contains(&url));
        assert!(error.message().contains("(#7)"));
        assert_eq!(error.code(), Some(7));
    }

    #[test]
    fn test_event_order() {
        let (server, adapter) = setup();
        server.enqueue(response(200, "OK", &[], b"body"));

        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (order.clone(), order.clone(), order.clone());
        let source = TransactionSource::new(vec![Request::get(server.url("/"))])
            .with_listener(Listener::before(move |_| {
                a.lock().push("before");
                Ok(())
            }))
            .with_listener(Listener::headers(move |e| {
                assert_eq!(e.response().status(), 200);
                b.lock().push("headers");
                Ok(())
            }))
            .with_listener(Listener::complete(move |_| {
                c.lock().push("complete");
                Ok(())
            }));

        adapter.send_all(source.boxed(), 1).unwrap();
        assert_eq!(*order.lock(), ["before", "headers", "complete"]);
    }

    #[test]
    fn test_before_interception_skips_the_wire() {
        let (server, adapter) = setup();
        let mut request = Request::get(server.url("/"));
        request.emitter_mut().on(
            Listener::before(|e| {
                e.intercept(Response::new(204));
                Ok(())
            }),
            Priority::default(),
        );

        let tx = Transaction::new(request);
        let response = adapter.send(&tx).unwrap();

        assert_eq!(response.status(), 204);
        assert!(server.requests().is_empty());
        assert_eq!(adapter.stats().snapshot().intercepted, 1);
    }
}

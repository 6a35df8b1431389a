//! Scripted HTTP/1.1 server.
//!
//! Serves queued raw responses in FIFO order, one per request, and records
//! every request it reads. Runs on its own tokio runtime in a background
//! thread so the blocking adapters under test can talk to it directly.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One request as the server read it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    /// De-chunked when the request used chunked transfer coding.
    pub body: Vec<u8>,
    pub chunked: bool,
}

impl RecordedRequest {
    /// First value of the header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }
}

#[derive(Default)]
struct ServerState {
    responses: VecDeque<Vec<u8>>,
    requests: Vec<RecordedRequest>,
    delay: Duration,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Bind an ephemeral port on 127.0.0.1 and start serving.
    pub fn start() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind test server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("local addr");

        let state = Arc::new(Mutex::new(ServerState::default()));
        let (shutdown, stop) = oneshot::channel();

        let shared = state.clone();
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("test server runtime");
            runtime.block_on(async move {
                let listener = TcpListener::from_std(listener).expect("tokio listener");
                tokio::select! {
                    _ = accept_loop(listener, shared) => {}
                    _ = stop => {}
                }
            });
        });

        debug!(%addr, "test server started");
        Self {
            addr,
            state,
            shutdown: Some(shutdown),
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Queue a raw response.
    pub fn enqueue(&self, raw: impl Into<Vec<u8>>) {
        self.state.lock().responses.push_back(raw.into());
    }

    pub fn enqueue_many<I, R>(&self, responses: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        let mut state = self.state.lock();
        state.responses.extend(responses.into_iter().map(Into::into));
    }

    /// Hold every response back for `delay` before writing it.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn pending_responses(&self) -> usize {
        self.state.lock().responses.len()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<ServerState>>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!(%peer, "accepted connection");
                tokio::spawn(serve_connection(socket, state.clone()));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        }
    }
}

async fn serve_connection(socket: TcpStream, state: Arc<Mutex<ServerState>>) {
    let mut reader = BufReader::new(socket);
    loop {
        let request = match read_request(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "connection dropped mid-request");
                return;
            }
        };
        let close = request
            .header("Connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));

        let (reply, delay) = {
            let mut state = state.lock();
            state.requests.push(request);
            let reply = state.responses.pop_front().unwrap_or_else(|| {
                let body = "No response queued";
                format!(
                    "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                )
                .into_bytes()
            });
            (reply, state.delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let socket = reader.get_mut();
        if socket.write_all(&reply).await.is_err() || socket.flush().await.is_err() {
            return;
        }
        if close {
            let _ = socket.shutdown().await;
            return;
        }
    }
}

/// Read one request. `Ok(None)` on a clean end of stream.
async fn read_request(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<RecordedRequest>> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if line.is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        lines.push(line);
    }

    let mut parts = lines[0].split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines[1..]
        .iter()
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut request = RecordedRequest {
        method,
        target,
        headers,
        body: Vec::new(),
        chunked: false,
    };

    if request
        .header("Transfer-Encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        request.chunked = true;
        request.body = read_chunked(reader).await?;
    } else if let Some(length) = request.header("Content-Length").and_then(|v| v.parse::<usize>().ok()) {
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        request.body = body;
    }

    Ok(Some(request))
}

async fn read_chunked(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).await?;
        let size_text = size_line.trim().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if size == 0 {
            // Trailers end at the first empty line.
            loop {
                let mut trailer = String::new();
                if reader.read_line(&mut trailer).await? == 0 || trailer.trim().is_empty() {
                    return Ok(body);
                }
            }
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
}

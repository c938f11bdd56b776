//! Scripted HTTP server for exercising whole commands over a live
//! socket. Each connection is answered with the next canned response
//! and the request line recorded, so tests pin down exactly which
//! calls a command issued.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};

use st_core::{Credentials, ReportSink};

use crate::commands::Ctx;

pub struct Canned {
    status: u16,
    reason: &'static str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Canned {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self.header("content-type", "application/json")
    }
}

/// Method and target of one request as the server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub method: String,
    pub target: String,
}

pub struct TestServer {
    pub base: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl TestServer {
    pub async fn requests(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.seen.lock().await)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

async fn read_request(stream: &mut TcpStream) -> Seen {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before request head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
    let mut lines = head.lines();
    let mut parts = lines.next().unwrap().split_whitespace();
    let method = parts.next().unwrap().to_string();
    let target = parts.next().unwrap().to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_len = buf.len() - head_end - 4;
    while body_len < content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        body_len += n;
    }

    Seen { method, target }
}

/// Binds an ephemeral port and answers each connection with the next
/// scripted response. The script closure receives the server's own
/// base URL so auth responses can point back at it.
pub async fn serve_with(script: impl FnOnce(&str) -> Vec<Canned>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let responses = script(&base);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let Some(canned) = queue.lock().await.pop_front() else {
                break;
            };
            let request = read_request(&mut stream).await;
            log.lock().await.push(request);
            let mut head = format!(
                "HTTP/1.1 {} {}\r\nconnection: close\r\n",
                canned.status, canned.reason
            );
            if !canned
                .headers
                .iter()
                .any(|(name, _)| name == "content-length")
            {
                head.push_str(&format!("content-length: {}\r\n", canned.body.len()));
            }
            for (name, value) in &canned.headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&canned.body).await;
            let _ = stream.shutdown().await;
        }
    });
    TestServer { base, seen }
}

pub fn auth_ok(base: &str) -> Canned {
    Canned::new(200, "OK")
        .header("x-storage-url", &format!("{base}/v1/AUTH_test"))
        .header("x-auth-token", "tk0")
}

/// A command context wired to the test server, plus the receiving
/// halves of the progress and error queues.
pub fn ctx(
    server: &TestServer,
    verbose: u8,
) -> (
    Ctx,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedReceiver<String>,
) {
    let (sink, print_rx, error_rx) = ReportSink::paired();
    let credentials = Credentials::new(
        format!("{}/auth/v1.0", server.base),
        "test:tester",
        "secret",
    );
    (
        Ctx {
            credentials,
            verbose,
            sink,
        },
        print_rx,
        error_rx,
    )
}

/// Lines buffered on a report queue so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

//! Shared fixtures for the integration tests: a loopback Loki stub, a
//! tracer recording finished spans and a log subscriber.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use buildlog_loki::{ActiveSpan, AttributeValue, SpanStatus, Tracer};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use url::Url;

// ============================================================================
// Logging
// ============================================================================

/// Installs a test-writer subscriber once per test binary.
///
/// `RUST_LOG` overrides the default `buildlog_loki=trace` filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("buildlog_loki=trace")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Loopback Loki stub
// ============================================================================

/// One request received by the stub.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: Url,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct StubResponse {
    status: u16,
    body: String,
}

/// HTTP server answering queued responses, then a default one.
pub struct StubLoki {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<VecDeque<StubResponse>>>,
}

impl StubLoki {
    /// Starts a stub answering `default_status`/`default_body` once the
    /// queue is empty.
    pub fn start(default_status: u16, default_body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(VecDeque::new()));
        let default = StubResponse {
            status: default_status,
            body: default_body.to_string(),
        };

        let thread_requests = Arc::clone(&requests);
        let thread_responses = Arc::clone(&responses);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let response = thread_responses
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| default.clone());
                serve(stream, addr, &response, &thread_requests);
            }
        });

        Self {
            addr,
            requests,
            responses,
        }
    }

    /// Stub answering every request with an empty stream result.
    pub fn empty() -> Self {
        Self::start(200, &streams_body(&[]))
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn enqueue(&self, status: u16, body: impl Into<String>) -> &Self {
        self.responses.lock().push_back(StubResponse {
            status,
            body: body.into(),
        });
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

fn serve(
    mut stream: TcpStream,
    addr: SocketAddr,
    response: &StubResponse,
    requests: &Mutex<Vec<RecordedRequest>>,
) -> Option<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;

    let mut head = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&head).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    requests.lock().push(RecordedRequest {
        method,
        url: Url::parse(&format!("http://{addr}{target}")).ok()?,
        headers,
    });

    let reply = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.body.len(),
        response.body
    );
    stream.write_all(reply.as_bytes()).ok()?;
    stream.flush().ok()
}

/// `query_range` body with one stream labelled `service_name=jenkins`.
pub fn streams_body(values: &[(i64, &str)]) -> String {
    let values: Vec<serde_json::Value> = values
        .iter()
        .map(|(nanos, line)| serde_json::json!([nanos.to_string(), line]))
        .collect();
    let result = if values.is_empty() {
        serde_json::json!([])
    } else {
        serde_json::json!([{ "stream": { "service_name": "jenkins" }, "values": values }])
    };
    serde_json::json!({
        "status": "success",
        "data": { "resultType": "streams", "result": result }
    })
    .to_string()
}

/// Address nothing listens on.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ============================================================================
// Recording tracer
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FinishedSpan {
    pub name: &'static str,
    pub attributes: HashMap<&'static str, AttributeValue>,
    pub errors: Vec<String>,
    pub status: Option<SpanStatus>,
}

#[derive(Clone, Default)]
pub struct RecordingTracer {
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl RecordingTracer {
    pub fn named(&self, name: &str) -> Vec<FinishedSpan> {
        self.finished
            .lock()
            .iter()
            .filter(|span| span.name == name)
            .cloned()
            .collect()
    }
}

struct RecordingSpan {
    span: FinishedSpan,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl ActiveSpan for RecordingSpan {
    fn set_attribute(&mut self, key: &'static str, value: AttributeValue) {
        self.span.attributes.insert(key, value);
    }

    fn record_error(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.span.errors.push(error.to_string());
    }

    fn set_status(&mut self, status: SpanStatus) {
        self.span.status = Some(status);
    }

    fn end(self: Box<Self>) {
        self.sink.lock().push(self.span);
    }
}

impl Tracer for RecordingTracer {
    fn start_span(
        &self,
        name: &'static str,
        attributes: Vec<(&'static str, AttributeValue)>,
    ) -> Box<dyn ActiveSpan> {
        Box::new(RecordingSpan {
            span: FinishedSpan {
                name,
                attributes: attributes.into_iter().collect(),
                ..FinishedSpan::default()
            },
            sink: Arc::clone(&self.finished),
        })
    }
}

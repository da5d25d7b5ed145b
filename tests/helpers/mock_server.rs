use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing;

/// A request as the mock server received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Zero-based index of the connection the request arrived on.
    pub connection: usize,
}

#[allow(dead_code)]
impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response bytes for a request. An empty response closes the
/// connection without answering.
pub type Responder = dyn Fn(&RecordedRequest) -> Vec<u8> + Send + Sync;

/// What a running server has seen so far.
#[derive(Clone)]
pub struct ServerLog {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ServerLog {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// A simple HTTP/1.1 mock server that handles keep-alive connections.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
}

#[allow(dead_code)]
impl MockHttpServer {
    /// Create a new mock server bound to a random port.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the base URL for this server.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Answer every request with `Hello`, keeping connections alive.
    pub fn start(self) -> ServerLog {
        self.start_with(|_| ok("Hello"))
    }

    /// Start the server in a background task, answering each request with
    /// `responder`. Connections stay open until either side closes them.
    pub fn start_with<F>(self, responder: F) -> ServerLog
    where
        F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        let log = ServerLog {
            requests: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
        };
        let responder: Arc<Responder> = Arc::new(responder);
        let listener = self.listener;
        let server_log = log.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let index = server_log.connections.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(handle_connection(
                            stream,
                            index,
                            server_log.clone(),
                            responder.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        break;
                    }
                }
            }
        });
        log
    }
}

/// `200 OK` with a fixed-length body.
#[allow(dead_code)]
pub fn ok(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// Handle a single connection, processing multiple requests on it.
async fn handle_connection(
    mut stream: TcpStream,
    index: usize,
    log: ServerLog,
    responder: Arc<Responder>,
) {
    let mut buffer = Vec::new();
    loop {
        let request = match read_request(&mut stream, &mut buffer, index).await {
            Some(request) => request,
            None => break,
        };
        log.requests.lock().unwrap().push(request.clone());

        let response = responder(&request);
        if response.is_empty() {
            // Hang up without answering.
            break;
        }
        if stream.write_all(&response).await.is_err() || stream.flush().await.is_err() {
            break;
        }

        let text = String::from_utf8_lossy(&response).to_lowercase();
        let head = text.split("\r\n\r\n").next().unwrap_or("");
        if head.contains("connection: close") || request.header("connection") == Some("close") {
            break;
        }
    }
}

async fn fill(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 8192];
    match timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
        Ok(Ok(n)) if n > 0 => {
            buffer.extend_from_slice(&chunk[..n]);
            true
        }
        _ => false,
    }
}

fn find(buffer: &[u8], needle: &[u8]) -> Option<usize> {
    buffer.windows(needle.len()).position(|w| w == needle)
}

/// Read one request (head plus Content-Length or chunked body).
async fn read_request(
    stream: &mut TcpStream,
    buffer: &mut Vec<u8>,
    connection: usize,
) -> Option<RecordedRequest> {
    let head_end = loop {
        if let Some(pos) = find(buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        if !fill(stream, buffer).await {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    buffer.drain(..head_end);

    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut request = RecordedRequest {
        method,
        path,
        headers,
        body: Vec::new(),
        connection,
    };

    if let Some(len) = request.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while buffer.len() < len {
            if !fill(stream, buffer).await {
                return None;
            }
        }
        request.body = buffer.drain(..len).collect();
    } else if request
        .header("transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
    {
        loop {
            let line_end = loop {
                if let Some(pos) = find(buffer, b"\r\n") {
                    break pos;
                }
                if !fill(stream, buffer).await {
                    return None;
                }
            };
            let size = usize::from_str_radix(
                String::from_utf8_lossy(&buffer[..line_end]).trim(),
                16,
            )
            .ok()?;
            buffer.drain(..line_end + 2);
            while buffer.len() < size + 2 {
                if !fill(stream, buffer).await {
                    return None;
                }
            }
            request.body.extend_from_slice(&buffer[..size]);
            buffer.drain(..size + 2);
            if size == 0 {
                break;
            }
        }
    }

    Some(request)
}

//! In-process HTTP/1.1 server for engine tests.
//!
//! Every connection serves one request and is closed afterwards. Requests
//! are recorded in arrival order together with the moment their response
//! was released, so tests can assert on request ordering.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A request as seen by the mock server.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    /// Position in arrival order, starting at 0.
    pub seq: usize,
    pub method: String,
    /// Path including the query string.
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub(crate) struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        self.path.split_once('?').map_or(&self.path, |(p, _)| p)
    }

    /// Raw (still percent-encoded) value of a query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        let (_, query) = self.path.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn multipart(&self) -> Vec<FormPart> {
        let Some(boundary) = self.header("content-type").and_then(boundary_of) else {
            return Vec::new();
        };
        parse_multipart(&self.body, &boundary)
    }

    /// Text value of a multipart field.
    pub fn field(&self, name: &str) -> Option<String> {
        self.multipart()
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| String::from_utf8_lossy(&p.data).into_owned())
    }

    pub fn part(&self, name: &str) -> Option<FormPart> {
        self.multipart().into_iter().find(|p| p.name == name)
    }
}

enum Length {
    Exact,
    Declared(u64),
    Omitted,
}

/// Scripted response.
pub(crate) struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    length: Length,
    delay: Duration,
}

impl MockResponse {
    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            length: Length::Exact,
            delay: Duration::ZERO,
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::status(200, body.into_bytes())
            .with_header("Content-Type", "text/html; charset=utf-8")
    }

    pub fn json(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::status(200, body.into_bytes()).with_header("Content-Type", "application/json")
    }

    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, body).with_header("Content-Type", "application/octet-stream")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Announces `len` bytes regardless of the real body length.
    pub fn with_declared_length(mut self, len: u64) -> Self {
        self.length = Length::Declared(len);
        self
    }

    /// Sends no Content-Length; the body ends when the connection closes.
    pub fn without_length(mut self) -> Self {
        self.length = Length::Omitted;
        self
    }

    /// Waits before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Request lifecycle marks, in the order the server observed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerEvent {
    Received(usize),
    /// The response is about to be written; the client cannot have it earlier.
    Responding(usize),
}

#[derive(Default)]
struct Recorded {
    requests: Vec<RecordedRequest>,
    events: Vec<ServerEvent>,
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync>;

pub(crate) struct MockServer {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let handler: Handler = Arc::new(handler);

        let rec = Arc::clone(&recorded);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let rec = Arc::clone(&rec);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    serve(stream, rec, handler).await;
                });
            }
        });

        Self {
            addr,
            recorded,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `http://127.0.0.1:{port}{path}`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().unwrap().requests.clone()
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.recorded.lock().unwrap().events.clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, recorded: Arc<Mutex<Recorded>>, handler: Handler) {
    let mut reader = BufReader::new(stream);
    let Some(mut request) = read_request(&mut reader).await else {
        return;
    };

    {
        let mut rec = recorded.lock().unwrap();
        request.seq = rec.requests.len();
        rec.events.push(ServerEvent::Received(request.seq));
        rec.requests.push(request.clone());
    }

    let response = handler(&request);
    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }
    recorded
        .lock()
        .unwrap()
        .events
        .push(ServerEvent::Responding(request.seq));

    let mut head = format!("HTTP/1.1 {} Mock\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    match response.length {
        Length::Exact => head.push_str(&format!("Content-Length: {}\r\n", response.body.len())),
        Length::Declared(n) => head.push_str(&format!("Content-Length: {n}\r\n")),
        Length::Omitted => {}
    }
    head.push_str("Connection: close\r\n\r\n");

    let mut stream = reader.into_inner();
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&response.body).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<RecordedRequest> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.trim_end().split(' ');
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let l = line.trim_end();
        if l.is_empty() {
            break;
        }
        if let Some((k, v)) = l.split_once(':') {
            headers.push((k.trim().to_ascii_lowercase(), v.trim().to_string()));
        }
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let mut body = Vec::new();
    if header("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        loop {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let size_str = line.trim_end().split(';').next()?.trim();
            let size = usize::from_str_radix(size_str, 16).ok()?;
            if size == 0 {
                // Trailers until the blank line.
                loop {
                    line.clear();
                    reader.read_line(&mut line).await.ok()?;
                    if line.trim_end().is_empty() {
                        break;
                    }
                }
                break;
            }
            let start = body.len();
            body.resize(start + size, 0);
            reader.read_exact(&mut body[start..]).await.ok()?;
            let mut crlf = [0u8; 2];
            reader.read_exact(&mut crlf).await.ok()?;
        }
    } else if let Some(len) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.resize(len, 0);
        reader.read_exact(&mut body).await.ok()?;
    }

    Some(RecordedRequest {
        seq: 0,
        method,
        path,
        headers,
        body,
    })
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn parse_multipart(body: &[u8], boundary: &str) -> Vec<FormPart> {
    let delim = format!("--{boundary}").into_bytes();
    let mut parts = Vec::new();
    let Some(mut pos) = find(body, &delim, 0) else {
        return parts;
    };

    loop {
        let seg_start = pos + delim.len();
        if body[seg_start..].starts_with(b"--") {
            break;
        }
        let Some(next) = find(body, &delim, seg_start) else {
            break;
        };
        let segment = &body[seg_start..next];
        let segment = segment.strip_prefix(b"\r\n").unwrap_or(segment);
        let segment = segment.strip_suffix(b"\r\n").unwrap_or(segment);

        if let Some(split) = find(segment, b"\r\n\r\n", 0) {
            let head = String::from_utf8_lossy(&segment[..split]);
            let data = segment[split + 4..].to_vec();
            let mut part = FormPart {
                name: String::new(),
                filename: None,
                content_type: None,
                data,
            };
            for line in head.lines() {
                let Some((k, v)) = line.split_once(':') else {
                    continue;
                };
                if k.eq_ignore_ascii_case("content-disposition") {
                    for param in v.split(';').map(str::trim) {
                        if let Some(n) = param.strip_prefix("name=") {
                            part.name = n.trim_matches('"').to_string();
                        } else if let Some(f) = param.strip_prefix("filename=") {
                            part.filename = Some(f.trim_matches('"').to_string());
                        }
                    }
                } else if k.eq_ignore_ascii_case("content-type") {
                    part.content_type = Some(v.trim().to_string());
                }
            }
            parts.push(part);
        }
        pos = next;
    }
    parts
}

/// Landing page describing one file.
pub(crate) fn single_page(name: &str, size: &str) -> String {
    format!(
        r#"<html><body>
             <div id="contents_dl">
               <p id="dl">{name}</p>
               <span class="dl_size"> {size} </span>
             </div>
           </body></html>"#
    )
}

/// Bundle landing page listing `(name, size, file id)` entries.
pub(crate) fn bundle_page(entries: &[(&str, &str, &str)]) -> String {
    let panels: String = entries
        .iter()
        .map(|(name, size, id)| {
            format!(
                r#"<div class="matomete_file">
                     <div class="matomete_file_info">
                       <span class="icon"></span>
                       <span>{name}</span>
                       <span>（{size}）</span>
                     </div>
                     <div class="download_panel_btn_dl" onclick="download(2, '{id}', 0);">DL</div>
                   </div>"#
            )
        })
        .collect();
    format!(r#"<html><body><div id="contents_matomete">{panels}</div></body></html>"#)
}

//! Shared helpers for integration tests: configs, catalog rows, listing pages,
//! zip archives and range-aware mock responders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::Compression;
use flate2::write::DeflateEncoder;
use myrient_core::catalog::{Cadence, CollectionSpec, ContentType, NewEntry};
use myrient_core::search::normalize;
use myrient_core::{Catalog, Config, Database};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

/// Config pointed at a mock archive under `/files/`, tuned for fast tests.
pub fn test_config(server: &MockServer, root: &Path) -> Config {
    test_config_at(&server.uri(), root)
}

/// Same as [`test_config`] for a server at `base` (`http://host:port`).
pub fn test_config_at(base: &str, root: &Path) -> Config {
    Config {
        download_root: root.join("downloads"),
        database_path: root.join("catalog.db"),
        base_url: format!("{base}/files/"),
        bucket_capacity: 100,
        refill_per_sec: 1_000.0,
        connect_timeout_secs: 5,
        read_timeout_secs: 30,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
        progress_flush_ms: 50,
        respect_robots_txt: false,
        include_patterns: Vec::new(),
        exclude_patterns: Vec::new(),
        ..Config::default()
    }
}

pub async fn memory_catalog() -> Catalog {
    let db = Database::new_in_memory()
        .await
        .expect("in-memory database should open");
    Catalog::new(db)
}

/// A Game Boy cartridge entry at `address`.
pub fn game_boy_entry(address: &str, name: &str, size: Option<u64>) -> NewEntry {
    NewEntry {
        address: address.to_string(),
        name: name.to_string(),
        normalized_name: normalize(name),
        size,
        size_exact: size.is_some(),
        console: Some("Game Boy".to_string()),
        region: Some("World".to_string()),
        collection: CollectionSpec {
            name: "No-Intro".to_string(),
            content_type: ContentType::Cartridge,
            cadence: Cadence::Daily,
        },
        parent_path: "No-Intro/Nintendo - Game Boy".to_string(),
        format: name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default(),
        requires_conversion: false,
    }
}

/// An nginx-style listing table. Each row is `(href, size cell)`.
pub fn listing_html(rows: &[(&str, &str)]) -> String {
    let mut html = String::from(
        "<html><body><table>\
         <tr><th><a href=\"?C=N&amp;O=D\">File Name</a></th><th>Size</th><th>Date</th></tr>\
         <tr><td><a href=\"../\">Parent directory/</a></td><td>-</td><td>-</td></tr>",
    );
    for (href, size) in rows {
        let text = urlencoding::decode(href).map_or_else(|_| (*href).to_string(), |s| s.into_owned());
        html.push_str(&format!(
            "<tr><td class=\"link\"><a href=\"{href}\" title=\"{text}\">{text}</a></td>\
             <td class=\"size\">{size}</td><td class=\"date\">2024-Jan-01 00:00</td></tr>"
        ));
    }
    html.push_str("</table></body></html>");
    html
}

/// One zip member; `deflate` picks method 8 instead of stored.
pub struct ZipMember<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub deflate: bool,
}

impl<'a> ZipMember<'a> {
    pub fn stored(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            data,
            deflate: false,
        }
    }

    pub fn deflated(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            data,
            deflate: true,
        }
    }
}

/// Builds a minimal zip archive in memory.
pub fn zip_archive(members: &[ZipMember<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for member in members {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(member.data);
        let (method, payload) = if member.deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(member.data).expect("deflate in memory");
            (8u16, encoder.finish().expect("finish deflate"))
        } else {
            (0u16, member.data.to_vec())
        };
        let compressed = payload.len() as u32;
        let uncompressed = member.data.len() as u32;
        let name_len = member.name.len() as u16;

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(member.name.as_bytes());
        out.extend_from_slice(&payload);

        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&[0u8; 4]);
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&compressed.to_le_bytes());
        central.extend_from_slice(&uncompressed.to_le_bytes());
        central.extend_from_slice(&name_len.to_le_bytes());
        central.extend_from_slice(&[0u8; 12]);
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(member.name.as_bytes());
    }
    let directory_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(members.len() as u16).to_le_bytes());
    out.extend_from_slice(&(members.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&directory_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Serves `body`, answering `Range: bytes=N-` with 206 when `honor_ranges`.
pub struct RangeResponder {
    pub body: Vec<u8>,
    pub honor_ranges: bool,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let start = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.strip_suffix('-'))
            .and_then(|v| v.parse::<usize>().ok());
        match start {
            Some(start) if self.honor_ranges && start < self.body.len() => {
                let total = self.body.len();
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{}/{total}", total - 1),
                    )
                    .set_body_bytes(self.body[start..].to_vec())
            }
            Some(_) if self.honor_ranges => ResponseTemplate::new(416),
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

/// Fails the first `failures` requests with `status`, then serves `body`.
pub struct FlakyResponder {
    pub requests: Arc<AtomicUsize>,
    pub failures: usize,
    pub status: u16,
    pub retry_after: Option<&'static str>,
    pub body: Vec<u8>,
}

impl FlakyResponder {
    pub fn new(failures: usize, status: u16, body: Vec<u8>) -> Self {
        Self {
            requests: Arc::new(AtomicUsize::new(0)),
            failures,
            status,
            retry_after: None,
            body,
        }
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let seen = self.requests.fetch_add(1, Ordering::SeqCst);
        if seen < self.failures {
            let mut response = ResponseTemplate::new(self.status);
            if let Some(retry_after) = self.retry_after {
                response = response.insert_header("Retry-After", retry_after);
            }
            response
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body.clone())
        }
    }
}

/// How a [`TrickleServer`] ends each response body.
#[derive(Debug, Clone, Copy)]
pub enum Framing {
    /// `Content-Length` matches the bytes sent.
    Length,
    /// `Content-Length` announces the full body, but the connection closes
    /// after `keep` bytes.
    Truncated { keep: usize },
    /// No `Content-Length`; the body ends when the connection closes.
    CloseDelimited,
}

/// What a [`TrickleServer`] sends for every request.
#[derive(Debug, Clone)]
pub struct Trickle {
    pub body: Vec<u8>,
    pub chunk: usize,
    /// Sleep between chunks.
    pub pause: Duration,
    pub framing: Framing,
    pub honor_ranges: bool,
}

/// Plain HTTP/1.1 server that writes bodies in timed chunks, one request per
/// connection. Tracks in-flight requests overall and per `Host` header.
pub struct TrickleServer {
    addr: SocketAddr,
    pub requests: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    in_flight: Arc<Mutex<HashMap<String, (usize, usize)>>>,
    task: JoinHandle<()>,
}

impl TrickleServer {
    pub async fn start(trickle: Trickle) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let requests = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(Mutex::new(HashMap::new()));
        let current = Arc::new(AtomicUsize::new(0));

        let task = {
            let requests = Arc::clone(&requests);
            let peak = Arc::clone(&peak);
            let in_flight = Arc::clone(&in_flight);
            let trickle = Arc::new(trickle);
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let trickle = Arc::clone(&trickle);
                    let requests = Arc::clone(&requests);
                    let peak = Arc::clone(&peak);
                    let current = Arc::clone(&current);
                    let in_flight = Arc::clone(&in_flight);
                    tokio::spawn(async move {
                        let Ok(head) = read_head(&mut stream).await else {
                            return;
                        };
                        if head.is_empty() {
                            return;
                        }
                        requests.fetch_add(1, Ordering::SeqCst);
                        let host = header(&head, "host").unwrap_or_default().to_string();
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        {
                            let mut hosts = in_flight.lock().unwrap();
                            let slot = hosts.entry(host.clone()).or_insert((0, 0));
                            slot.0 += 1;
                            slot.1 = slot.1.max(slot.0);
                        }

                        let _ = respond(stream, &head, &trickle).await;

                        current.fetch_sub(1, Ordering::SeqCst);
                        if let Some(slot) = in_flight.lock().unwrap().get_mut(&host) {
                            slot.0 -= 1;
                        }
                    });
                }
            })
        };

        Self {
            addr,
            requests,
            peak,
            in_flight,
            task,
        }
    }

    /// `http://127.0.0.1:port`.
    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Same server reached through the `localhost` name, a second host.
    pub fn localhost_uri(&self) -> String {
        format!("http://localhost:{}", self.addr.port())
    }

    /// Highest number of simultaneous requests seen for one `Host` value.
    pub fn peak_per_host(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .values()
            .map(|(_, peak)| *peak)
            .max()
            .unwrap_or(0)
    }
}

impl Drop for TrickleServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

async fn respond(mut stream: TcpStream, head: &str, trickle: &Trickle) -> std::io::Result<()> {
    let total = trickle.body.len();
    let start = header(head, "range")
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.strip_suffix('-'))
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|start| trickle.honor_ranges && *start > 0 && *start < total)
        .unwrap_or(0);
    let body = &trickle.body[start..];

    let mut response = if start > 0 {
        format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{}/{total}\r\n",
            total - 1
        )
    } else {
        "HTTP/1.1 200 OK\r\n".to_string()
    };
    let send = match trickle.framing {
        Framing::Length => {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            body.len()
        }
        Framing::Truncated { keep } => {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            keep.min(body.len())
        }
        Framing::CloseDelimited => body.len(),
    };
    response.push_str("Connection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    for piece in body[..send].chunks(trickle.chunk.max(1)) {
        tokio::time::sleep(trickle.pause).await;
        stream.write_all(piece).await?;
        stream.flush().await?;
    }
    stream.shutdown().await
}

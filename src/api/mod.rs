//! HTTP front end.
//!
//! A small HTTP/1.1 server on a non-blocking listener. It never owns a
//! thread: `poll` accepts a bounded number of new connections, then moves
//! every open connection forward without blocking. Partial requests and
//! partial replies stay buffered on their connection until the next `poll`,
//! so one slow peer cannot hold up the main loop or a burst wait. Capture
//! and burst requests are acknowledged immediately and parked in the
//! context's single task slot.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use crate::burst::BurstRequest;
use crate::context::{DeferredTask, DeviceContext, GeometryChange};
use crate::error::{StorageError, ValidationError};
use crate::settings::{ByteOrder, PixelLayout, Quality, Resolution};

const MAX_REQUEST_BYTES: usize = 8192;
const MAX_ACCEPTS_PER_POLL: usize = 8;
const MAX_OPEN_CONNECTIONS: usize = 16;
/// Time a peer gets to deliver its request, and again to take the reply.
const CONNECTION_DEADLINE: Duration = Duration::from_secs(2);

const ROUTES: &[(&str, &str)] = &[
    ("/", "GET"),
    ("/capture", "GET"),
    ("/image", "GET"),
    ("/delete", "GET"),
    ("/list", "GET"),
    ("/setquality", "POST"),
    ("/setresolution", "POST"),
    ("/setpixelformat", "POST"),
    ("/setendianness", "POST"),
    ("/getsettings", "GET"),
    ("/burstcapture", "POST"),
    ("/burststatus", "GET"),
];

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Used for `/burstcapture` fields the client leaves out.
    pub burst_defaults: BurstRequest,
}

pub struct HttpServer {
    listener: TcpListener,
    addr: SocketAddr,
    burst_defaults: BurstRequest,
    connections: Vec<Connection>,
}

impl HttpServer {
    pub fn bind(cfg: &ApiConfig) -> Result<Self> {
        let configured: SocketAddr = cfg
            .addr
            .parse()
            .map_err(|err| anyhow!("invalid http address '{}': {}", cfg.addr, err))?;
        let listener = TcpListener::bind(configured)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        log::info!("http server listening on http://{addr}/");
        Ok(Self {
            listener,
            addr,
            burst_defaults: cfg.burst_defaults,
            connections: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections accepted but not yet answered and closed.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Accept waiting peers and advance every open connection without
    /// blocking. Returns how many requests were routed.
    pub fn poll(&mut self, ctx: &mut DeviceContext) -> Result<usize> {
        self.accept_waiting()?;

        let mut served = 0;
        for mut conn in std::mem::take(&mut self.connections) {
            match conn.receive() {
                Ok(Some(request)) => {
                    served += 1;
                    log::debug!("http {} {}", request.method, request.raw_path);
                    let response = self.route(&request, ctx);
                    conn.respond(response);
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("http request from {} rejected: {err}", conn.peer);
                    continue;
                }
            }
            match conn.send() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    log::warn!("http reply to {} failed: {err}", conn.peer);
                    continue;
                }
            }
            if Instant::now() >= conn.deadline {
                log::warn!("http connection from {} timed out", conn.peer);
                continue;
            }
            self.connections.push(conn);
        }
        Ok(served)
    }

    fn accept_waiting(&mut self) -> Result<()> {
        for _ in 0..MAX_ACCEPTS_PER_POLL {
            if self.connections.len() >= MAX_OPEN_CONNECTIONS {
                break;
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        log::warn!("http connection from {peer} dropped: {err}");
                        continue;
                    }
                    self.connections.push(Connection::new(stream, peer));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn route(&self, request: &HttpRequest, ctx: &mut DeviceContext) -> Response {
        let Some((_, method)) = ROUTES.iter().find(|(path, _)| *path == request.path) else {
            return Response::json(404, json!({"status": "error", "message": "not found"}));
        };
        if request.method != *method {
            return Response::json(
                405,
                json!({"status": "error", "message": "method not allowed"}),
            );
        }

        match request.path.as_str() {
            "/" => Response::text(200, &index_text()),
            "/capture" => match ctx.enqueue(DeferredTask::Capture) {
                Ok(()) => Response::text(200, "Capturing image..."),
                Err(_) => busy(),
            },
            "/image" => image(request, ctx),
            "/delete" => {
                let deleted = ctx.store.delete_all();
                Response::text(200, &format!("Deleted {deleted} images"))
            }
            "/list" => {
                let images: Vec<_> = ctx.store.enumerate().collect();
                Response::json(200, json!({ "images": images }))
            }
            "/setquality" => match parse_int_body(request).and_then(Quality::new) {
                Ok(q) => {
                    ctx.set_quality(q);
                    Response::json(200, json!({"status": "ok", "quality": q.value()}))
                }
                Err(err) => validation_error(err),
            },
            "/setresolution" => match parse_int_body(request).and_then(Resolution::from_index) {
                Ok(res) => geometry_response(
                    ctx.set_resolution(res),
                    json!({"status": "ok", "resolution": res.index()}),
                ),
                Err(err) => validation_error(err),
            },
            "/setpixelformat" => match parse_int_body(request).and_then(PixelLayout::from_index) {
                Ok(layout) => geometry_response(
                    ctx.set_pixel_layout(layout),
                    json!({"status": "ok", "pixelFormat": layout.index()}),
                ),
                Err(err) => validation_error(err),
            },
            "/setendianness" => match parse_int_body(request).and_then(ByteOrder::from_flag) {
                Ok(order) => {
                    ctx.set_byte_order(order);
                    Response::json(200, json!({"status": "ok", "endianness": order.flag()}))
                }
                Err(err) => validation_error(err),
            },
            "/getsettings" => Response::json(200, json!(ctx.settings().snapshot())),
            "/burstcapture" => self.burst_capture(request, ctx),
            "/burststatus" => Response::json(200, json!(ctx.burst)),
            _ => Response::json(404, json!({"status": "error", "message": "not found"})),
        }
    }

    fn burst_capture(&self, request: &HttpRequest, ctx: &mut DeviceContext) -> Response {
        if !ctx.store.is_present() {
            return Response::json(
                400,
                json!({"status": "error", "error": "storage_failed", "message": "No storage available"}),
            );
        }
        if ctx.burst_busy() {
            return Response::json(
                409,
                json!({"status": "error", "message": "Burst already in progress"}),
            );
        }

        let body = if request.body.iter().all(u8::is_ascii_whitespace) {
            BurstBody::default()
        } else {
            match serde_json::from_slice::<BurstBody>(&request.body) {
                Ok(body) => body,
                Err(err) => {
                    return Response::json(
                        400,
                        json!({"status": "error", "message": format!("Invalid JSON: {err}")}),
                    )
                }
            }
        };
        let count = body.count.unwrap_or(self.burst_defaults.count() as i64);
        let interval = body
            .interval
            .unwrap_or(self.burst_defaults.interval().as_secs_f64());
        let burst = match BurstRequest::new(count, interval) {
            Ok(burst) => burst,
            Err(err) => return validation_error(err),
        };

        match ctx.enqueue(DeferredTask::Burst(burst)) {
            Ok(()) => Response::json(
                200,
                json!({"status": "ok", "count": burst.count(), "interval": interval}),
            ),
            Err(_) => busy(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BurstBody {
    count: Option<i64>,
    interval: Option<f64>,
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }
}

fn image(request: &HttpRequest, ctx: &DeviceContext) -> Response {
    let Some(raw) = request.query.get("n") else {
        return Response::text(400, "Missing image number");
    };
    let Ok(number) = raw.parse::<u32>() else {
        return Response::text(400, "Invalid image number");
    };
    match ctx.store.read(number) {
        Ok(Some(bytes)) => Response {
            status: 200,
            content_type: "image/jpeg",
            body: bytes,
        },
        Ok(None) | Err(StorageError::Absent) => Response::text(404, "Image not found"),
        Err(err) => {
            log::warn!("failed to read image {number}: {err}");
            Response::text(500, "Failed to open image")
        }
    }
}

fn busy() -> Response {
    Response::json(
        503,
        json!({"status": "error", "message": "Another task is already queued"}),
    )
}

fn validation_error(err: ValidationError) -> Response {
    Response::json(
        400,
        json!({"status": "error", "error": err.kind(), "message": err.to_string()}),
    )
}

fn geometry_response(change: GeometryChange, ok: serde_json::Value) -> Response {
    match change {
        GeometryChange::Unchanged | GeometryChange::Reinitialized => Response::json(200, ok),
        GeometryChange::ReinitFailed(err) => Response::json(
            500,
            json!({"status": "error", "error": "sensor_unavailable", "message": err.to_string()}),
        ),
    }
}

fn parse_int_body(request: &HttpRequest) -> Result<i64, ValidationError> {
    let text = String::from_utf8_lossy(&request.body);
    let text = text.trim();
    text.parse::<i64>()
        .map_err(|_| ValidationError::NotANumber(text.to_string()))
}

fn index_text() -> String {
    let mut out = String::from("camera node\n\n");
    for (path, method) in ROUTES.iter().skip(1) {
        out.push_str(&format!("{method:<5} {path}\n"));
    }
    out
}

enum Phase {
    Reading(Vec<u8>),
    Writing { out: Vec<u8>, sent: usize },
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    phase: Phase,
    deadline: Instant,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            phase: Phase::Reading(Vec::new()),
            deadline: Instant::now() + CONNECTION_DEADLINE,
        }
    }

    /// Read whatever the peer has sent so far. `Some` once a whole request is in.
    fn receive(&mut self) -> Result<Option<HttpRequest>> {
        let Phase::Reading(data) = &mut self.phase else {
            return Ok(None);
        };
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    return parse_request(data)?
                        .map(Some)
                        .ok_or_else(|| anyhow!("incomplete request"));
                }
                Ok(n) => {
                    data.extend_from_slice(&buf[..n]);
                    if data.len() > MAX_REQUEST_BYTES {
                        return Err(anyhow!("request too large"));
                    }
                    if let Some(request) = parse_request(data)? {
                        return Ok(Some(request));
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn respond(&mut self, response: Response) {
        let mut out = format!(
            "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
            status_line(response.status),
            response.content_type,
            response.body.len()
        )
        .into_bytes();
        out.extend_from_slice(&response.body);
        self.phase = Phase::Writing { out, sent: 0 };
        self.deadline = Instant::now() + CONNECTION_DEADLINE;
    }

    /// Write as much of the reply as the socket takes. `true` once all of it is out.
    fn send(&mut self) -> Result<bool> {
        let Phase::Writing { out, sent } = &mut self.phase else {
            return Ok(false);
        };
        while *sent < out.len() {
            match self.stream.write(&out[*sent..]) {
                Ok(0) => return Err(anyhow!("connection closed mid-reply")),
                Ok(n) => *sent += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }
}

/// Parse a buffered request. `None` while the head or body is still arriving.
fn parse_request(data: &[u8]) -> Result<Option<HttpRequest>> {
    let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };
    let header_end = pos + 4;

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{v}'"))?,
        None => 0,
    };
    if header_end + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    if data.len() < header_end + content_length {
        return Ok(None);
    }
    let body = data[header_end..header_end + content_length].to_vec();

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(Some(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        body,
        raw_path: raw_path.to_string(),
    }))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
    raw_path: String,
}

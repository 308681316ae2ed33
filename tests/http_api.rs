use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use capture_node::api::{ApiConfig, HttpServer};
use capture_node::{
    BurstController, BurstRequest, ByteOrder, DeferredTask, DeviceContext, DeviceSettings,
    FileStore, FrameSource, MemoryBlockStore, PixelLayout, Quality, Resolution, ScanPolicy,
    SyntheticConfig, SyntheticSensor,
};

struct Node {
    ctx: DeviceContext,
    server: HttpServer,
}

impl Node {
    fn new(store: FileStore) -> Self {
        let settings = DeviceSettings::new(
            Quality::DEFAULT,
            Resolution::Qqvga,
            PixelLayout::Jpeg,
            ByteOrder::Little,
        );
        let mut source = FrameSource::new(
            Box::new(SyntheticSensor::new(SyntheticConfig {
                aux_memory: true,
                starve_every: None,
            })),
            Duration::ZERO,
        );
        source.initialize(&settings).expect("camera init");
        let server = HttpServer::bind(&ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            burst_defaults: BurstRequest::new(3, 0.1).unwrap(),
        })
        .expect("bind");
        Self {
            ctx: DeviceContext::new(settings, source, store),
            server,
        }
    }

    fn with_memory_store() -> Self {
        Self::new(FileStore::new(
            Box::new(MemoryBlockStore::new()),
            ScanPolicy::StopAtGap,
        ))
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    fn get(&mut self, path: &str) -> Reply {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: node\r\n\r\n");
        self.send(raw.as_bytes())
    }

    fn post(&mut self, path: &str, body: &str) -> Reply {
        let raw = format!(
            "POST {path} HTTP/1.1\r\nHost: node\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        self.send(raw.as_bytes())
    }

    fn send(&mut self, raw: &[u8]) -> Reply {
        let mut stream = TcpStream::connect(self.addr()).expect("connect");
        stream.write_all(raw).expect("write request");
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .expect("read timeout");
        let reader = std::thread::spawn(move || read_reply(&mut stream));
        let mut served = 0;
        let deadline = Instant::now() + Duration::from_secs(2);
        while !reader.is_finished() && Instant::now() < deadline {
            served += self.server.poll(&mut self.ctx).expect("poll");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(served, 1, "request was not served");
        reader.join().expect("reply")
    }

    /// Keep polling until every reply has been written out.
    fn drain(&mut self, deadline: Instant) {
        while self.server.open_connections() > 0 && Instant::now() < deadline {
            self.server.poll(&mut self.ctx).expect("poll");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

struct Reply {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

impl Reply {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

fn read_reply(stream: &mut TcpStream) -> Reply {
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status code");
    let content_type = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Type: "))
        .unwrap_or_default()
        .to_string();
    Reply {
        status,
        content_type,
        body: raw[split + 4..].to_vec(),
    }
}

fn run_pending(node: &mut Node) {
    match node.ctx.take_pending() {
        Some(DeferredTask::Capture) => {
            node.ctx.capture().expect("deferred capture");
        }
        Some(DeferredTask::Burst(request)) => {
            let server = &mut node.server;
            BurstController::run(&mut node.ctx, request, |ctx| {
                server.poll(ctx).expect("poll");
            });
        }
        None => {}
    }
}

#[test]
fn setquality_validates_before_applying() {
    let mut node = Node::with_memory_store();

    let reply = node.post("/setquality", "64");
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json()["status"], "error");
    assert_eq!(reply.json()["error"], "validation_error");
    assert_eq!(node.get("/getsettings").json()["quality"], 12);

    let reply = node.post("/setquality", "10");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["status"], "ok");
    assert_eq!(reply.json()["quality"], 10);
    assert_eq!(node.get("/getsettings").json()["quality"], 10);
    assert_eq!(node.ctx.source.stats().inits, 1);
}

#[test]
fn getsettings_reports_wire_indices() {
    let mut node = Node::with_memory_store();
    assert_eq!(node.post("/setresolution", "2").status, 200);
    assert_eq!(node.post("/setpixelformat", "1").status, 200);
    assert_eq!(node.post("/setendianness", "1").json()["endianness"], 1);
    let settings = node.get("/getsettings").json();
    assert_eq!(settings["resolution"], 2);
    assert_eq!(settings["pixelFormat"], 1);
    assert_eq!(settings["endianness"], 1);
}

#[test]
fn setresolution_reinitializes_only_on_change() {
    let mut node = Node::with_memory_store();
    let inits = node.ctx.source.stats().inits;
    let reply = node.post("/setresolution", "0");
    assert_eq!(reply.json()["resolution"], 0);
    assert_eq!(node.ctx.source.stats().inits, inits);

    let reply = node.post("/setresolution", "4");
    assert_eq!(reply.status, 200);
    assert_eq!(node.ctx.source.stats().inits, inits + 1);

    assert_eq!(node.post("/setresolution", "8").status, 400);
    assert_eq!(node.post("/setpixelformat", "3").status, 400);
    assert_eq!(node.post("/setendianness", "2").status, 400);
    assert_eq!(node.post("/setquality", "ten").status, 400);
    assert_eq!(node.ctx.source.stats().inits, inits + 1);
}

#[test]
fn capture_is_acknowledged_then_run_by_the_loop() {
    let mut node = Node::with_memory_store();
    let reply = node.get("/capture");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "Capturing image...");
    assert_eq!(node.ctx.pending(), Some(&DeferredTask::Capture));
    assert!(node.ctx.store.enumerate().next().is_none());

    let reply = node.get("/capture");
    assert_eq!(reply.status, 503);

    run_pending(&mut node);

    let list = node.get("/list").json();
    let images = list["images"].as_array().expect("images array");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["number"], 1);
    assert_eq!(images[0]["filename"], "1.jpg");
    assert!(images[0]["size"].as_u64().unwrap() > 0);

    let reply = node.get("/image?n=1");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.content_type, "image/jpeg");
    assert_eq!(&reply.body[..2], &[0xFF, 0xD8]);

    assert_eq!(node.get("/image?n=2").status, 404);
    assert_eq!(node.get("/image").status, 400);

    let reply = node.get("/delete");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "Deleted 1 images");
    assert_eq!(node.get("/list").json()["images"].as_array().unwrap().len(), 0);
}

#[test]
fn burstcapture_validates_and_refuses_overlap() {
    let mut node = Node::with_memory_store();

    let reply = node.post("/burstcapture", r#"{"count":0,"interval":1.0}"#);
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json()["message"], "Count must be between 1 and 200");

    let reply = node.post("/burstcapture", r#"{"count":5,"interval":9}"#);
    assert_eq!(reply.status, 400);
    assert_eq!(
        reply.json()["message"],
        "Interval must be between 0.1 and 5.0 seconds"
    );

    assert_eq!(node.post("/burstcapture", "{not json").status, 400);
    assert!(node.ctx.pending().is_none());

    let reply = node.post("/burstcapture", r#"{"count":2,"interval":0.1}"#);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["count"], 2);
    assert_eq!(reply.json()["interval"], 0.1);

    assert_eq!(
        node.post("/burstcapture", r#"{"count":2,"interval":0.1}"#).status,
        409
    );

    run_pending(&mut node);
    assert_eq!(node.ctx.store.enumerate().count(), 2);
    let status = node.get("/burststatus").json();
    assert_eq!(status["inProgress"], false);
    assert_eq!(status["current"], 0);
    assert_eq!(status["total"], 0);
}

#[test]
fn burstcapture_uses_defaults_for_missing_fields() {
    let mut node = Node::with_memory_store();
    let reply = node.post("/burstcapture", "");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["count"], 3);
    assert_eq!(
        node.ctx.pending(),
        Some(&DeferredTask::Burst(BurstRequest::new(3, 0.1).unwrap()))
    );
}

#[test]
fn burstcapture_without_storage_is_rejected() {
    let mut node = Node::new(FileStore::absent(ScanPolicy::StopAtGap));
    let reply = node.post("/burstcapture", r#"{"count":2,"interval":0.5}"#);
    assert_eq!(reply.status, 400);
    assert!(node.ctx.pending().is_none());
}

#[test]
fn unknown_path_and_wrong_method() {
    let mut node = Node::with_memory_store();
    assert_eq!(node.get("/nope").status, 404);
    assert_eq!(node.get("/setquality").status, 405);
    assert_eq!(node.post("/capture", "").status, 405);
    let index = node.get("/");
    assert_eq!(index.status, 200);
    assert!(index.text().contains("/burstcapture"));
}

#[test]
fn status_is_served_while_a_burst_waits() {
    let mut node = Node::with_memory_store();
    let addr = node.addr();

    let client = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        let started = Instant::now();
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .write_all(b"GET /burststatus HTTP/1.1\r\nHost: node\r\n\r\n")
            .expect("write");
        let reply = read_reply(&mut stream);
        (started.elapsed(), reply.status, reply.body)
    });

    let request = BurstRequest::new(3, 1.0).unwrap();
    let started = Instant::now();
    let server = &mut node.server;
    let summary = BurstController::run(&mut node.ctx, request, |ctx| {
        server.poll(ctx).expect("poll");
    });
    assert_eq!(summary.attempted, 3);
    assert!(started.elapsed() >= Duration::from_secs(2));

    let (latency, status, body) = client.join().expect("client thread");
    assert_eq!(status, 200);
    assert!(
        latency < Duration::from_millis(500),
        "status request took {latency:?}"
    );
    let state: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(state["inProgress"], true);
    assert_eq!(state["total"], 3);
    assert_eq!(state["current"], 1);
    assert_eq!(node.ctx.burst.total, 0);
}

#[test]
fn stalled_client_does_not_hold_up_other_requests() {
    let mut node = Node::with_memory_store();
    let mut stalled = TcpStream::connect(node.addr()).expect("connect");
    stalled
        .write_all(b"GET /burststatus HTTP/1.1\r\nHost")
        .expect("write");

    let started = Instant::now();
    let reply = node.get("/getsettings");
    assert_eq!(reply.status, 200);
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "request took {:?}",
        started.elapsed()
    );
    assert_eq!(node.server.open_connections(), 1);

    // the stalled peer is dropped once its deadline passes
    node.drain(Instant::now() + Duration::from_secs(5));
    assert_eq!(node.server.open_connections(), 0);
    stalled
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("timeout");
    let mut rest = Vec::new();
    let _ = stalled.read_to_end(&mut rest);
    assert!(rest.is_empty());
}

#[test]
fn trickling_client_does_not_stall_a_burst() {
    let mut node = Node::with_memory_store();
    let addr = node.addr();

    let trickler = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("connect");
        for byte in b"GET /burststatus HTTP/1.1\r\n".iter().take(6) {
            if stream.write_all(&[*byte]).is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    });
    let client = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        let started = Instant::now();
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .write_all(b"GET /burststatus HTTP/1.1\r\nHost: node\r\n\r\n")
            .expect("write");
        let reply = read_reply(&mut stream);
        (started.elapsed(), reply.status)
    });

    let started = Instant::now();
    let server = &mut node.server;
    let summary = BurstController::run(&mut node.ctx, BurstRequest::new(2, 1.0).unwrap(), |ctx| {
        server.poll(ctx).expect("poll");
    });
    let wall = started.elapsed();
    assert_eq!(summary.attempted, 2);
    assert!(wall < Duration::from_millis(1800), "burst took {wall:?}");

    let (latency, status) = client.join().expect("client thread");
    trickler.join().expect("trickle thread");
    assert_eq!(status, 200);
    assert!(
        latency < Duration::from_millis(500),
        "status request took {latency:?}"
    );
}

#[test]
fn each_poll_accepts_a_bounded_number_of_peers() {
    let mut node = Node::with_memory_store();
    let mut streams: Vec<TcpStream> = (0..12)
        .map(|_| {
            let mut stream = TcpStream::connect(node.addr()).expect("connect");
            stream
                .write_all(b"GET /burststatus HTTP/1.1\r\nHost: node\r\n\r\n")
                .expect("write");
            stream
        })
        .collect();
    std::thread::sleep(Duration::from_millis(100));

    let first = node.server.poll(&mut node.ctx).expect("poll");
    assert!(first > 0 && first <= 8, "served {first} in one poll");

    let mut total = first;
    let deadline = Instant::now() + Duration::from_secs(2);
    while total < streams.len() && Instant::now() < deadline {
        total += node.server.poll(&mut node.ctx).expect("poll");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(total, streams.len());
    node.drain(deadline);

    for stream in &mut streams {
        assert_eq!(read_reply(stream).status, 200);
    }
}

//! MJPEG broadcaster.
//!
//! Serves the latest-frame slot to any number of viewers over HTTP as a
//! `multipart/x-mixed-replace` stream. One accept thread, one thread per
//! connection. Every viewer keeps its own "last sequence sent" and reads the
//! shared `FrameBuffer`; there is no per-viewer copy of the capture pipeline.
//!
//! A viewer that stops reading only stalls its own thread (bounded by the
//! socket write timeout). A failed write ends that viewer and nothing else.

mod http;

use anyhow::Result;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::FrameBuffer;
use crate::StreamError;

pub use http::BOUNDARY;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_ENDPOINT: &str = "video_feed";

const ACCEPT_IDLE: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const INDEX_HTML: &str = "<!doctype html>\n<html><head><meta name=\"viewport\" content=\"width=device-width\"><title>Webcam Cast</title></head>\n<body style=\"margin:0;background:#111\"><img src=\"/{endpoint}\" style=\"width:100%\" alt=\"live camera\"></body></html>\n";

#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Interface to bind. All interfaces by default.
    pub bind_ip: IpAddr,
    /// TCP port. 0 picks an ephemeral port (see `BroadcastHandle::addr`).
    pub port: u16,
    /// Stream path without the leading slash.
    pub endpoint: String,
    /// How long a viewer waits for a newer frame before re-checking shutdown.
    pub poll_interval: Duration,
    /// How long `stop` waits for viewer threads before detaching them.
    pub drain_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

pub struct StreamServer {
    cfg: StreamConfig,
    buffer: Arc<FrameBuffer>,
}

impl StreamServer {
    pub fn new(cfg: StreamConfig, buffer: Arc<FrameBuffer>) -> Self {
        Self { cfg, buffer }
    }

    /// Bind the listener and start accepting viewers.
    pub fn spawn(self) -> Result<BroadcastHandle, StreamError> {
        let configured = SocketAddr::new(self.cfg.bind_ip, self.cfg.port);
        let bind_err = |source: io::Error| StreamError::ServerBind {
            addr: configured.to_string(),
            source,
        };
        let listener = TcpListener::bind(configured).map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        let shared = Arc::new(Shared {
            buffer: self.buffer,
            endpoint_path: format!("/{}", self.cfg.endpoint.trim_start_matches('/')),
            poll_interval: self.cfg.poll_interval,
            shutdown: AtomicBool::new(false),
            viewers: ViewerRegistry::default(),
        });
        let thread_shared = shared.clone();
        let join = std::thread::Builder::new()
            .name("webcast-accept".into())
            .spawn(move || run_accept(listener, thread_shared))
            .map_err(bind_err)?;

        log::info!("stream server listening on {}", addr);
        Ok(BroadcastHandle {
            addr,
            shared,
            drain_timeout: self.cfg.drain_timeout,
            join: Some(join),
        })
    }
}

/// Running broadcaster. Stops on `stop()` or drop.
pub struct BroadcastHandle {
    addr: SocketAddr,
    shared: Arc<Shared>,
    drain_timeout: Duration,
    join: Option<JoinHandle<()>>,
}

impl BroadcastHandle {
    /// The address actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Viewers currently receiving the stream.
    pub fn viewer_count(&self) -> usize {
        self.shared.viewers.streaming.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.join.is_some()
    }

    /// Stop accepting, cut every open connection and wait (bounded) for the
    /// viewer threads to exit. Subsequent calls do nothing.
    pub fn stop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if join.join().is_err() {
            log::error!("stream accept thread panicked");
        }
        let cut = self.shared.viewers.disconnect_all();
        let stragglers = self.shared.viewers.drain(self.drain_timeout);
        if stragglers > 0 {
            log::warn!(
                "stream server stopped with {} connection(s) still draining",
                stragglers
            );
        }
        log::info!("stream server on {} stopped ({} connection(s) cut)", self.addr, cut);
    }
}

impl Drop for BroadcastHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Shared {
    buffer: Arc<FrameBuffer>,
    endpoint_path: String,
    poll_interval: Duration,
    shutdown: AtomicBool,
    viewers: ViewerRegistry,
}

#[derive(Default)]
struct ViewerRegistry {
    next_id: AtomicU64,
    streaming: AtomicUsize,
    sockets: Mutex<HashMap<u64, TcpStream>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ViewerRegistry {
    fn register(&self, stream: &TcpStream) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match stream.try_clone() {
            Ok(clone) => {
                lock(&self.sockets).insert(id, clone);
            }
            Err(err) => log::warn!("viewer {} cannot be force-closed: {}", id, err),
        }
        id
    }

    fn deregister(&self, id: u64) {
        lock(&self.sockets).remove(&id);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut threads = lock(&self.threads);
        threads.retain(|handle| !handle.is_finished());
        threads.push(handle);
    }

    fn disconnect_all(&self) -> usize {
        let sockets = std::mem::take(&mut *lock(&self.sockets));
        for socket in sockets.values() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        sockets.len()
    }

    /// Join viewer threads until `timeout`; returns how many were left running.
    fn drain(&self, timeout: Duration) -> usize {
        let mut pending = std::mem::take(&mut *lock(&self.threads));
        let deadline = Instant::now() + timeout;
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|handle| handle.is_finished());
            for handle in finished {
                let _ = handle.join();
            }
            pending = running;
            if pending.is_empty() || Instant::now() >= deadline {
                return pending.len();
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_accept(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let thread_shared = shared.clone();
                let spawned = std::thread::Builder::new()
                    .name("webcast-viewer".into())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, peer, &thread_shared) {
                            log::warn!("viewer {} request rejected: {}", peer, err);
                        }
                    });
                match spawned {
                    Ok(handle) => shared.viewers.track(handle),
                    Err(err) => log::error!("cannot spawn viewer thread for {}: {}", peer, err),
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_IDLE);
            }
            Err(err) => {
                // EMFILE and friends: keep serving the viewers we have.
                log::warn!("stream accept failed: {}", err);
                std::thread::sleep(ACCEPT_IDLE);
            }
        }
    }
    // Listener drops here: new connections are refused from now on.
}

fn handle_connection(mut stream: TcpStream, peer: SocketAddr, shared: &Shared) -> Result<()> {
    // Some platforms hand out accepted sockets in the listener's mode.
    stream.set_nonblocking(false)?;
    let id = shared.viewers.register(&stream);
    let result = route(&mut stream, peer, shared);
    shared.viewers.deregister(id);
    result
}

fn route(stream: &mut TcpStream, peer: SocketAddr, shared: &Shared) -> Result<()> {
    let request = http::read_request(stream)?;
    if request.method != "GET" {
        http::write_json_response(stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    if request.path == shared.endpoint_path {
        log::info!(
            "viewer {} connected ({})",
            peer,
            request
                .headers
                .get("user-agent")
                .map(String::as_str)
                .unwrap_or("unknown agent")
        );
        match stream_frames(stream, shared) {
            Ok(()) | Err(StreamError::ViewerDisconnected) => {
                log::info!("viewer {} disconnected", peer);
            }
            Err(err) => return Err(err.into()),
        }
        return Ok(());
    }
    match request.path.as_str() {
        "/" => {
            let endpoint = shared.endpoint_path.trim_start_matches('/');
            let page = INDEX_HTML.replace("{endpoint}", endpoint);
            http::write_response(stream, 200, "text/html; charset=utf-8", page.as_bytes())?;
        }
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "sequence": shared.buffer.sequence(),
                "viewers": shared.viewers.streaming.load(Ordering::SeqCst),
            });
            http::write_json_response(stream, 200, &body.to_string())?;
        }
        _ => {
            http::write_json_response(stream, 404, r#"{"error":"not_found"}"#)?;
        }
    }
    Ok(())
}

/// Per-viewer loop: send every frame newer than the last one sent, until the
/// viewer goes away or the server shuts down.
fn stream_frames(stream: &mut TcpStream, shared: &Shared) -> Result<(), StreamError> {
    let _viewer = StreamingGuard::new(&shared.viewers.streaming);
    stream.set_write_timeout(Some(WRITE_TIMEOUT)).map_err(disconnected)?;
    let _ = stream.set_nodelay(true);
    http::write_stream_head(stream).map_err(disconnected)?;

    let mut last_sent = 0u64;
    while !shared.shutdown.load(Ordering::SeqCst) {
        let Some(frame) = shared.buffer.wait_newer(last_sent, shared.poll_interval) else {
            continue;
        };
        http::write_frame_part(stream, &frame).map_err(disconnected)?;
        last_sent = frame.sequence;
    }
    Ok(())
}

fn disconnected(err: io::Error) -> StreamError {
    log::debug!("viewer write failed: {}", err);
    StreamError::ViewerDisconnected
}

struct StreamingGuard<'a>(&'a AtomicUsize);

impl<'a> StreamingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

//! Frame source: one camera, one capture thread, one latest-frame slot.
//!
//! The capture thread owns the `Camera` outright. It reads, encodes and
//! publishes at the configured cadence regardless of how many viewers are
//! connected. `close()` signals the thread, joins it, and only then drops the
//! camera the thread hands back, so no capture can happen after release.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{encode_jpeg, Camera, CameraOpener, CaptureConfig};
use crate::frame::{Frame, FrameBuffer};
use crate::StreamError;

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Consecutive transient failures after which the device is considered lost.
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Capture counters, readable while the loop runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub running: bool,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    dropped: AtomicU64,
    running: AtomicBool,
}

pub struct FrameSource {
    buffer: Arc<FrameBuffer>,
    counters: Arc<Counters>,
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<Box<dyn Camera>>>,
}

impl FrameSource {
    /// Claim the camera and start the capture thread.
    pub fn open(config: CaptureConfig, opener: &dyn CameraOpener) -> Result<Self, StreamError> {
        config.validate()?;
        let camera = open_with_retry(opener, &config)?;
        log::info!(
            "FrameSource: capturing from {} at {:.1} fps",
            camera.name(),
            config.target_fps
        );

        let buffer = Arc::new(FrameBuffer::new());
        let counters = Arc::new(Counters::default());
        counters.running.store(true, Ordering::SeqCst);
        let (stop_tx, stop_rx) = mpsc::channel();

        let device_index = config.device_index;
        let thread_buffer = buffer.clone();
        let thread_counters = counters.clone();
        let join = std::thread::Builder::new()
            .name("webcast-capture".into())
            .spawn(move || {
                run_capture(camera, config, thread_buffer, thread_counters, stop_rx)
            })
            .map_err(|err| {
                StreamError::device(device_index, format!("spawn capture thread: {err}"))
            })?;

        Ok(Self {
            buffer,
            counters,
            stop_tx: Some(stop_tx),
            join: Some(join),
        })
    }

    /// The most recent encoded frame, if any capture has succeeded yet.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.buffer.latest()
    }

    /// Shared handle to the latest-frame slot, for the broadcaster.
    pub fn buffer(&self) -> Arc<FrameBuffer> {
        self.buffer.clone()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            running: self.counters.running.load(Ordering::SeqCst),
        }
    }

    pub fn is_open(&self) -> bool {
        self.join.is_some()
    }

    /// Stop capturing and release the camera. Subsequent calls do nothing.
    pub fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The thread may already have exited on a device error.
            let _ = stop_tx.send(());
        }
        let Some(join) = self.join.take() else {
            return;
        };
        match join.join() {
            Ok(camera) => {
                log::info!("FrameSource: released {}", camera.name());
                drop(camera);
            }
            Err(_) => log::error!("FrameSource: capture thread panicked"),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_with_retry(
    opener: &dyn CameraOpener,
    config: &CaptureConfig,
) -> Result<Box<dyn Camera>, StreamError> {
    let mut attempt = 1;
    loop {
        match opener.open(config) {
            Ok(camera) => return Ok(camera),
            Err(err) if err.is_transient() && attempt < OPEN_ATTEMPTS => {
                log::warn!(
                    "FrameSource: camera {} busy (attempt {}/{}): {}",
                    config.device_index,
                    attempt,
                    OPEN_ATTEMPTS,
                    err
                );
                attempt += 1;
                std::thread::sleep(OPEN_RETRY_DELAY);
            }
            Err(err) if err.is_transient() => {
                return Err(StreamError::device(config.device_index, err.to_string()));
            }
            Err(err) => return Err(err),
        }
    }
}

fn run_capture(
    mut camera: Box<dyn Camera>,
    config: CaptureConfig,
    buffer: Arc<FrameBuffer>,
    counters: Arc<Counters>,
    stop_rx: mpsc::Receiver<()>,
) -> Box<dyn Camera> {
    let interval = config.frame_interval();
    let mut next_tick = Instant::now();
    let mut consecutive_failures = 0u32;

    loop {
        let result = camera
            .read()
            .and_then(|image| encode_jpeg(image, config.jpeg_quality));
        match result {
            Ok(jpeg) => {
                let sequence = buffer.publish(jpeg);
                counters.captured.fetch_add(1, Ordering::Relaxed);
                if sequence == 1 {
                    log::info!("FrameSource: first frame from {}", camera.name());
                }
                consecutive_failures = 0;
            }
            Err(err) if err.is_transient() => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                consecutive_failures += 1;
                if consecutive_failures == 1 {
                    log::warn!("FrameSource: skipped frame from {}: {}", camera.name(), err);
                } else {
                    log::debug!("FrameSource: skipped frame from {}: {}", camera.name(), err);
                }
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    log::error!(
                        "FrameSource: {} failed {} frames in a row, stopping capture",
                        camera.name(),
                        consecutive_failures
                    );
                    break;
                }
            }
            Err(err) => {
                log::error!("FrameSource: capture stopped: {}", err);
                break;
            }
        }

        next_tick += interval;
        let now = Instant::now();
        if next_tick < now {
            // Fell behind (slow device or encoder); don't try to catch up.
            next_tick = now;
        }
        match stop_rx.recv_timeout(next_tick - now) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    counters.running.store(false, Ordering::SeqCst);
    camera
}

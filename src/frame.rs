//! Latest-frame slot shared between the capture thread and viewers.
//!
//! - `Frame`: one encoded JPEG plus its sequence number.
//! - `FrameBuffer`: single-slot holder of the most recent `Frame`.
//!
//! The buffer is a latest-value cache, not a queue. The capture thread swaps
//! in a new `Arc<Frame>` under a mutex; readers clone the `Arc` and therefore
//! always hold a complete frame. Slow readers never hold up the camera and
//! fast readers never queue behind it, they just see the same frame again.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One encoded camera capture.
#[derive(Debug)]
pub struct Frame {
    /// Publish order, starting at 1. Never reused within a buffer.
    pub sequence: u64,
    jpeg: Arc<[u8]>,
}

impl Frame {
    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Slot {
    latest: Option<Arc<Frame>>,
    next_sequence: u64,
}

/// Single-slot holder of the most recently encoded frame.
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
    published: Condvar,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot with a new frame and wake waiting viewers.
    ///
    /// Returns the sequence number assigned to the frame.
    pub fn publish(&self, jpeg: impl Into<Arc<[u8]>>) -> u64 {
        let mut slot = self.lock();
        slot.next_sequence += 1;
        let sequence = slot.next_sequence;
        slot.latest = Some(Arc::new(Frame {
            sequence,
            jpeg: jpeg.into(),
        }));
        drop(slot);
        self.published.notify_all();
        sequence
    }

    /// The most recent frame, or `None` before the first publish.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.lock().latest.clone()
    }

    /// Sequence number of the most recent frame (0 before the first publish).
    pub fn sequence(&self) -> u64 {
        self.lock().next_sequence
    }

    /// Wait up to `timeout` for a frame newer than `after`.
    ///
    /// Returns immediately if one is already present. Returns `None` if the
    /// timeout elapses first.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Arc<Frame>> {
        let slot = self.lock();
        let (slot, _) = self
            .published
            .wait_timeout_while(slot, timeout, |slot| slot.next_sequence <= after)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.latest
            .as_ref()
            .filter(|frame| frame.sequence > after)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A panicking publisher cannot leave the slot half-written: the swap
        // is a single assignment, so a poisoned lock is still consistent.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn empty_buffer_has_no_frame() {
        let buf = FrameBuffer::new();
        assert!(buf.latest().is_none());
        assert_eq!(buf.sequence(), 0);
        assert!(buf.wait_newer(0, Duration::from_millis(10)).is_none());
    }

    #[test]
    fn publish_replaces_latest_and_increments_sequence() {
        let buf = FrameBuffer::new();
        assert_eq!(buf.publish(vec![1u8, 2, 3]), 1);
        assert_eq!(buf.publish(vec![4u8, 5]), 2);

        let latest = buf.latest().expect("frame");
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.jpeg(), &[4, 5]);
    }

    #[test]
    fn wait_newer_skips_already_seen_frames() {
        let buf = FrameBuffer::new();
        buf.publish(vec![1u8]);
        assert!(buf.wait_newer(1, Duration::from_millis(10)).is_none());
        let frame = buf.wait_newer(0, Duration::from_millis(10)).expect("frame");
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn wait_newer_wakes_on_publish() {
        let buf = Arc::new(FrameBuffer::new());
        let publisher = {
            let buf = buf.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buf.publish(vec![9u8; 4]);
            })
        };
        let frame = buf.wait_newer(0, Duration::from_secs(5)).expect("frame");
        assert_eq!(frame.sequence, 1);
        publisher.join().expect("publisher thread");
    }

    #[test]
    fn concurrent_readers_never_see_partial_frames() {
        // Every published frame is `len` copies of the byte `len as u8`,
        // so a torn read would show up as a length/content mismatch.
        let buf = Arc::new(FrameBuffer::new());
        let writer = {
            let buf = buf.clone();
            thread::spawn(move || {
                for i in 0..2_000usize {
                    let len = 64 + (i % 190);
                    buf.publish(vec![len as u8; len]);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buf = buf.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        if let Some(frame) = buf.latest() {
                            assert!(frame.len() >= 64);
                            assert!(frame.jpeg().iter().all(|b| *b == frame.len() as u8));
                            assert!(frame.sequence >= last);
                            last = frame.sequence;
                        }
                    }
                })
            })
            .collect();
        writer.join().expect("writer");
        for reader in readers {
            reader.join().expect("reader");
        }
        assert_eq!(buf.sequence(), 2_000);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stereo_stream_common::frame::Frame;
use tokio::sync::watch;

/// Single-writer, multi-reader cell holding the most recent frame.
///
/// Publishing swaps the whole `Arc<Frame>`, so a reader either sees the old
/// frame or the new one, never a mix. Readers hold their snapshot for as long
/// as they like; the writer never mutates a published frame.
pub struct FrameSlot {
    tx: watch::Sender<Arc<Frame>>,
    published: AtomicU64,
}

impl FrameSlot {
    pub fn new(initial: Frame) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            tx,
            published: AtomicU64::new(1),
        }
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Arc::new(frame));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the current frame. Never waits on the writer beyond the
    /// pointer swap.
    pub fn load(&self) -> Arc<Frame> {
        Arc::clone(&self.tx.borrow())
    }

    /// Number of frames ever stored, the initial one included.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Receiver that resolves `changed()` on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Frame>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_stream_common::frame::PixelFormat;
    use std::thread;

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![seq as u8; 3], 1, 1, PixelFormat::Rgb8, seq, 0).unwrap()
    }

    #[test]
    fn publish_replaces_snapshot() {
        let slot = FrameSlot::new(frame(0));
        let before = slot.load();
        slot.publish(frame(1));
        assert_eq!(before.seq, 0);
        assert_eq!(slot.load().seq, 1);
        assert_eq!(slot.published(), 2);
    }

    #[test]
    fn subscriber_sees_change() {
        let slot = FrameSlot::new(frame(0));
        let mut rx = slot.subscribe();
        assert!(!rx.has_changed().unwrap());
        slot.publish(frame(5));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().seq, 5);
    }

    #[test]
    fn concurrent_readers_see_whole_frames() {
        let slot = Arc::new(FrameSlot::new(frame(0)));
        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for seq in 1..=200u64 {
                    slot.publish(frame(seq));
                }
            })
        };
        for _ in 0..200 {
            let snap = slot.load();
            assert!(snap.data().iter().all(|&b| b == snap.seq as u8));
        }
        writer.join().unwrap();
        assert_eq!(slot.load().seq, 200);
    }
}

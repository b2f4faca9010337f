//! Single-slot hand-off of the latest decoded frame.

use crate::frame::VideoFrame;
use std::sync::Mutex;

/// Holds at most one pending frame.
///
/// `publish` installs a new frame and drops whatever was there before in
/// one guarded exchange, so the previous frame's storage is released
/// exactly once and never observed again.  `consume` takes and clears the
/// slot; `None` means "no new frame since the last pull", not an error.
pub struct FrameStore {
    slot: Mutex<Option<VideoFrame>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<VideoFrame>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install `frame` as the latest, releasing the previous occupant.
    pub fn publish(&self, frame: VideoFrame) {
        let previous = self.lock().replace(frame);
        // the old frame drops outside the critical section
        drop(previous);
    }

    /// Take and clear the latest frame, transferring ownership out.
    pub fn consume(&self) -> Option<VideoFrame> {
        self.lock().take()
    }

    /// Drop any held frame.
    pub fn clear(&self) {
        let previous = self.lock().take();
        drop(previous);
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameData, PixelFormat};
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    fn frame_with(data: Arc<[u8]>) -> VideoFrame {
        VideoFrame {
            data: FrameData::Copied(data),
            width: 4,
            height: 2,
            stride: 4,
            format: PixelFormat::Gray8,
            pts: Duration::ZERO,
        }
    }

    #[test]
    fn consume_drains_the_slot() {
        let store = FrameStore::new();
        store.publish(frame_with(Arc::from(vec![1u8; 8].as_slice())));
        assert!(store.consume().is_some());
        assert!(store.consume().is_none());
    }

    #[test]
    fn publish_releases_the_replaced_frame() {
        let store = FrameStore::new();
        let first: Arc<[u8]> = Arc::from(vec![1u8; 8].as_slice());
        let watcher: Weak<[u8]> = Arc::downgrade(&first);

        store.publish(frame_with(first));
        assert!(watcher.upgrade().is_some());

        store.publish(frame_with(Arc::from(vec![2u8; 8].as_slice())));
        assert!(
            watcher.upgrade().is_none(),
            "replaced frame must be released"
        );
    }

    #[test]
    fn clear_is_safe_when_empty() {
        let store = FrameStore::new();
        store.clear();
        store.clear();
        assert!(store.consume().is_none());
    }

    /// Concurrent publish/consume never tears a frame and never yields a
    /// released one: every consumed buffer is fully filled with its
    /// sequence byte, and every buffer is eventually released.
    #[test]
    fn concurrent_publish_consume() {
        const ROUNDS: u8 = 200;

        let store = Arc::new(FrameStore::new());
        let mut watchers: Vec<Weak<[u8]>> = Vec::with_capacity(ROUNDS as usize);

        let consumer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let mut seen = 0u32;
                let mut last = 0u8;
                while last < ROUNDS {
                    if let Some(frame) = store.consume() {
                        let bytes = frame.data.as_slice();
                        let marker = bytes[0];
                        assert!(bytes.iter().all(|b| *b == marker), "torn frame");
                        assert!(marker >= last, "frames must arrive in publish order");
                        last = marker;
                        seen += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
                seen
            })
        };

        for round in 1..=ROUNDS {
            let data: Arc<[u8]> = Arc::from(vec![round; 64].as_slice());
            watchers.push(Arc::downgrade(&data));
            store.publish(frame_with(data));
        }

        let seen = consumer.join().expect("consumer thread");
        assert!(seen >= 1);

        // nothing left in the slot ⇒ every published buffer was released
        store.clear();
        for watcher in watchers {
            assert!(watcher.upgrade().is_none(), "leaked frame buffer");
        }
    }
}

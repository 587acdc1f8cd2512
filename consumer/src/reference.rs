use board_inspect_common::frame::{Frame, FrameError};
use board_inspect_common::slot::SharedSlot;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Holder for the operator-designated reference image.
///
/// Readers take cheap snapshots; the processing thread parks on
/// `wait_available` while no reference is set.
pub struct ReferenceStore {
    slot: SharedSlot<Frame>,
    gate: Mutex<()>,
    changed: Condvar,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self {
            slot: SharedSlot::empty(),
            gate: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    pub fn current(&self) -> Option<Arc<Frame>> {
        self.slot.snapshot()
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_set()
    }

    pub fn set(&self, frame: Arc<Frame>) {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        info!(
            seq = frame.seq,
            width = frame.width(),
            height = frame.height(),
            "reference set"
        );
        self.slot.publish(frame);
        self.changed.notify_all();
    }

    /// Copy the current live frame into the reference.
    pub fn capture_from(&self, live: &SharedSlot<Frame>) -> Option<Arc<Frame>> {
        match live.snapshot() {
            Some(frame) => {
                self.set(Arc::clone(&frame));
                Some(frame)
            }
            None => {
                warn!("no live frame yet, reference not captured");
                None
            }
        }
    }

    pub fn load(&self, path: &Path) -> Result<Arc<Frame>, FrameError> {
        let frame = Arc::new(Frame::load(path)?);
        self.set(Arc::clone(&frame));
        Ok(frame)
    }

    pub fn clear(&self) {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        if self.slot.clear().is_some() {
            info!("reference cleared");
        }
    }

    /// Wake waiters without changing the reference, e.g. on shutdown.
    pub fn notify_all(&self) {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.changed.notify_all();
    }

    /// Block until a reference is set or `running` turns false.
    ///
    /// The timeout bounds how long a missed shutdown wake-up can delay exit.
    pub fn wait_available(&self, running: &AtomicBool) -> Option<Arc<Frame>> {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(frame) = self.slot.snapshot() {
                return Some(frame);
            }
            if !running.load(Ordering::Relaxed) {
                return None;
            }
            gate = self
                .changed
                .wait_timeout(gate, Duration::from_millis(500))
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

impl Default for ReferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::thread;

    fn frame(shade: u8) -> Arc<Frame> {
        Arc::new(Frame::now(RgbImage::from_pixel(4, 4, image::Rgb([shade; 3]))))
    }

    #[test]
    fn capture_copies_live_frame() {
        let store = ReferenceStore::new();
        let live = SharedSlot::empty();
        assert!(store.capture_from(&live).is_none());
        assert!(!store.is_set());

        live.publish(frame(42));
        store.capture_from(&live).unwrap();
        live.publish(frame(99));
        assert_eq!(store.current().unwrap().image.get_pixel(0, 0)[0], 42);
    }

    #[test]
    fn clear_removes_reference() {
        let store = ReferenceStore::new();
        store.set(frame(1));
        store.clear();
        assert!(store.current().is_none());
    }

    #[test]
    fn waiter_wakes_when_reference_set() {
        let store = Arc::new(ReferenceStore::new());
        let running = Arc::new(AtomicBool::new(true));
        let waiter = {
            let store = Arc::clone(&store);
            let running = Arc::clone(&running);
            thread::spawn(move || store.wait_available(&running))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        store.set(frame(5));
        let got = waiter.join().unwrap().unwrap();
        assert_eq!(got.image.get_pixel(0, 0)[0], 5);
    }

    #[test]
    fn waiter_returns_none_on_shutdown() {
        let store = Arc::new(ReferenceStore::new());
        let running = Arc::new(AtomicBool::new(true));
        let waiter = {
            let store = Arc::clone(&store);
            let running = Arc::clone(&running);
            thread::spawn(move || store.wait_available(&running))
        };
        thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Relaxed);
        store.notify_all();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn load_reads_image_file() {
        let path = std::env::temp_dir().join(format!("ref-{}.png", uuid::Uuid::new_v4()));
        RgbImage::from_pixel(6, 3, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        let store = ReferenceStore::new();
        let loaded = store.load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.dimensions(), (6, 3));
        assert_eq!(loaded.image.get_pixel(5, 2).0, [10, 20, 30]);
        assert!(store.is_set());
    }
}

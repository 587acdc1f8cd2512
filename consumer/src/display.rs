use board_inspect_common::config::DisplayConfig;
use board_inspect_common::frame::Frame;
use board_inspect_common::slot::SharedSlot;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::reference::ReferenceStore;

/// What a display would draw on one tick.
#[derive(Debug, Clone, Default)]
pub struct DisplaySnapshot {
    pub live: Option<Arc<Frame>>,
    /// The reference, or the live frame while none is set.
    pub reference: Option<Arc<Frame>>,
    pub reference_is_live: bool,
    pub processed: Option<Arc<Frame>>,
}

/// The three published images a display reads from.
#[derive(Clone)]
pub struct DisplaySources {
    pub live: Arc<SharedSlot<Frame>>,
    pub reference: Arc<ReferenceStore>,
    pub processed: Arc<SharedSlot<Frame>>,
}

impl DisplaySources {
    pub fn snapshot(&self) -> DisplaySnapshot {
        let live = self.live.snapshot();
        let (reference, reference_is_live) = match self.reference.current() {
            Some(r) => (Some(r), false),
            None => (live.clone(), true),
        };
        DisplaySnapshot {
            live,
            reference,
            reference_is_live,
            processed: self.processed.snapshot(),
        }
    }
}

pub trait DisplaySink {
    fn render(&mut self, snapshot: &DisplaySnapshot);
}

/// Scale to the view size and correct the camera orientation.
pub fn prepare_view(image: &RgbImage, config: &DisplayConfig) -> RgbImage {
    let mut view = if image.dimensions() == (config.width, config.height) {
        image.clone()
    } else {
        imageops::resize(image, config.width, config.height, FilterType::Triangle)
    };
    if config.rotate_180 {
        imageops::rotate180_in_place(&mut view);
    }
    view
}

/// Logs what a window would show whenever one of the images changes.
pub struct LogSink {
    config: DisplayConfig,
    last: (Option<u64>, Option<u64>, Option<u64>),
    rendered: u64,
}

impl LogSink {
    pub fn new(config: DisplayConfig) -> Self {
        Self {
            config,
            last: (None, None, None),
            rendered: 0,
        }
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }
}

impl DisplaySink for LogSink {
    fn render(&mut self, snapshot: &DisplaySnapshot) {
        let seq = |f: &Option<Arc<Frame>>| f.as_ref().map(|f| f.seq);
        let current = (seq(&snapshot.live), seq(&snapshot.reference), seq(&snapshot.processed));
        if current == self.last {
            return;
        }
        self.last = current;
        self.rendered += 1;

        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Some(processed) = &snapshot.processed {
            let view = prepare_view(&processed.image, &self.config);
            debug!(
                seq = processed.seq,
                age_ms = processed.age_ms(now_ms),
                width = view.width(),
                height = view.height(),
                "output view updated"
            );
        }
        debug!(
            live = ?current.0,
            reference = ?current.1,
            reference_is_live = snapshot.reference_is_live,
            "display tick"
        );
    }
}

/// Feed the sink on a fixed tick until shutdown. Runs on the calling thread.
pub fn run_display(sink: &mut dyn DisplaySink, sources: &DisplaySources, tick: Duration, running: &AtomicBool) {
    info!(tick_ms = tick.as_millis() as u64, "display loop started");
    while running.load(Ordering::Relaxed) {
        sink.render(&sources.snapshot());
        thread::sleep(tick);
    }
    info!("display loop ended");
}

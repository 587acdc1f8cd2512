use board_inspect_common::config::{Config, Mode, ProcessingConfig};
use board_inspect_common::frame::Frame;
use board_inspect_common::slot::SharedSlot;
use board_inspect_producer::relay::RelayQueue;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::align::AlignmentEngine;
use crate::modes::{self, Flicker, ModeContext, ModeError};
use crate::normalize;
use crate::reference::ReferenceStore;

/// Processing settings changed at runtime by the operator.
///
/// Reads are relaxed: a change takes effect on some later iteration, not
/// necessarily the next one.
#[derive(Debug)]
pub struct LiveSettings {
    mode: AtomicU8,
    color_normalization: AtomicBool,
    alignment: AtomicBool,
}

impl LiveSettings {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            mode: AtomicU8::new(config.mode.to_u8()),
            color_normalization: AtomicBool::new(config.color_normalization),
            alignment: AtomicBool::new(config.alignment),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.mode.store(mode.to_u8(), Ordering::Relaxed);
    }

    pub fn color_normalization(&self) -> bool {
        self.color_normalization.load(Ordering::Relaxed)
    }

    pub fn set_color_normalization(&self, enabled: bool) {
        self.color_normalization.store(enabled, Ordering::Relaxed);
    }

    pub fn alignment(&self) -> bool {
        self.alignment.load(Ordering::Relaxed)
    }

    pub fn set_alignment(&self, enabled: bool) {
        self.alignment.store(enabled, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProcessingConfig {
        ProcessingConfig {
            mode: self.mode(),
            color_normalization: self.color_normalization(),
            alignment: self.alignment(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{mode} mode failed: {source}")]
    Mode {
        mode: Mode,
        #[source]
        source: ModeError,
    },
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub processed: u64,
    pub failed: u64,
    pub alignment_fallbacks: u64,
    /// Frames taken from the relay while no reference was set.
    pub skipped: u64,
}

/// What one iteration did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Published,
    NoReference,
    Failed,
}

/// Normalizes, aligns and compares each relayed frame against the reference,
/// publishing the latest result.
///
/// Owns the per-thread processing state: the alignment engine with its
/// cached reference features and the flicker phase.
pub struct Pipeline {
    settings: Arc<LiveSettings>,
    reference: Arc<ReferenceStore>,
    processed: Arc<SharedSlot<Frame>>,
    engine: AlignmentEngine,
    modes: ModeContext,
    flicker: Flicker,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        settings: Arc<LiveSettings>,
        reference: Arc<ReferenceStore>,
        processed: Arc<SharedSlot<Frame>>,
    ) -> Self {
        Self::with_modes(config, ModeContext::from_config(config), settings, reference, processed)
    }

    pub fn with_modes(
        config: &Config,
        modes: ModeContext,
        settings: Arc<LiveSettings>,
        reference: Arc<ReferenceStore>,
        processed: Arc<SharedSlot<Frame>>,
    ) -> Self {
        Self {
            settings,
            reference,
            processed,
            engine: AlignmentEngine::new(&config.alignment),
            modes,
            flicker: Flicker::new(Duration::from_millis(config.flicker.delay_ms)),
            stats: PipelineStats::default(),
        }
    }

    /// Run normalization, alignment and the active mode for one frame.
    ///
    /// A failed alignment is logged and the un-aligned frame is used.
    pub fn process(&mut self, reference: &Frame, frame: &Frame) -> Result<RgbImage, ProcessError> {
        let settings = self.settings.snapshot();
        let mut image = if settings.color_normalization {
            normalize::match_colors(&reference.image, &frame.image)
        } else {
            frame.image.clone()
        };

        if settings.alignment {
            match self.engine.align(reference, &image) {
                Ok(aligned) => image = aligned,
                Err(e) => {
                    self.stats.alignment_fallbacks += 1;
                    warn!(seq = frame.seq, error = %e, "alignment failed, using un-aligned frame");
                }
            }
        }

        modes::apply(settings.mode, &self.modes, &mut self.flicker, &reference.image, image)
            .map_err(|source| ProcessError::Mode {
                mode: settings.mode,
                source,
            })
    }

    /// Process one relayed frame and publish the result. Errors are logged
    /// and leave the previous output in place.
    pub fn handle(&mut self, frame: &Frame) -> Outcome {
        let Some(reference) = self.reference.current() else {
            self.processed.clear();
            self.stats.skipped += 1;
            return Outcome::NoReference;
        };

        let started = Instant::now();
        match self.process(&reference, frame) {
            Ok(image) => {
                self.processed
                    .publish(Arc::new(Frame::new(image, frame.captured_at_ms, frame.seq)));
                self.stats.processed += 1;
                debug!(
                    seq = frame.seq,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "frame processed"
                );
                if self.stats.processed % 100 == 0 {
                    info!(
                        processed = self.stats.processed,
                        failed = self.stats.failed,
                        alignment_fallbacks = self.stats.alignment_fallbacks,
                        "pipeline progress"
                    );
                }
                Outcome::Published
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(seq = frame.seq, error = %e, "frame processing failed, keeping previous output");
                Outcome::Failed
            }
        }
    }

    /// Loop until shutdown or until the relay is closed and drained.
    pub fn run(mut self, relay: &RelayQueue<Arc<Frame>>, running: &AtomicBool) -> PipelineStats {
        info!("processing loop started");
        while running.load(Ordering::Relaxed) {
            if !self.reference.is_set() {
                self.processed.clear();
                debug!("waiting for a reference");
                if self.reference.wait_available(running).is_none() {
                    break;
                }
            }
            let Some(frame) = relay.pop() else {
                debug!("relay closed, stopping processing");
                break;
            };
            self.handle(&frame);
        }
        info!(
            processed = self.stats.processed,
            failed = self.stats.failed,
            skipped = self.stats.skipped,
            "processing loop ended"
        );
        self.stats
    }
}

/// Run the processing loop on a dedicated thread.
pub fn spawn_processing(
    pipeline: Pipeline,
    relay: Arc<RelayQueue<Arc<Frame>>>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<PipelineStats>> {
    thread::Builder::new()
        .name("processing".into())
        .spawn(move || pipeline.run(&relay, &running))
}

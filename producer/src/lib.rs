pub mod mjpeg;
pub mod relay;
#[cfg(all(feature = "v4l", target_os = "linux"))]
pub mod v4l2;

use board_inspect_common::config::{CaptureConfig, CaptureSource};
use board_inspect_common::frame::{Frame, FrameError};
use board_inspect_common::slot::SharedSlot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use relay::{Push, RelayQueue};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to open capture device {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("failed to decode frame: {0}")]
    Decode(FrameError),
    #[error("capture device disconnected: {0}")]
    Disconnected(String),
}

impl CaptureError {
    /// Whether the device can no longer produce frames.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CaptureError::Open { .. } | CaptureError::Disconnected(_))
    }
}

/// A pull-based frame source. The acquisition loop calls `read_next` as fast
/// as the device allows.
pub trait CaptureDevice: Send {
    fn read_next(&mut self) -> Result<Frame, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Open the device selected by the capture config.
pub fn open_device(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    match config.source {
        CaptureSource::Mjpeg => Ok(Box::new(mjpeg::MjpegStreamDevice::connect(&config.url)?)),
        CaptureSource::V4l2 => open_v4l2(config),
    }
}

#[cfg(all(feature = "v4l", target_os = "linux"))]
fn open_v4l2(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    let dev = v4l2::V4l2Device::open(config.device_index, config.width, config.height)?;
    Ok(Box::new(dev))
}

#[cfg(not(all(feature = "v4l", target_os = "linux")))]
fn open_v4l2(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    Err(CaptureError::Open {
        device: format!("/dev/video{}", config.device_index),
        reason: "built without the `v4l` feature".into(),
    })
}

/// Why the acquisition loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    Disconnected(String),
    TooManyFailures(u32),
}

#[derive(Debug, Clone)]
pub struct AcquisitionStats {
    pub frames: u64,
    pub read_failures: u64,
    /// Frames discarded from the relay before the consumer took them.
    pub replaced: u64,
    pub stop: StopReason,
}

/// Where captured frames go: the live-view slot and the processing relay.
#[derive(Clone)]
pub struct FrameSinks {
    pub live: Arc<SharedSlot<Frame>>,
    pub relay: Arc<RelayQueue<Arc<Frame>>>,
}

/// Run the acquisition loop on a dedicated thread.
pub fn spawn_acquisition(
    device: Box<dyn CaptureDevice>,
    sinks: FrameSinks,
    running: Arc<AtomicBool>,
    max_consecutive_failures: u32,
) -> std::io::Result<JoinHandle<AcquisitionStats>> {
    thread::Builder::new()
        .name("acquisition".into())
        .spawn(move || run_acquisition(device, &sinks, &running, max_consecutive_failures))
}

/// Read frames until shutdown or until the device is gone.
///
/// Each frame is published as the live frame and offered to the relay with
/// drop-oldest semantics. A failed read is skipped without delay. The relay
/// is closed on exit so the consumer does not wait forever.
pub fn run_acquisition(
    mut device: Box<dyn CaptureDevice>,
    sinks: &FrameSinks,
    running: &AtomicBool,
    max_consecutive_failures: u32,
) -> AcquisitionStats {
    let mut stats = AcquisitionStats {
        frames: 0,
        read_failures: 0,
        replaced: 0,
        stop: StopReason::Shutdown,
    };
    let mut consecutive_failures: u32 = 0;

    info!(device = device.name(), "acquisition loop started");

    while running.load(Ordering::Relaxed) {
        match device.read_next() {
            Ok(frame) => {
                consecutive_failures = 0;
                stats.frames += 1;
                let frame = Arc::new(frame);
                sinks.live.publish(Arc::clone(&frame));
                match sinks.relay.push(frame) {
                    Push::Replaced => stats.replaced += 1,
                    Push::Stored => {}
                    Push::Closed => {
                        debug!("relay closed, stopping acquisition");
                        break;
                    }
                }
                if stats.frames % 100 == 0 {
                    debug!(
                        frames = stats.frames,
                        replaced = stats.replaced,
                        "frames captured"
                    );
                }
            }
            Err(e) if e.is_permanent() => {
                error!(device = device.name(), error = %e, "capture device unavailable");
                stats.stop = StopReason::Disconnected(e.to_string());
                break;
            }
            Err(e) => {
                stats.read_failures += 1;
                consecutive_failures += 1;
                if consecutive_failures >= max_consecutive_failures.max(1) {
                    error!(
                        device = device.name(),
                        consecutive_failures,
                        error = %e,
                        "giving up on capture device"
                    );
                    stats.stop = StopReason::TooManyFailures(consecutive_failures);
                    break;
                }
                if consecutive_failures == 1 || consecutive_failures % 50 == 0 {
                    warn!(error = %e, consecutive_failures, "frame read failed, skipping");
                }
            }
        }
    }

    sinks.relay.close();
    info!(
        frames = stats.frames,
        read_failures = stats.read_failures,
        replaced = stats.replaced,
        stop = ?stats.stop,
        "acquisition loop ended"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::collections::VecDeque;

    /// Replays a fixed script of read outcomes, then reports a disconnect.
    struct ScriptedDevice {
        script: VecDeque<Result<u8, CaptureError>>,
    }

    impl ScriptedDevice {
        fn new(script: Vec<Result<u8, CaptureError>>) -> Box<Self> {
            Box::new(Self {
                script: script.into(),
            })
        }
    }

    impl CaptureDevice for ScriptedDevice {
        fn read_next(&mut self) -> Result<Frame, CaptureError> {
            match self.script.pop_front() {
                Some(Ok(shade)) => Ok(Frame::now(RgbImage::from_pixel(
                    2,
                    2,
                    image::Rgb([shade; 3]),
                ))),
                Some(Err(e)) => Err(e),
                None => Err(CaptureError::Disconnected("script exhausted".into())),
            }
        }
    }

    fn sinks() -> FrameSinks {
        FrameSinks {
            live: Arc::new(SharedSlot::empty()),
            relay: Arc::new(RelayQueue::new()),
        }
    }

    #[test]
    fn publishes_latest_frame_and_keeps_only_newest_in_relay() {
        let sinks = sinks();
        let running = AtomicBool::new(true);
        let dev = ScriptedDevice::new(vec![Ok(1), Ok(2), Ok(3)]);

        let stats = run_acquisition(dev, &sinks, &running, 10);

        assert_eq!(stats.frames, 3);
        assert_eq!(stats.replaced, 2);
        assert!(matches!(stats.stop, StopReason::Disconnected(_)));
        assert_eq!(sinks.live.snapshot().unwrap().image.get_pixel(0, 0)[0], 3);
        let queued = sinks.relay.pop().unwrap();
        assert_eq!(queued.image.get_pixel(0, 0)[0], 3);
        assert!(sinks.relay.pop().is_none(), "relay is closed after the loop ends");
    }

    #[test]
    fn read_failures_are_skipped() {
        let sinks = sinks();
        let running = AtomicBool::new(true);
        let dev = ScriptedDevice::new(vec![
            Err(CaptureError::Read("glitch".into())),
            Ok(7),
            Err(CaptureError::Read("glitch".into())),
        ]);

        let stats = run_acquisition(dev, &sinks, &running, 10);

        assert_eq!(stats.frames, 1);
        assert_eq!(stats.read_failures, 2);
        assert_eq!(sinks.live.snapshot().unwrap().image.get_pixel(0, 0)[0], 7);
    }

    #[test]
    fn persistent_failures_end_the_loop() {
        let sinks = sinks();
        let running = AtomicBool::new(true);
        let script = (0..20)
            .map(|_| Err(CaptureError::Read("EBADF".into())))
            .collect();

        let stats = run_acquisition(ScriptedDevice::new(script), &sinks, &running, 5);

        assert_eq!(stats.stop, StopReason::TooManyFailures(5));
        assert_eq!(stats.read_failures, 5);
        assert!(sinks.relay.is_closed());
    }

    #[test]
    fn stops_when_running_flag_cleared() {
        let sinks = sinks();
        let running = AtomicBool::new(false);
        let stats = run_acquisition(ScriptedDevice::new(vec![Ok(1)]), &sinks, &running, 5);
        assert_eq!(stats.frames, 0);
        assert_eq!(stats.stop, StopReason::Shutdown);
    }

    #[test]
    fn spawned_thread_returns_stats() {
        let sinks = sinks();
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_acquisition(
            ScriptedDevice::new(vec![Ok(1), Ok(2)]),
            sinks.clone(),
            running,
            5,
        )
        .unwrap();
        let stats = handle.join().unwrap();
        assert_eq!(stats.frames, 2);
    }

    #[test]
    fn v4l2_without_feature_or_missing_device_fails_to_open() {
        let config = CaptureConfig {
            source: CaptureSource::V4l2,
            device_index: 250,
            ..CaptureConfig::default()
        };
        let err = open_device(&config).err().unwrap();
        assert!(matches!(err, CaptureError::Open { .. }));
    }
}

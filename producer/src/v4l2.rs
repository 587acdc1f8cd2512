use board_inspect_common::frame::Frame;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::{CaptureDevice, CaptureError};

/// errno for a device that was unplugged mid-stream.
const ENODEV: i32 = 19;

/// `/dev/video{index}` captured as MJPG through memory-mapped buffers.
pub struct V4l2Device {
    name: String,
    stream: MmapStream<'static>,
    _device: Device,
}

impl V4l2Device {
    pub fn open(index: u32, width: u32, height: u32) -> Result<Self, CaptureError> {
        let name = format!("/dev/video{index}");
        let open_err = |reason: String| CaptureError::Open {
            device: name.clone(),
            reason,
        };

        let dev = Device::new(index as usize).map_err(|e| open_err(e.to_string()))?;

        let mjpg = FourCC::new(b"MJPG");
        let mut format = dev.format().map_err(|e| open_err(e.to_string()))?;
        format.width = width;
        format.height = height;
        format.fourcc = mjpg;

        match dev.set_format(&format) {
            Ok(f) => {
                info!(device = name, width = f.width, height = f.height, fourcc = ?f.fourcc, "set V4L2 format");
                if f.fourcc != mjpg {
                    return Err(open_err(format!("device refused MJPG, offered {}", f.fourcc)));
                }
                if f.width != width || f.height != height {
                    warn!(
                        requested_width = width,
                        requested_height = height,
                        width = f.width,
                        height = f.height,
                        "device adjusted the requested resolution"
                    );
                }
            }
            Err(e) => return Err(open_err(e.to_string())),
        }

        let stream = MmapStream::with_buffers(&dev, Type::VideoCapture, 4)
            .map_err(|e| open_err(e.to_string()))?;

        Ok(Self {
            name,
            stream,
            _device: dev,
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn read_next(&mut self) -> Result<Frame, CaptureError> {
        let (buf, meta) = self.stream.next().map_err(|e| {
            if e.raw_os_error() == Some(ENODEV) {
                CaptureError::Disconnected(e.to_string())
            } else {
                CaptureError::Read(e.to_string())
            }
        })?;
        let used = (meta.bytesused as usize).min(buf.len());
        Frame::decode_jpeg(&buf[..used]).map_err(CaptureError::Decode)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

use board_inspect_common::frame::Frame;
use bytes::BytesMut;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};

use crate::{CaptureDevice, CaptureError};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 64 * 1024;

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Camera exposed as an MJPEG multipart stream (`multipart/x-mixed-replace`).
pub struct MjpegStreamDevice {
    name: String,
    reader: Box<dyn Read + Send>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MjpegStreamDevice {
    /// Connect to the stream URL. A non-success status is an open failure.
    pub fn connect(url: &str) -> Result<Self, CaptureError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| CaptureError::Open {
                device: url.to_string(),
                reason: e.to_string(),
            })?;
        let response = client.get(url).send().map_err(|e| CaptureError::Open {
            device: url.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(CaptureError::Open {
                device: url.to_string(),
                reason: format!("HTTP status {}", response.status().as_u16()),
            });
        }

        info!(url, status = %response.status(), "connected to MJPEG stream");
        Ok(Self::from_reader(url, response))
    }

    /// Parse frames from any byte source carrying the multipart body.
    pub fn from_reader(name: &str, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.to_string(),
            reader: Box::new(reader),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Advance the parser over buffered bytes; yields one JPEG part if complete.
    fn next_part(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans reads
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        return None;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        return None;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg_data = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    self.state = ParseState::SeekingHeaderEnd;
                    if !jpeg_data.is_empty() {
                        return Some(jpeg_data);
                    }
                }
            }
        }
    }
}

impl CaptureDevice for MjpegStreamDevice {
    fn read_next(&mut self) -> Result<Frame, CaptureError> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(jpeg) = self.next_part() {
                debug!(bytes = jpeg.len(), "MJPEG part received");
                return Frame::decode_jpeg(&jpeg).map_err(CaptureError::Decode);
            }
            let n = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CaptureError::Disconnected(e.to_string()))?;
            if n == 0 {
                return Err(CaptureError::Disconnected("stream ended".into()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

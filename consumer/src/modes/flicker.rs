use image::RgbImage;
use std::thread;
use std::time::Duration;

/// Alternates between reference and frame, pausing before each switch so
/// the blink is visible.
#[derive(Debug)]
pub struct Flicker {
    delay: Duration,
    show_reference: bool,
}

impl Flicker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            show_reference: true,
        }
    }

    /// Sleep, flip, and return the image for the new phase.
    pub fn next(&mut self, reference: &RgbImage, frame: RgbImage) -> RgbImage {
        thread::sleep(self.delay);
        self.show_reference = !self.show_reference;
        if self.show_reference {
            reference.clone()
        } else {
            frame
        }
    }
}

pub mod difference;
pub mod flicker;
pub mod overlay;
pub mod segmentation;
pub mod ssim;

use board_inspect_common::config::{Config, DifferenceConfig, Mode};
use image::RgbImage;

pub use flicker::Flicker;
use segmentation::{SegmentationError, Segmenter};

#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("image sizes differ: reference {reference:?}, frame {frame:?}")]
    DimensionMismatch {
        reference: (u32, u32),
        frame: (u32, u32),
    },
    #[error("similarity failed: {0}")]
    Similarity(String),
    #[error("segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),
}

pub(crate) fn ensure_same_size(reference: &RgbImage, frame: &RgbImage) -> Result<(), ModeError> {
    if reference.dimensions() != frame.dimensions() {
        return Err(ModeError::DimensionMismatch {
            reference: reference.dimensions(),
            frame: frame.dimensions(),
        });
    }
    Ok(())
}

/// Fixed parameters the stateless modes need.
pub struct ModeContext {
    pub difference: DifferenceConfig,
    pub resize_factor: f32,
    pub segmenter: Option<Box<dyn Segmenter>>,
}

impl ModeContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            difference: config.difference.clone(),
            resize_factor: config.segmentation.resize_factor,
            segmenter: segmentation::from_config(&config.segmentation),
        }
    }
}

/// Produce the visualization for `mode`. `Mode::None` returns the frame as is.
///
/// Every mode is a function of `(reference, frame)`; only flicker keeps
/// state between calls, and that state lives with the caller.
pub fn apply(
    mode: Mode,
    ctx: &ModeContext,
    flicker: &mut Flicker,
    reference: &RgbImage,
    frame: RgbImage,
) -> Result<RgbImage, ModeError> {
    match mode {
        Mode::None => Ok(frame),
        Mode::Overlay => overlay::overlay(reference, &frame),
        Mode::Difference => difference::highlight(reference, frame, &ctx.difference),
        Mode::Ssim => ssim::ssim_map(reference, &frame),
        Mode::Flicker => Ok(flicker.next(reference, frame)),
        Mode::ExternalSegmentation => {
            let segmenter = ctx
                .segmenter
                .as_deref()
                .ok_or(SegmentationError::NotConfigured)?;
            Ok(segmenter.segment(&frame, reference, ctx.resize_factor)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Duration;

    fn ctx() -> ModeContext {
        ModeContext {
            difference: DifferenceConfig::default(),
            resize_factor: 0.5,
            segmenter: None,
        }
    }

    #[test]
    fn none_is_identity() {
        let reference = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let frame = RgbImage::from_pixel(4, 4, Rgb([9, 8, 7]));
        let mut flicker = Flicker::new(Duration::ZERO);
        let out = apply(Mode::None, &ctx(), &mut flicker, &reference, frame.clone()).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn every_mode_dispatches() {
        let reference = RgbImage::from_pixel(16, 16, Rgb([100, 100, 100]));
        let frame = RgbImage::from_pixel(16, 16, Rgb([120, 100, 100]));
        let mut flicker = Flicker::new(Duration::ZERO);
        for mode in Mode::ALL {
            let result = apply(mode, &ctx(), &mut flicker, &reference, frame.clone());
            match mode {
                Mode::ExternalSegmentation => assert!(matches!(
                    result,
                    Err(ModeError::Segmentation(SegmentationError::NotConfigured))
                )),
                _ => assert_eq!(result.unwrap().dimensions(), (16, 16), "{mode}"),
            }
        }
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let reference = RgbImage::new(8, 8);
        let frame = RgbImage::new(8, 6);
        let mut flicker = Flicker::new(Duration::ZERO);
        let err = apply(Mode::Overlay, &ctx(), &mut flicker, &reference, frame).unwrap_err();
        assert!(matches!(err, ModeError::DimensionMismatch { .. }));
    }
}

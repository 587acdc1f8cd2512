use board_inspect_common::config::SegmentationConfig;
use board_inspect_common::frame::{Frame, FrameError};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, warn};

#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    #[error("no segmentation command configured")]
    NotConfigured,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("segmentation exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("failed to write input image: {0}")]
    Io(#[from] image::ImageError),
    #[error("failed to read segmentation output: {0}")]
    Frame(#[from] FrameError),
}

/// Black-box `(frame, reference, scale) -> visualization` collaborator.
pub trait Segmenter: Send {
    fn segment(&self, frame: &RgbImage, reference: &RgbImage, scale: f32) -> Result<RgbImage, SegmentationError>;
}

pub fn from_config(config: &SegmentationConfig) -> Option<Box<dyn Segmenter>> {
    let program = config.command.as_ref()?;
    Some(Box::new(CommandSegmenter::new(program.clone(), config.args.clone())))
}

/// Runs a program per call, exchanging images through PNG files in the temp
/// directory. `{frame}`, `{reference}`, `{output}` and `{scale}` in the
/// arguments are replaced per call; the program must write `{output}`.
#[derive(Debug, Clone)]
pub struct CommandSegmenter {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

/// Temp files removed on drop.
struct Scratch(Vec<PathBuf>);

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in &self.0 {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to delete segmentation temp file");
                }
            }
        }
    }
}

impl CommandSegmenter {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            work_dir: std::env::temp_dir(),
        }
    }

    fn expand(&self, frame: &Path, reference: &Path, output: &Path, scale: f32) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{frame}", &frame.display().to_string())
                    .replace("{reference}", &reference.display().to_string())
                    .replace("{output}", &output.display().to_string())
                    .replace("{scale}", &scale.to_string())
            })
            .collect()
    }
}

impl Segmenter for CommandSegmenter {
    fn segment(&self, frame: &RgbImage, reference: &RgbImage, scale: f32) -> Result<RgbImage, SegmentationError> {
        let id = uuid::Uuid::new_v4();
        let frame_path = self.work_dir.join(format!("segment_{id}_frame.png"));
        let reference_path = self.work_dir.join(format!("segment_{id}_reference.png"));
        let output_path = self.work_dir.join(format!("segment_{id}_output.png"));
        let _scratch = Scratch(vec![frame_path.clone(), reference_path.clone(), output_path.clone()]);

        frame.save(&frame_path)?;
        reference.save(&reference_path)?;

        let args = self.expand(&frame_path, &reference_path, &output_path, scale);
        debug!(program = %self.program, ?args, "running segmentation");
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| SegmentationError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(status = %output.status, stderr = %stderr, "segmentation exited with error");
            return Err(SegmentationError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(Frame::load(&output_path)?.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn placeholders_are_substituted() {
        let seg = CommandSegmenter::new("seg".into(), args(&["--in={frame}", "{reference}", "-o", "{output}", "{scale}"]));
        let expanded = seg.expand(Path::new("/a.png"), Path::new("/b.png"), Path::new("/c.png"), 0.5);
        assert_eq!(expanded, args(&["--in=/a.png", "/b.png", "-o", "/c.png", "0.5"]));
    }

    #[test]
    fn unconfigured_has_no_segmenter() {
        assert!(from_config(&SegmentationConfig::default()).is_none());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let seg = CommandSegmenter::new("definitely-not-a-real-segmenter".into(), Vec::new());
        let img = RgbImage::new(4, 4);
        assert!(matches!(seg.segment(&img, &img, 1.0), Err(SegmentationError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn output_file_is_returned() {
        let seg = CommandSegmenter::new("cp".into(), args(&["{reference}", "{output}"]));
        let frame = RgbImage::from_pixel(6, 4, Rgb([1, 2, 3]));
        let reference = RgbImage::from_pixel(6, 4, Rgb([200, 100, 50]));
        let out = seg.segment(&frame, &reference, 0.5).unwrap();
        assert_eq!(out, reference);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported() {
        let seg = CommandSegmenter::new("false".into(), Vec::new());
        let img = RgbImage::new(4, 4);
        assert!(matches!(seg.segment(&img, &img, 1.0), Err(SegmentationError::Failed { .. })));
    }
}

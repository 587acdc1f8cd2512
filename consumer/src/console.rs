use board_inspect_common::config::Mode;
use board_inspect_common::frame::Frame;
use board_inspect_common::slot::SharedSlot;
use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::pipeline::LiveSettings;
use crate::reference::ReferenceStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Mode(Mode),
    Normalize(bool),
    Align(bool),
    Capture,
    Load(PathBuf),
    Clear,
    Status,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` expects {expected}")]
    BadArgument {
        command: &'static str,
        expected: &'static str,
    },
}

fn parse_switch(command: &'static str, arg: Option<&str>) -> Result<bool, ParseCommandError> {
    match arg.map(str::to_ascii_lowercase).as_deref() {
        Some("on" | "true" | "1") => Ok(true),
        Some("off" | "false" | "0") => Ok(false),
        _ => Err(ParseCommandError::BadArgument {
            command,
            expected: "on|off",
        }),
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, Some(r.trim()).filter(|r| !r.is_empty())),
            None => (line, None),
        };
        match word.to_ascii_lowercase().as_str() {
            "" => Err(ParseCommandError::Empty),
            "mode" => rest
                .and_then(|m| m.parse().ok())
                .map(Command::Mode)
                .ok_or(ParseCommandError::BadArgument {
                    command: "mode",
                    expected: "none|overlay|difference|ssim|flicker|segmentation",
                }),
            "normalize" => parse_switch("normalize", rest).map(Command::Normalize),
            "align" => parse_switch("align", rest).map(Command::Align),
            "capture" => Ok(Command::Capture),
            "load" => rest
                .map(|p| Command::Load(PathBuf::from(p)))
                .ok_or(ParseCommandError::BadArgument {
                    command: "load",
                    expected: "a file path",
                }),
            "clear" => Ok(Command::Clear),
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

/// Everything a command can touch.
#[derive(Clone)]
pub struct Controls {
    pub settings: Arc<LiveSettings>,
    pub reference: Arc<ReferenceStore>,
    pub live: Arc<SharedSlot<Frame>>,
    pub processed: Arc<SharedSlot<Frame>>,
    pub running: Arc<AtomicBool>,
}

impl Controls {
    /// Apply a command; returns false once the application should stop.
    pub fn apply(&self, command: Command) -> bool {
        match command {
            Command::Mode(mode) => {
                self.settings.set_mode(mode);
                info!(%mode, "mode changed");
            }
            Command::Normalize(on) => {
                self.settings.set_color_normalization(on);
                info!(enabled = on, "color normalization toggled");
            }
            Command::Align(on) => {
                self.settings.set_alignment(on);
                info!(enabled = on, "alignment toggled");
            }
            Command::Capture => {
                self.reference.capture_from(&self.live);
            }
            Command::Load(path) => {
                if let Err(e) = self.reference.load(&path) {
                    warn!(path = %path.display(), error = %e, "failed to load reference");
                }
            }
            Command::Clear => {
                self.reference.clear();
                self.processed.clear();
            }
            Command::Status => {
                let s = self.settings.snapshot();
                info!(
                    mode = %s.mode,
                    color_normalization = s.color_normalization,
                    alignment = s.alignment,
                    reference = ?self.reference.current().map(|r| r.seq),
                    live = ?self.live.snapshot().map(|f| f.seq),
                    processed = ?self.processed.snapshot().map(|f| f.seq),
                    "status"
                );
            }
            Command::Quit => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("shutdown requested");
        }
        self.reference.notify_all();
    }

    /// Read commands until `quit`, end of input or shutdown.
    pub fn read_commands(&self, input: impl BufRead) {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to read console input");
                    break;
                }
            };
            if !self.running.load(Ordering::Relaxed) {
                return;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if !self.apply(command) {
                        return;
                    }
                }
                Err(ParseCommandError::Empty) => {}
                Err(e) => warn!(error = %e, "ignoring console input"),
            }
        }
        self.shutdown();
    }
}

/// Read stdin on a background thread.
pub fn spawn_console(controls: Controls) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".into())
        .spawn(move || controls.read_commands(std::io::stdin().lock()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use board_inspect_common::config::ProcessingConfig;
    use image::RgbImage;
    use std::io::Cursor;

    fn controls() -> Controls {
        Controls {
            settings: Arc::new(LiveSettings::new(&ProcessingConfig::default())),
            reference: Arc::new(ReferenceStore::new()),
            live: Arc::new(SharedSlot::empty()),
            processed: Arc::new(SharedSlot::empty()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!("mode ssim".parse::<Command>(), Ok(Command::Mode(Mode::Ssim)));
        assert_eq!("  MODE   difference ".parse::<Command>(), Ok(Command::Mode(Mode::Difference)));
        assert_eq!("normalize on".parse::<Command>(), Ok(Command::Normalize(true)));
        assert_eq!("align off".parse::<Command>(), Ok(Command::Align(false)));
        assert_eq!("load /tmp/board ref.png".parse::<Command>(), Ok(Command::Load(PathBuf::from("/tmp/board ref.png"))));
        assert_eq!("capture".parse::<Command>(), Ok(Command::Capture));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<Command>(), Err(ParseCommandError::Empty));
        assert!(matches!("zoom 2".parse::<Command>(), Err(ParseCommandError::Unknown(w)) if w == "zoom"));
        assert!(matches!("mode sepia".parse::<Command>(), Err(ParseCommandError::BadArgument { .. })));
        assert!(matches!("align maybe".parse::<Command>(), Err(ParseCommandError::BadArgument { .. })));
        assert!(matches!("load".parse::<Command>(), Err(ParseCommandError::BadArgument { .. })));
    }

    #[test]
    fn script_drives_state() {
        let c = controls();
        c.live.publish(Arc::new(Frame::new(RgbImage::new(2, 2), 0, 9)));
        c.read_commands(Cursor::new("mode overlay\nnormalize on\nbogus\ncapture\nstatus\n"));

        assert_eq!(c.settings.mode(), Mode::Overlay);
        assert!(c.settings.color_normalization());
        assert_eq!(c.reference.current().unwrap().seq, 9);
        // End of input shuts down.
        assert!(!c.running.load(Ordering::SeqCst));
    }

    #[test]
    fn clear_drops_reference_and_output() {
        let c = controls();
        c.reference.set(Arc::new(Frame::new(RgbImage::new(2, 2), 0, 1)));
        c.processed.publish(Arc::new(Frame::new(RgbImage::new(2, 2), 0, 2)));
        assert!(c.apply(Command::Clear));
        assert!(!c.reference.is_set());
        assert!(!c.processed.is_set());
    }

    #[test]
    fn quit_stops_reading() {
        let c = controls();
        c.read_commands(Cursor::new("quit\nmode ssim\n"));
        assert!(!c.running.load(Ordering::SeqCst));
        assert_eq!(c.settings.mode(), Mode::None);
    }
}

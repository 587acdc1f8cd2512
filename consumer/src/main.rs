mod align;
mod console;
mod display;
mod modes;
mod normalize;
mod pipeline;
mod reference;

use board_inspect_common::config::Config;
use board_inspect_common::frame::Frame;
use board_inspect_common::slot::SharedSlot;
use board_inspect_producer::relay::RelayQueue;
use board_inspect_producer::FrameSinks;
use console::Controls;
use display::{DisplaySources, LogSink};
use pipeline::{LiveSettings, Pipeline};
use reference::ReferenceStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = ?config.capture.source,
        device_index = config.capture.device_index,
        url = config.capture.url,
        width = config.capture.width,
        height = config.capture.height,
        mode = %config.processing.mode,
        color_normalization = config.processing.color_normalization,
        alignment = config.processing.alignment,
        match_limit = ?config.alignment.match_limit,
        segmentation = config.segmentation.command.is_some(),
        "starting board-inspect"
    );

    let device = match board_inspect_producer::open_device(&config.capture) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to open capture device");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let live: Arc<SharedSlot<Frame>> = Arc::new(SharedSlot::empty());
    let processed: Arc<SharedSlot<Frame>> = Arc::new(SharedSlot::empty());
    let relay = Arc::new(RelayQueue::new());
    let reference = Arc::new(ReferenceStore::new());
    let settings = Arc::new(LiveSettings::new(&config.processing));

    let acquisition = match board_inspect_producer::spawn_acquisition(
        device,
        FrameSinks {
            live: Arc::clone(&live),
            relay: Arc::clone(&relay),
        },
        Arc::clone(&running),
        config.capture.max_consecutive_failures,
    ) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "failed to start acquisition thread");
            std::process::exit(1);
        }
    };

    let pipeline = Pipeline::new(
        &config,
        Arc::clone(&settings),
        Arc::clone(&reference),
        Arc::clone(&processed),
    );
    let processing = match pipeline::spawn_processing(pipeline, Arc::clone(&relay), Arc::clone(&running)) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "failed to start processing thread");
            std::process::exit(1);
        }
    };

    let controls = Controls {
        settings,
        reference: Arc::clone(&reference),
        live: Arc::clone(&live),
        processed: Arc::clone(&processed),
        running: Arc::clone(&running),
    };
    if let Err(e) = console::spawn_console(controls) {
        warn!(error = %e, "console unavailable, running until interrupted");
    }

    let sources = DisplaySources {
        live,
        reference: Arc::clone(&reference),
        processed,
    };
    let mut sink = LogSink::new(config.display.clone());
    display::run_display(
        &mut sink,
        &sources,
        Duration::from_millis(config.display.tick_ms.max(1)),
        &running,
    );

    // Wake anything still parked so the loops can observe shutdown.
    running.store(false, Ordering::SeqCst);
    reference.notify_all();
    relay.close();

    match processing.join() {
        Ok(stats) => info!(
            processed = stats.processed,
            failed = stats.failed,
            alignment_fallbacks = stats.alignment_fallbacks,
            "processing stopped"
        ),
        Err(_) => error!("processing thread panicked"),
    }
    // A blocked device read may hold the acquisition thread; it ends with the process.
    if acquisition.is_finished() {
        if let Ok(stats) = acquisition.join() {
            info!(frames = stats.frames, stop = ?stats.stop, "acquisition stopped");
        }
    }
    info!(rendered = sink.rendered(), "board-inspect stopped");
}

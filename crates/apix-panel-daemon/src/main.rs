//! APIX Panel Daemon
//!
//! Composites the configured background and pushes frames to the panel.
//! The panel holds no image of its own, so the pump keeps running even when
//! uploads fail; the device picks the stream back up as soon as it answers.

mod background;
mod config;
mod sensors;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use apix_panel_hw::{LcdDevice, LCD_PID, LCD_VID};
use background::{BackgroundManager, PlayMode};
use config::Config;
use sensors::SystemInfoPoller;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", path);
            config
        }
        None => Config::default(),
    };

    let mode = match config.background.mode.parse::<PlayMode>() {
        Ok(mode) => mode,
        Err(e) => {
            warn!("{e}, falling back to loop playback");
            PlayMode::default()
        }
    };

    // Start the metrics poller
    let mut poller = SystemInfoPoller::new(config.metrics.fast, config.metrics.slow);
    poller.start();
    info!("Available metrics: {:?}", poller.get_available_metrics());

    // Open the panel; run headless when it is absent
    let device = match LcdDevice::open(LCD_VID, LCD_PID) {
        Ok(mut device) => {
            // best effort: the panel shows its boot animation either way
            if let Err(e) = device.handshake() {
                warn!("Startup handshake failed: {e}. Waiting out the boot animation.");
            }
            Some(device)
        }
        Err(e) => {
            warn!("LCD device not found: {e}. Running in headless mode.");
            None
        }
    };

    // Frame pump runs on a blocking thread; USB transfers can stall for
    // up to two seconds each
    let run = Arc::new(AtomicBool::new(true));
    let pump_run = run.clone();
    let pump_config = config.clone();
    let pump = tokio::task::spawn_blocking(move || {
        frame_pump(pump_config, mode, device, pump_run);
    });

    // Setup Unix signal handlers
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
    }

    run.store(false, Ordering::SeqCst);
    let _ = pump.await;
    poller.stop();

    Ok(())
}

fn frame_pump(config: Config, mode: PlayMode, mut device: Option<LcdDevice>, run: Arc<AtomicBool>) {
    let mut manager = BackgroundManager::new(mode, config.background.fps);
    let interval = Duration::from_millis(config.display.refresh);
    let mut consecutive_errors: u32 = 0;
    let mut last_error_log = Instant::now();

    while run.load(Ordering::SeqCst) {
        let frame =
            manager.get_background_bytes(&config.background.video, &config.background.image);

        if let Some(device) = device.as_mut() {
            match device.upload_frame(&frame) {
                Ok(()) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    // Only log errors once per minute or on first error
                    let elapsed = last_error_log.elapsed();
                    if consecutive_errors == 1 || elapsed >= Duration::from_secs(60) {
                        if consecutive_errors > 1 {
                            warn!(
                                "Upload error (repeated {} times in {:?}): {}",
                                consecutive_errors, elapsed, e
                            );
                        } else {
                            warn!("Upload error: {}", e);
                        }
                        last_error_log = Instant::now();
                        consecutive_errors = 0;
                    }
                    // the ready probe resets the transport if the device wedged
                    let _ = device.device_ready();
                }
            }
        }

        std::thread::sleep(interval);
    }

    manager.stop();
}

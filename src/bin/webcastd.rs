//! webcastd - stream a local camera to browsers on the LAN or a hosted network
//!
//! Loads `WEBCAST_CONFIG` (plus `WEBCAST_*` overrides), starts one session,
//! prints what a viewer needs to connect and serves until Ctrl-C.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use webcam_cast::{
    config::WebcastConfig, list_cameras, NetworkMode, SessionController, StartOutcome,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream a webcam as MJPEG to phones and browsers")]
struct Args {
    /// Network path: `lan` or `hotspot`.
    #[arg(long, env = "WEBCAST_MODE")]
    mode: Option<NetworkMode>,

    /// Camera index to capture from.
    #[arg(long, env = "WEBCAST_CAMERA")]
    camera: Option<u32>,

    /// Target capture rate.
    #[arg(long, env = "WEBCAST_FPS")]
    fps: Option<f64>,

    /// TCP port for the stream server (0 picks a free port).
    #[arg(long, env = "WEBCAST_PORT")]
    port: Option<u16>,

    /// Print the cameras this host exposes and exit.
    #[arg(long)]
    list_cameras: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_cameras {
        for camera in list_cameras() {
            println!("{}: {}", camera.index, camera.name);
        }
        return Ok(());
    }

    let mut config = WebcastConfig::load()?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(camera) = args.camera {
        config.camera = camera;
    }
    if let Some(fps) = args.fps {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(anyhow!("--fps must be greater than zero"));
        }
        config.fps = fps;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let controller = SessionController::new(
        config.session_settings(),
        config.provisioner(),
        Arc::new(config.backend),
    )
    .with_observer(|state| log::debug!("session state: {}", state));

    if config.mode == NetworkMode::Hotspot && !controller.hotspot_supported() {
        log::warn!("this host does not report hosted-network support; start will likely fail");
    }

    let payload = match controller.start(config.mode, config.camera)? {
        StartOutcome::Started(payload) => payload,
        StartOutcome::Rejected(state) => {
            return Err(anyhow!("session could not start while {}", state));
        }
    };
    println!("{}", payload.instructions());
    println!();
    println!("QR payload: {}", payload.scan);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("webcastd running, waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(STATS_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(stats) = controller.capture_stats() {
                    log::info!(
                        "frames captured={} dropped={} viewers={}",
                        stats.frames_captured,
                        stats.frames_dropped,
                        controller.viewer_count()
                    );
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping session...");
    controller.stop();
    Ok(())
}

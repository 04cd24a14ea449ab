//! Record camera frames with Alt tracker poses.
//!
//! Usage: altcap
//! Answers the startup prompts (or reads `ALTCAP_*` variables, see
//! `altcap::config`), then captures until Ctrl+C or Enter.

use altcap::config::BusBackend;
use altcap::console::ConsoleViewer;
use altcap::gateway::StorageGateway;
use altcap::sim::{SimBus, SimCamera, SimStorage, SimTracking};
use altcap::usb::UsbBus;
use altcap::{
    default_device_types, AcquisitionLoop, AltcapError, BusGateway, CaptureSink,
    DeviceSessionManager, FrameGateway, LogStreams, Placement, RunConfig, ShutdownWatcher,
    SystemClock, TrackingGateway,
};
use std::sync::Arc;
use std::time::Duration;

const CAMERA_WIDTH: u32 = 640;
const CAMERA_HEIGHT: u32 = 480;
const CAMERA_FRAME_INTERVAL: Duration = Duration::from_millis(33);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        match RunConfig::from_env(&mut input, &mut output) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Invalid configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    let shutdown = match ShutdownWatcher::install() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ERROR: Could not set control handler: {}", e);
            std::process::exit(1);
        }
    };

    let tracking = if config.track_enabled {
        match open_tracking(&config) {
            Ok(t) => Some(t),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let mut camera = SimCamera::new(CAMERA_WIDTH, CAMERA_HEIGHT)
        .with_frame_interval(CAMERA_FRAME_INTERVAL);
    if let Err(e) = camera.open(config.camera_index) {
        eprintln!("Failed to open camera {}: {}", config.camera_index, e);
        std::process::exit(1);
    }
    if let Err(e) = camera.disable_autofocus() {
        log::warn!("Could not disable autofocus: {}", e);
    }

    let sink = match CaptureSink::open(
        config.paths.clone(),
        LogStreams::for_run(config.track_enabled),
        config.decimation,
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open capture outputs: {}", e);
            camera.release();
            std::process::exit(1);
        }
    };

    let viewer = match ConsoleViewer::spawn() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Failed to watch console input: {}", e);
            camera.release();
            std::process::exit(1);
        }
    };

    println!("Capturing (Enter or Ctrl+C to stop)...");

    let mut acquisition = AcquisitionLoop::new(
        Box::new(camera),
        Box::new(viewer),
        sink,
        Box::new(SystemClock),
        shutdown,
    )
    .with_max_ticks(config.max_ticks);
    if let Some((manager, placement)) = tracking {
        acquisition = acquisition.with_tracking(manager, placement);
    }

    match acquisition.run() {
        Ok(summary) => {
            println!(
                "\nTotal: {} frames ({} keyframes, {} dropped), {} pose records",
                summary.frames_written,
                summary.keyframes_written,
                summary.dropped_frames,
                summary.pose_records
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Bring up storage, bus, and tracking, and load the environment and placement.
fn open_tracking(config: &RunConfig) -> altcap::Result<(DeviceSessionManager, Placement)> {
    let storage = SimStorage::with_defaults();

    let bus: Box<dyn BusGateway> = match config.bus {
        BusBackend::Usb => Box::new(UsbBus::new(default_device_types())?),
        BusBackend::Sim => Box::new(SimBus::with_idle_nodes(1)),
    };
    log::info!("Device bus version: {}", bus.version());

    let tracking = SimTracking::new();

    let environment_code = storage
        .read("environment", &config.environment_key)
        .map_err(|e| AltcapError::CapabilityUnavailable("storage client", e.to_string()))?;
    let placement_code = storage
        .read("placement", &config.placement_key)
        .map_err(|e| AltcapError::CapabilityUnavailable("storage client", e.to_string()))?;

    let environment = tracking
        .load_environment(&environment_code)
        .map_err(|e| AltcapError::CapabilityUnavailable("tracking", e.to_string()))?;
    let placement = tracking
        .load_placement(&placement_code)
        .map_err(|e| AltcapError::CapabilityUnavailable("tracking", e.to_string()))?;

    let markers = environment.markers();
    log::info!("Environment markers count: {}", markers.len());
    for (i, m) in markers.iter().enumerate() {
        log::info!("Marker {}: {{{}, {}, {}}}", i, m.x, m.y, m.z);
    }

    let manager = DeviceSessionManager::new(bus, Box::new(tracking), Arc::new(environment));
    Ok((manager, placement))
}

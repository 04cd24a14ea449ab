//! # altcap - synchronized camera + Alt tracker acquisition logger
//!
//! Captures camera frames and tracker poses on one timeline and writes them
//! to disk for offline analysis. Provides:
//! - A device session manager that attaches to the first idle tracking node
//!   and re-scans only when the bus topology changes
//! - A single-threaded acquisition loop pairing each frame with the pose
//!   queried in the same tick, keyed by the frame's millisecond timestamp
//! - A capture sink writing full-rate and decimated JPEG archives plus
//!   semicolon-delimited pose logs
//!
//! Device bus, tracking, camera, and storage libraries plug in through the
//! traits in [`gateway`].
//!
//! ## Quick Start
//! ```no_run
//! use altcap::sim::{ScriptedViewer, SimCamera};
//! use altcap::{AcquisitionLoop, CaptureSink, FrameGateway, LogStreams, ShutdownWatcher, SinkPaths, SystemClock};
//!
//! let mut camera = SimCamera::new(640, 480);
//! camera.open(0).unwrap();
//! let sink = CaptureSink::open(SinkPaths::under("capture"), LogStreams::TIMESTAMPS, 10).unwrap();
//! let summary = AcquisitionLoop::new(
//!     Box::new(camera),
//!     Box::new(ScriptedViewer::quit_after(100)),
//!     sink,
//!     Box::new(SystemClock),
//!     ShutdownWatcher::new(),
//! )
//! .run()
//! .unwrap();
//! println!("{} frames written", summary.frames_written);
//! ```

pub mod error;
pub mod types;
pub mod gateway;
pub mod sampler;
pub mod session;
pub mod sink;
pub mod acquisition;
pub mod config;
pub mod signal;
pub mod console;
pub mod usb;
pub mod sim;

pub use error::AltcapError;
pub use types::*;
pub use gateway::{
    BusGateway, Clock, FrameGateway, StorageGateway, SystemClock, TrackingGateway,
    TrackingSession, Viewer,
};
pub use sampler::PoseSampler;
pub use session::{DeviceSessionManager, SessionState};
pub use sink::{CaptureSink, SinkPaths};
pub use acquisition::{AcquisitionLoop, RunSummary, TickOutcome};
pub use config::RunConfig;
pub use signal::ShutdownWatcher;

/// Result type alias for altcap operations.
pub type Result<T> = std::result::Result<T, AltcapError>;

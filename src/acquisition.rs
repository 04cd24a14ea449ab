use crate::gateway::{Clock, FrameGateway, Viewer};
use crate::session::DeviceSessionManager;
use crate::signal::ShutdownWatcher;
use crate::sink::CaptureSink;
use crate::types::{FrameSample, Placement};
use crate::Result;
use image::RgbImage;
use std::time::Duration;

/// How long each tick waits for operator quit input.
pub const QUIT_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Result of one loop tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Operator quit input received at the end of the tick.
    Quit,
    /// Shutdown was requested before the tick started; nothing was captured.
    Interrupted,
}

/// Counters for one acquisition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub frames_written: u64,
    pub keyframes_written: u64,
    pub pose_records: u64,
    pub dropped_frames: u64,
}

struct Tracking {
    manager: DeviceSessionManager,
    placement: Placement,
}

/// Drives the per-tick capture cadence.
///
/// Owns the camera, the sink, and, when tracking is enabled, the device
/// session manager (which owns the tracking session).
pub struct AcquisitionLoop {
    camera: Box<dyn FrameGateway>,
    viewer: Box<dyn Viewer>,
    sink: CaptureSink,
    clock: Box<dyn Clock>,
    shutdown: ShutdownWatcher,
    tracking: Option<Tracking>,
    frame: RgbImage,
    sequence: u64,
    max_ticks: Option<u64>,
    summary: RunSummary,
}

impl AcquisitionLoop {
    /// A loop capturing frames only. Enable pose logging with [`Self::with_tracking`].
    pub fn new(
        camera: Box<dyn FrameGateway>,
        viewer: Box<dyn Viewer>,
        sink: CaptureSink,
        clock: Box<dyn Clock>,
        shutdown: ShutdownWatcher,
    ) -> Self {
        Self {
            camera,
            viewer,
            sink,
            clock,
            shutdown,
            tracking: None,
            frame: RgbImage::new(0, 0),
            sequence: 0,
            max_ticks: None,
            summary: RunSummary::default(),
        }
    }

    pub fn with_tracking(mut self, manager: DeviceSessionManager, placement: Placement) -> Self {
        self.tracking = Some(Tracking { manager, placement });
        self
    }

    /// Stop [`Self::run`] after `ticks` ticks.
    pub fn with_max_ticks(mut self, ticks: Option<u64>) -> Self {
        self.max_ticks = ticks;
        self
    }

    pub fn track_enabled(&self) -> bool {
        self.tracking.is_some()
    }

    pub fn manager(&self) -> Option<&DeviceSessionManager> {
        self.tracking.as_ref().map(|t| &t.manager)
    }

    /// Frames captured so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Run one tick: poll the device, capture, persist, check for quit.
    pub fn tick(&mut self) -> TickOutcome {
        if self.shutdown.is_requested() {
            if let Some(tracking) = self.tracking.as_mut() {
                tracking.manager.poll(true);
            }
            return TickOutcome::Interrupted;
        }

        if let Some(tracking) = self.tracking.as_mut() {
            tracking.manager.poll(false);
            log_pose(tracking);
        }

        let now = self.clock.now_millis();

        let frame_ok = match self.camera.read_frame(&mut self.frame) {
            Ok(()) if self.frame.width() > 0 && self.frame.height() > 0 => true,
            Ok(()) => {
                log::warn!("Camera returned an empty frame at {}", now);
                false
            }
            Err(e) => {
                log::warn!("Frame read failed at {}: {}", now, e);
                false
            }
        };

        self.sequence += 1;
        let frame = FrameSample {
            timestamp_ms: now,
            sequence: self.sequence,
            image: &self.frame,
        };

        if frame_ok {
            self.viewer.show(&frame);
            match self.sink.write_frame(&frame) {
                Ok(true) => log::info!("Write keyframe #{}", frame.sequence),
                Ok(false) => {}
                Err(e) => log::warn!("Failed to write frame {}: {}", now, e),
            }
            // A keyframe write can fail after the full-rate image landed.
            self.summary.frames_written = self.sink.frames_written();
            self.summary.keyframes_written = self.sink.keyframes_written();
        } else {
            self.summary.dropped_frames += 1;
        }

        if let Some(tracking) = self.tracking.as_ref() {
            if let Some(sampler) = tracking.manager.sampler() {
                match sampler.sample(now, &tracking.placement) {
                    Ok(sample) => match self.sink.append_pose(&sample) {
                        Ok(()) => self.summary.pose_records += 1,
                        Err(e) => log::warn!("Failed to append pose at {}: {}", now, e),
                    },
                    Err(e) => log::warn!("Pose query failed at {}: {}", now, e),
                }
            }
        }

        if let Err(e) = self.sink.append_timestamp(now) {
            log::warn!("Failed to append timestamp {}: {}", now, e);
        }

        self.summary.ticks += 1;

        if self.viewer.poll_quit(QUIT_POLL_TIMEOUT) {
            log::info!("Quit requested after frame #{}", self.sequence);
            return TickOutcome::Quit;
        }
        TickOutcome::Continue
    }

    /// Tick until interrupted, quit, or the tick limit, then close everything.
    pub fn run(mut self) -> Result<RunSummary> {
        log::info!(
            "Acquisition started (tracking {})",
            if self.track_enabled() { "enabled" } else { "disabled" }
        );
        loop {
            if self.max_ticks.is_some_and(|max| self.summary.ticks >= max) {
                log::info!("Tick limit reached");
                break;
            }
            match self.tick() {
                TickOutcome::Continue => {}
                TickOutcome::Quit | TickOutcome::Interrupted => break,
            }
        }
        self.finish()
    }

    /// Release the tracking session and camera, and close the logs.
    pub fn finish(mut self) -> Result<RunSummary> {
        let summary = self.summary;
        if let Some(tracking) = self.tracking.as_mut() {
            tracking.manager.shutdown();
        }
        self.camera.release();
        self.sink.finish()?;
        log::info!(
            "Acquisition finished: {} ticks, {} frames, {} keyframes, {} pose records, {} dropped",
            summary.ticks,
            summary.frames_written,
            summary.keyframes_written,
            summary.pose_records,
            summary.dropped_frames
        );
        Ok(summary)
    }
}

/// Console diagnostics for the active session.
fn log_pose(tracking: &Tracking) {
    let Some(sampler) = tracking.manager.sampler() else {
        return;
    };

    match sampler.raw_state() {
        Ok(state) => {
            let p = state.pose.position;
            log::info!("Raw position x: {}, y: {}, z: {}", p.x, p.y, p.z);
        }
        Err(e) => log::warn!("Raw state query failed: {}", e),
    }

    match sampler.extrapolated_state(&tracking.placement) {
        Ok(state) => {
            let p = state.pose.position;
            log::info!("Extrapolated position x: {}, y: {}, z: {}", p.x, p.y, p.z);
            log::info!("Current tracking stage: {}", state.stability.stage as i32);
        }
        Err(e) => log::warn!("Extrapolated state query failed: {}", e),
    }
}

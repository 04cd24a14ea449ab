use crate::gateway::TrackingSession;
use crate::types::{DeviceHandle, Placement, PoseSample, TrackerState};
use crate::Result;

/// Pose look-ahead applied to every extrapolated query, in seconds.
pub const LOOKAHEAD_SECONDS: f32 = 0.06;

/// Angular velocity averaging window for raw state queries, in seconds.
pub const DEFAULT_ANGULAR_VELOCITY_AVG_TIME: f32 = 0.016;

/// Pose queries against the active tracking session.
///
/// Only reachable through [`crate::session::DeviceSessionManager::sampler`],
/// so a query without a live session cannot be expressed.
pub struct PoseSampler {
    session: Box<dyn TrackingSession>,
}

impl PoseSampler {
    pub(crate) fn new(session: Box<dyn TrackingSession>) -> Self {
        Self { session }
    }

    /// Node the session is bound to.
    pub fn node(&self) -> DeviceHandle {
        self.session.node()
    }

    pub fn is_task_finished(&self) -> bool {
        self.session.is_task_finished()
    }

    /// Current raw tracker state.
    pub fn raw_state(&self) -> Result<TrackerState> {
        self.session.state(DEFAULT_ANGULAR_VELOCITY_AVG_TIME)
    }

    /// Tracker state extrapolated by [`LOOKAHEAD_SECONDS`] and corrected by `placement`.
    pub fn extrapolated_state(&self, placement: &Placement) -> Result<TrackerState> {
        self.session.extrapolated_state(placement, LOOKAHEAD_SECONDS)
    }

    /// Extrapolated pose record keyed by `timestamp_ms`.
    pub fn sample(&self, timestamp_ms: i64, placement: &Placement) -> Result<PoseSample> {
        let state = self.extrapolated_state(placement)?;
        Ok(PoseSample::from_state(timestamp_ms, &state))
    }
}

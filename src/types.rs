use image::RgbImage;

/// Opaque identifier of a node on the device bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);

impl DeviceHandle {
    /// No device.
    pub const NULL: DeviceHandle = DeviceHandle(0);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for DeviceHandle {
    fn default() -> Self {
        Self::NULL
    }
}

/// Counter that changes whenever nodes attach to or detach from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TopologyVersion(pub u32);

/// Status of a bus node as reported by the bus gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Node is present and free to run a task.
    Idle,
    /// Node is already running a task.
    Busy,
    /// Node handle no longer refers to a present node.
    Invalid,
}

/// USB device-type filter used when building the bus.
/// A `pid` of zero matches every product of the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceType {
    pub vid: u16,
    pub pid: u16,
}

impl UsbDeviceType {
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && (self.pid == 0 || self.pid == pid)
    }
}

/// Alt socket vendor id.
pub const ANTILATENCY_VID: u16 = 0x3237;
/// Alt socket vendor id used by older firmware.
pub const ANTILATENCY_LEGACY_VID: u16 = 0x0483;

/// Filters for every Alt socket generation.
pub fn default_device_types() -> Vec<UsbDeviceType> {
    vec![
        UsbDeviceType { vid: ANTILATENCY_VID, pid: 0x0000 },
        UsbDeviceType { vid: ANTILATENCY_LEGACY_VID, pid: 0x0000 },
    ]
}

/// Position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Rotation quaternion [x, y, z, w].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Tracking confidence / initialization progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStage {
    InertialDataInitialization = 0,
    Tracking6Dof = 1,
    TrackingBlind6Dof = 2,
    Tracking3Dof = 3,
    Unknown = -1,
}

impl From<i32> for TrackingStage {
    fn from(value: i32) -> Self {
        match value {
            0 => TrackingStage::InertialDataInitialization,
            1 => TrackingStage::Tracking6Dof,
            2 => TrackingStage::TrackingBlind6Dof,
            3 => TrackingStage::Tracking3Dof,
            _ => TrackingStage::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stability {
    pub stage: TrackingStage,
    pub value: f32,
}

impl Default for Stability {
    fn default() -> Self {
        Self {
            stage: TrackingStage::InertialDataInitialization,
            value: 0.0,
        }
    }
}

/// Tracker state as returned by a tracking session.
///
/// Used for both the raw state and the extrapolated (placement-corrected) state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackerState {
    pub pose: Pose,
    /// Linear velocity in m/s.
    pub velocity: Vec3,
    /// Angular velocity in the tracker frame, rad/s, averaged over the query window.
    pub local_angular_velocity: Vec3,
    pub stability: Stability,
}

/// Spatial reference the tracker localizes against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Environment {
    markers: Vec<Vec3>,
}

impl Environment {
    pub fn new(markers: Vec<Vec3>) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &[Vec3] {
        &self.markers
    }
}

/// Transform from the tracker to the tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Placement {
    pub position: Vec3,
    pub rotation: Quat,
}

/// One pose record, keyed by the frame timestamp of its tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub timestamp_ms: i64,
    pub position: Vec3,
    /// Vector part of the rotation quaternion.
    pub rotation: Vec3,
    pub stage: TrackingStage,
}

impl PoseSample {
    pub fn from_state(timestamp_ms: i64, state: &TrackerState) -> Self {
        let q = state.pose.rotation;
        Self {
            timestamp_ms,
            position: state.pose.position,
            rotation: Vec3::new(q.x, q.y, q.z),
            stage: state.stability.stage,
        }
    }
}

/// One captured camera frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSample<'a> {
    pub timestamp_ms: i64,
    /// 1-based capture count.
    pub sequence: u64,
    pub image: &'a RgbImage,
}

bitflags::bitflags! {
    /// Text log streams a capture sink keeps open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogStreams: u8 {
        /// `timeStepsOnly.txt`
        const TIMESTAMPS = 1 << 0;
        /// `timeStepsANDAltPos.txt`
        const POSE       = 1 << 1;
        /// `altPos.txt`
        const POSITION   = 1 << 2;
    }
}

impl LogStreams {
    /// Streams for a run; pose logs exist only when tracking is enabled.
    pub fn for_run(track_enabled: bool) -> Self {
        if track_enabled {
            LogStreams::all()
        } else {
            LogStreams::TIMESTAMPS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_stage_from_code() {
        assert_eq!(TrackingStage::from(1), TrackingStage::Tracking6Dof);
        assert_eq!(TrackingStage::from(3), TrackingStage::Tracking3Dof);
        assert_eq!(TrackingStage::from(42), TrackingStage::Unknown);
    }

    #[test]
    fn test_device_type_wildcard_pid() {
        let any = UsbDeviceType { vid: ANTILATENCY_VID, pid: 0 };
        assert!(any.matches(ANTILATENCY_VID, 0x1234));
        assert!(!any.matches(0x1234, 0x1234));

        let exact = UsbDeviceType { vid: ANTILATENCY_VID, pid: 7 };
        assert!(exact.matches(ANTILATENCY_VID, 7));
        assert!(!exact.matches(ANTILATENCY_VID, 8));
    }

    #[test]
    fn test_log_streams_for_run() {
        assert_eq!(LogStreams::for_run(false), LogStreams::TIMESTAMPS);
        assert!(LogStreams::for_run(true).contains(LogStreams::POSE | LogStreams::POSITION));
    }

    #[test]
    fn test_pose_sample_takes_quaternion_vector_part() {
        let state = TrackerState {
            pose: Pose {
                position: Vec3::new(1.0, 2.0, 3.0),
                rotation: Quat { x: 0.1, y: 0.2, z: 0.3, w: 0.9 },
            },
            ..Default::default()
        };
        let sample = PoseSample::from_state(1000, &state);
        assert_eq!(sample.timestamp_ms, 1000);
        assert_eq!(sample.rotation, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(sample.stage, TrackingStage::InertialDataInitialization);
    }
}

//! Capability surfaces of the external libraries the logger drives.
//!
//! The device bus, the tracking computation, the camera, and the local
//! key/value storage are supplied from outside the crate. [`crate::usb`] and
//! [`crate::sim`] provide implementations for a real USB bus and for dry runs.

use crate::types::{
    DeviceHandle, Environment, FrameSample, NodeStatus, Placement, TopologyVersion, TrackerState,
    UsbDeviceType,
};
use crate::Result;
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Property key holding a node's hardware serial number.
pub const HARDWARE_SERIAL_NUMBER_KEY: &str = "sys/HardwareSerialNumber";

/// Device bus: enumeration, node status, and node properties.
pub trait BusGateway {
    /// Version string of the underlying bus library.
    fn version(&self) -> String;

    /// Device types the bus was built for.
    fn device_types(&self) -> &[UsbDeviceType];

    /// Current topology version. Changes whenever nodes appear or disappear.
    fn topology_version(&self) -> TopologyVersion;

    /// List nodes whose device type matches one of `filters`.
    fn enumerate(&self, filters: &[UsbDeviceType]) -> Result<Vec<DeviceHandle>>;

    fn status(&self, node: DeviceHandle) -> NodeStatus;

    /// Parent node, or [`DeviceHandle::NULL`] for a root node.
    fn parent(&self, node: DeviceHandle) -> DeviceHandle;

    fn string_property(&self, node: DeviceHandle, key: &str) -> Result<String>;
}

/// Tracking computation library.
pub trait TrackingGateway {
    fn load_environment(&self, code: &str) -> Result<Environment>;

    fn load_placement(&self, code: &str) -> Result<Placement>;

    /// Nodes on `bus` able to run a tracking task, in bus order.
    fn find_supported_nodes(&self, bus: &dyn BusGateway) -> Result<Vec<DeviceHandle>>;

    /// Start a tracking task on `node`. The returned session releases its
    /// resources when dropped.
    fn start_session(
        &self,
        bus: &dyn BusGateway,
        node: DeviceHandle,
        environment: Arc<Environment>,
    ) -> Result<Box<dyn TrackingSession>>;
}

/// A running tracking task bound to one node.
pub trait TrackingSession {
    fn node(&self) -> DeviceHandle;

    /// True once the task stopped on its own (node unplugged, task error).
    fn is_task_finished(&self) -> bool;

    /// Raw tracker state with angular velocity averaged over `angular_velocity_avg_time` seconds.
    fn state(&self, angular_velocity_avg_time: f32) -> Result<TrackerState>;

    /// State extrapolated `delta_time` seconds ahead and corrected by `placement`.
    fn extrapolated_state(&self, placement: &Placement, delta_time: f32) -> Result<TrackerState>;
}

/// Camera capture session.
pub trait FrameGateway {
    fn open(&mut self, index: u32) -> Result<()>;

    fn disable_autofocus(&mut self) -> Result<()>;

    /// Block until the next frame and decode it into `frame`, reusing its allocation
    /// when the size is unchanged.
    fn read_frame(&mut self, frame: &mut RgbImage) -> Result<()>;

    fn release(&mut self);
}

/// Local key/value storage holding environment and placement codes.
pub trait StorageGateway {
    fn read(&self, key: &str, subkey: &str) -> Result<String>;
}

/// Frame display and operator quit input.
pub trait Viewer {
    fn show(&mut self, frame: &FrameSample<'_>);

    /// Wait up to `timeout` for a quit request.
    fn poll_quit(&mut self, timeout: Duration) -> bool;
}

/// Source of record timestamps.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

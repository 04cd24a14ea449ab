//! In-process gateways for dry runs and tests.
//!
//! Handles are cheap clones sharing one state, so a caller can keep a
//! handle and script bus changes while the session manager owns another.

use crate::gateway::{
    BusGateway, Clock, FrameGateway, StorageGateway, TrackingGateway, TrackingSession, Viewer,
    HARDWARE_SERIAL_NUMBER_KEY,
};
use crate::types::{
    default_device_types, DeviceHandle, Environment, FrameSample, NodeStatus, Placement, Pose,
    Quat, Stability, TopologyVersion, TrackerState, TrackingStage, UsbDeviceType, Vec3,
    ANTILATENCY_VID,
};
use crate::{AltcapError, Result};
use image::{Rgb, RgbImage};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const SIM_PID: u16 = 0x0001;
const SOCKET_HANDLE_BASE: u64 = 0x1_0000;

struct SimNode {
    handle: DeviceHandle,
    status: NodeStatus,
    socket: DeviceHandle,
    serial: String,
}

#[derive(Default)]
struct BusState {
    nodes: Vec<SimNode>,
    version: u32,
    next_id: u64,
    enumerate_calls: u64,
}

/// Scriptable device bus. Every node hangs off its own socket, which carries
/// the hardware serial number.
#[derive(Clone)]
pub struct SimBus {
    state: Rc<RefCell<BusState>>,
    device_types: Vec<UsbDeviceType>,
}

impl SimBus {
    /// Empty bus at topology version 0.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(BusState::default())),
            device_types: default_device_types(),
        }
    }

    /// Bus with `count` idle nodes.
    pub fn with_idle_nodes(count: usize) -> Self {
        let bus = Self::new();
        for _ in 0..count {
            bus.add_node(NodeStatus::Idle);
        }
        bus
    }

    /// Plug in a node. Bumps the topology version.
    pub fn add_node(&self, status: NodeStatus) -> DeviceHandle {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let handle = DeviceHandle(id);
        state.nodes.push(SimNode {
            handle,
            status,
            socket: DeviceHandle(SOCKET_HANDLE_BASE + id),
            serial: format!("SIM{:06}", id),
        });
        state.version += 1;
        handle
    }

    /// Unplug a node. Bumps the topology version.
    pub fn remove_node(&self, node: DeviceHandle) {
        let mut state = self.state.borrow_mut();
        state.nodes.retain(|n| n.handle != node);
        state.version += 1;
    }

    /// Bump the topology version without changing the node set.
    pub fn bump_version(&self) {
        self.state.borrow_mut().version += 1;
    }

    pub fn enumerate_calls(&self) -> u64 {
        self.state.borrow().enumerate_calls
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusGateway for SimBus {
    fn version(&self) -> String {
        format!("sim-bus {}", env!("CARGO_PKG_VERSION"))
    }

    fn device_types(&self) -> &[UsbDeviceType] {
        &self.device_types
    }

    fn topology_version(&self) -> TopologyVersion {
        TopologyVersion(self.state.borrow().version)
    }

    fn enumerate(&self, filters: &[UsbDeviceType]) -> Result<Vec<DeviceHandle>> {
        let mut state = self.state.borrow_mut();
        state.enumerate_calls += 1;
        if !filters.iter().any(|f| f.matches(ANTILATENCY_VID, SIM_PID)) {
            return Ok(Vec::new());
        }
        Ok(state.nodes.iter().map(|n| n.handle).collect())
    }

    fn status(&self, node: DeviceHandle) -> NodeStatus {
        self.state
            .borrow()
            .nodes
            .iter()
            .find(|n| n.handle == node)
            .map(|n| n.status)
            .unwrap_or(NodeStatus::Invalid)
    }

    fn parent(&self, node: DeviceHandle) -> DeviceHandle {
        self.state
            .borrow()
            .nodes
            .iter()
            .find(|n| n.handle == node)
            .map(|n| n.socket)
            .unwrap_or(DeviceHandle::NULL)
    }

    fn string_property(&self, node: DeviceHandle, key: &str) -> Result<String> {
        let state = self.state.borrow();
        match state.nodes.iter().find(|n| n.socket == node) {
            Some(n) if key == HARDWARE_SERIAL_NUMBER_KEY => Ok(n.serial.clone()),
            _ => Err(AltcapError::PropertyNotFound(format!("{:?} {}", node, key))),
        }
    }
}

#[derive(Default)]
struct TrackingState {
    find_calls: Cell<u64>,
    started: Cell<u64>,
    live: Cell<u32>,
    max_live: Cell<u32>,
    fail_next_start: Cell<bool>,
    fail_queries: Cell<bool>,
    current_finish: RefCell<Option<Rc<Cell<bool>>>>,
}

/// Tracking library producing a synthetic orbit around the origin.
#[derive(Clone, Default)]
pub struct SimTracking {
    state: Rc<TrackingState>,
}

impl SimTracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_calls(&self) -> u64 {
        self.state.find_calls.get()
    }

    pub fn sessions_started(&self) -> u64 {
        self.state.started.get()
    }

    pub fn live_sessions(&self) -> u32 {
        self.state.live.get()
    }

    /// Highest number of sessions alive at the same time.
    pub fn max_live_sessions(&self) -> u32 {
        self.state.max_live.get()
    }

    /// Mark the live session's task as finished.
    pub fn finish_sessions(&self) {
        if let Some(flag) = self.state.current_finish.borrow().as_ref() {
            flag.set(true);
        }
    }

    pub fn fail_next_start(&self) {
        self.state.fail_next_start.set(true);
    }

    /// Make pose queries of every session fail until switched off again.
    pub fn fail_queries(&self, fail: bool) {
        self.state.fail_queries.set(fail);
    }
}

impl TrackingGateway for SimTracking {
    /// Code format: `x,y,z;x,y,z;...` marker positions.
    fn load_environment(&self, code: &str) -> Result<Environment> {
        let markers = code
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .map(parse_vec3)
            .collect::<Result<Vec<_>>>()?;
        if markers.is_empty() {
            return Err(AltcapError::Tracking("environment has no markers".into()));
        }
        Ok(Environment::new(markers))
    }

    /// Code format: `x,y,z` or `x,y,z;qx,qy,qz,qw`.
    fn load_placement(&self, code: &str) -> Result<Placement> {
        let mut parts = code.split(';');
        let position = parse_vec3(parts.next().unwrap_or(""))?;
        let rotation = match parts.next() {
            Some(q) => parse_quat(q)?,
            None => Quat::IDENTITY,
        };
        Ok(Placement { position, rotation })
    }

    fn find_supported_nodes(&self, bus: &dyn BusGateway) -> Result<Vec<DeviceHandle>> {
        self.state.find_calls.set(self.state.find_calls.get() + 1);
        bus.enumerate(bus.device_types())
    }

    fn start_session(
        &self,
        bus: &dyn BusGateway,
        node: DeviceHandle,
        environment: Arc<Environment>,
    ) -> Result<Box<dyn TrackingSession>> {
        if self.state.fail_next_start.replace(false) {
            return Err(AltcapError::Tracking("task start rejected".into()));
        }
        if bus.status(node) != NodeStatus::Idle {
            return Err(AltcapError::Tracking(format!("node {:?} is not idle", node)));
        }

        let finished = Rc::new(Cell::new(false));
        *self.state.current_finish.borrow_mut() = Some(finished.clone());
        self.state.started.set(self.state.started.get() + 1);
        let live = self.state.live.get() + 1;
        self.state.live.set(live);
        self.state.max_live.set(self.state.max_live.get().max(live));

        Ok(Box::new(SimSession {
            node,
            environment,
            finished,
            queries: Cell::new(0),
            owner: self.state.clone(),
        }))
    }
}

struct SimSession {
    node: DeviceHandle,
    environment: Arc<Environment>,
    finished: Rc<Cell<bool>>,
    queries: Cell<u64>,
    owner: Rc<TrackingState>,
}

/// Queries before the simulated tracker leaves inertial initialization.
const WARMUP_QUERIES: u64 = 3;
const ORBIT_RADIUS: f32 = 0.5;
const ORBIT_HEIGHT: f32 = 1.6;
/// Orbit phase advanced per query, radians.
const ORBIT_STEP: f32 = 0.01;

impl SimSession {
    fn check_query(&self) -> Result<()> {
        if self.owner.fail_queries.get() {
            return Err(AltcapError::Tracking(format!("node {:?} lost tracking data", self.node)));
        }
        Ok(())
    }

    fn orbit(&self, angular_velocity_avg_time: f32) -> TrackerState {
        let n = self.queries.get();
        self.queries.set(n + 1);
        let t = n as f32 * ORBIT_STEP;
        let (sin, cos) = t.sin_cos();
        let (half_sin, half_cos) = (t / 2.0).sin_cos();

        let stage = if n < WARMUP_QUERIES {
            TrackingStage::InertialDataInitialization
        } else if self.environment.markers().is_empty() {
            TrackingStage::Tracking3Dof
        } else {
            TrackingStage::Tracking6Dof
        };

        TrackerState {
            pose: Pose {
                position: Vec3::new(ORBIT_RADIUS * cos, ORBIT_HEIGHT, ORBIT_RADIUS * sin),
                rotation: Quat { x: 0.0, y: half_sin, z: 0.0, w: half_cos },
            },
            velocity: Vec3::new(-ORBIT_RADIUS * sin, 0.0, ORBIT_RADIUS * cos),
            local_angular_velocity: Vec3::new(0.0, 1.0 - angular_velocity_avg_time, 0.0),
            stability: Stability {
                stage,
                value: if stage == TrackingStage::Tracking6Dof { 1.0 } else { 0.0 },
            },
        }
    }
}

impl TrackingSession for SimSession {
    fn node(&self) -> DeviceHandle {
        self.node
    }

    fn is_task_finished(&self) -> bool {
        self.finished.get()
    }

    fn state(&self, angular_velocity_avg_time: f32) -> Result<TrackerState> {
        self.check_query()?;
        Ok(self.orbit(angular_velocity_avg_time))
    }

    fn extrapolated_state(&self, placement: &Placement, delta_time: f32) -> Result<TrackerState> {
        self.check_query()?;
        let mut state = self.orbit(0.0);
        let p = &mut state.pose.position;
        p.x += state.velocity.x * delta_time + placement.position.x;
        p.y += state.velocity.y * delta_time + placement.position.y;
        p.z += state.velocity.z * delta_time + placement.position.z;
        Ok(state)
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.owner.live.set(self.owner.live.get().saturating_sub(1));
    }
}

fn parse_floats<const N: usize>(s: &str) -> Result<[f32; N]> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AltcapError::Tracking(format!("bad number in '{}': {}", s, e)))?;
    values
        .try_into()
        .map_err(|v: Vec<f32>| AltcapError::Tracking(format!("expected {} values, got {}", N, v.len())))
}

fn parse_vec3(s: &str) -> Result<Vec3> {
    let [x, y, z] = parse_floats::<3>(s)?;
    Ok(Vec3::new(x, y, z))
}

fn parse_quat(s: &str) -> Result<Quat> {
    let [x, y, z, w] = parse_floats::<4>(s)?;
    Ok(Quat { x, y, z, w })
}

/// Local storage with a default environment (four floor markers) and an
/// identity placement.
#[derive(Debug, Clone)]
pub struct SimStorage {
    entries: HashMap<(String, String), String>,
}

impl SimStorage {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut storage = Self::empty();
        storage.insert("environment", "default", "0,0,0;1,0,0;0,0,1;1,0,1");
        storage.insert("placement", "default", "0,0,0");
        storage
    }

    pub fn insert(&mut self, key: &str, subkey: &str, value: &str) {
        self.entries
            .insert((key.to_string(), subkey.to_string()), value.to_string());
    }
}

impl StorageGateway for SimStorage {
    fn read(&self, key: &str, subkey: &str) -> Result<String> {
        self.entries
            .get(&(key.to_string(), subkey.to_string()))
            .cloned()
            .ok_or_else(|| AltcapError::Storage(format!("no entry {}/{}", key, subkey)))
    }
}

/// Camera producing a moving gradient.
pub struct SimCamera {
    width: u32,
    height: u32,
    devices: u32,
    opened: Option<u32>,
    autofocus: bool,
    reads: u64,
    fail_at: Vec<u64>,
    frame_interval: Duration,
}

impl SimCamera {
    /// One camera (index 0) delivering `width`x`height` frames without delay.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            devices: 1,
            opened: None,
            autofocus: true,
            reads: 0,
            fail_at: Vec::new(),
            frame_interval: Duration::ZERO,
        }
    }

    /// Number of camera indices that can be opened.
    pub fn with_devices(mut self, devices: u32) -> Self {
        self.devices = devices;
        self
    }

    /// Block this long in every read, like a real sensor's frame period.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Fail the given 1-based reads.
    pub fn fail_reads(mut self, reads: impl IntoIterator<Item = u64>) -> Self {
        self.fail_at.extend(reads);
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    pub fn autofocus(&self) -> bool {
        self.autofocus
    }
}

impl FrameGateway for SimCamera {
    fn open(&mut self, index: u32) -> Result<()> {
        if index >= self.devices {
            return Err(AltcapError::Camera(format!("no camera at index {}", index)));
        }
        self.opened = Some(index);
        log::info!("Sim camera {} opened ({}x{})", index, self.width, self.height);
        Ok(())
    }

    fn disable_autofocus(&mut self) -> Result<()> {
        self.autofocus = false;
        Ok(())
    }

    fn read_frame(&mut self, frame: &mut RgbImage) -> Result<()> {
        if self.opened.is_none() {
            return Err(AltcapError::Camera("camera not opened".into()));
        }
        self.reads += 1;
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        if self.fail_at.contains(&self.reads) {
            return Err(AltcapError::Camera(format!("read {} failed", self.reads)));
        }

        if frame.dimensions() != (self.width, self.height) {
            *frame = RgbImage::new(self.width, self.height);
        }
        let shift = self.reads as u32;
        for (x, y, px) in frame.enumerate_pixels_mut() {
            *px = Rgb([
                (x + shift) as u8,
                (y + shift) as u8,
                (shift.wrapping_mul(3)) as u8,
            ]);
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(index) = self.opened.take() {
            log::info!("Sim camera {} released", index);
        }
    }
}

/// Clock advancing a fixed step on every reading.
#[derive(Debug)]
pub struct SteppingClock {
    next: Cell<i64>,
    step: i64,
}

impl SteppingClock {
    pub fn new(start_ms: i64, step_ms: i64) -> Self {
        Self {
            next: Cell::new(start_ms),
            step: step_ms,
        }
    }
}

impl Clock for SteppingClock {
    fn now_millis(&self) -> i64 {
        let now = self.next.get();
        self.next.set(now + self.step);
        now
    }
}

/// Viewer that counts frames and requests quit after a fixed number of polls.
#[derive(Debug, Default)]
pub struct ScriptedViewer {
    quit_after: Option<u64>,
    polls: u64,
    shown: u64,
}

impl ScriptedViewer {
    /// Never quits.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quit_after(polls: u64) -> Self {
        Self {
            quit_after: Some(polls),
            ..Self::default()
        }
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl Viewer for ScriptedViewer {
    fn show(&mut self, _frame: &FrameSample<'_>) {
        self.shown += 1;
    }

    fn poll_quit(&mut self, _timeout: Duration) -> bool {
        self.polls += 1;
        self.quit_after == Some(self.polls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_versions_follow_plugging() {
        let bus = SimBus::new();
        assert_eq!(bus.topology_version(), TopologyVersion(0));
        let node = bus.add_node(NodeStatus::Idle);
        assert_eq!(bus.topology_version(), TopologyVersion(1));
        bus.remove_node(node);
        assert_eq!(bus.topology_version(), TopologyVersion(2));
        assert_eq!(bus.status(node), NodeStatus::Invalid);
    }

    #[test]
    fn test_serial_lives_on_socket() {
        let bus = SimBus::new();
        let node = bus.add_node(NodeStatus::Idle);
        let socket = bus.parent(node);
        assert!(!socket.is_null());
        assert_eq!(
            bus.string_property(socket, HARDWARE_SERIAL_NUMBER_KEY).unwrap(),
            "SIM000001"
        );
        assert!(bus.string_property(node, HARDWARE_SERIAL_NUMBER_KEY).is_err());
    }

    #[test]
    fn test_enumerate_honours_filters() {
        let bus = SimBus::with_idle_nodes(2);
        assert_eq!(bus.enumerate(bus.device_types()).unwrap().len(), 2);
        let other = [UsbDeviceType { vid: 0x1234, pid: 0 }];
        assert!(bus.enumerate(&other).unwrap().is_empty());
        assert_eq!(bus.enumerate_calls(), 2);
    }

    #[test]
    fn test_environment_and_placement_codes() {
        let tracking = SimTracking::new();
        let env = tracking.load_environment("0,0,0; 1,2,3").unwrap();
        assert_eq!(env.markers()[1], Vec3::new(1.0, 2.0, 3.0));
        assert!(tracking.load_environment("").is_err());
        assert!(tracking.load_environment("1,2").is_err());

        let placement = tracking.load_placement("0.1,0.2,0.3;0,0,0,1").unwrap();
        assert_eq!(placement.position, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(placement.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_session_leaves_warmup() {
        let bus = SimBus::with_idle_nodes(1);
        let tracking = SimTracking::new();
        let node = tracking.find_supported_nodes(&bus).unwrap()[0];
        let env = Arc::new(tracking.load_environment("0,0,0").unwrap());
        let session = tracking.start_session(&bus, node, env).unwrap();

        for _ in 0..WARMUP_QUERIES {
            assert_eq!(
                session.state(0.016).unwrap().stability.stage,
                TrackingStage::InertialDataInitialization
            );
        }
        assert_eq!(
            session.state(0.016).unwrap().stability.stage,
            TrackingStage::Tracking6Dof
        );
        drop(session);
        assert_eq!(tracking.live_sessions(), 0);
    }

    #[test]
    fn test_camera_requires_open_and_valid_index() {
        let mut camera = SimCamera::new(4, 3).with_devices(2);
        let mut frame = RgbImage::new(0, 0);
        assert!(camera.read_frame(&mut frame).is_err());
        assert!(camera.open(2).is_err());

        camera.open(1).unwrap();
        camera.disable_autofocus().unwrap();
        assert!(!camera.autofocus());
        camera.read_frame(&mut frame).unwrap();
        assert_eq!(frame.dimensions(), (4, 3));

        camera.release();
        assert!(!camera.is_open());
    }

    #[test]
    fn test_storage_defaults() {
        let storage = SimStorage::with_defaults();
        assert!(storage.read("environment", "default").is_ok());
        assert!(storage.read("environment", "lab").is_err());
    }
}

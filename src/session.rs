use crate::gateway::{BusGateway, TrackingGateway, HARDWARE_SERIAL_NUMBER_KEY};
use crate::sampler::PoseSampler;
use crate::types::{DeviceHandle, Environment, NodeStatus, TopologyVersion};
use crate::Result;
use std::sync::Arc;

/// Attach state of the tracking device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoDevice,
    SessionActive,
}

/// Keeps at most one tracking session alive, re-acquiring a node whenever
/// the bus topology changes.
pub struct DeviceSessionManager {
    bus: Box<dyn BusGateway>,
    tracking: Box<dyn TrackingGateway>,
    environment: Arc<Environment>,
    observed: TopologyVersion,
    sampler: Option<PoseSampler>,
    scans: u64,
    attaches: u64,
}

impl DeviceSessionManager {
    pub fn new(
        bus: Box<dyn BusGateway>,
        tracking: Box<dyn TrackingGateway>,
        environment: Arc<Environment>,
    ) -> Self {
        Self {
            bus,
            tracking,
            environment,
            observed: TopologyVersion::default(),
            sampler: None,
            scans: 0,
            attaches: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.sampler.is_some() {
            SessionState::SessionActive
        } else {
            SessionState::NoDevice
        }
    }

    /// Pose queries for the active session, if any.
    pub fn sampler(&self) -> Option<&PoseSampler> {
        self.sampler.as_ref()
    }

    /// Number of node scans performed so far.
    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Number of sessions started so far.
    pub fn attaches(&self) -> u64 {
        self.attaches
    }

    /// Advance the state machine by one step.
    pub fn poll(&mut self, shutdown_requested: bool) -> SessionState {
        match self.state() {
            SessionState::SessionActive => {
                let finished = self
                    .sampler
                    .as_ref()
                    .map(|s| s.is_task_finished())
                    .unwrap_or(true);
                if finished {
                    log::info!("Tracking task finished");
                    self.release();
                } else if shutdown_requested {
                    self.release();
                }
            }
            SessionState::NoDevice => {
                if !shutdown_requested {
                    self.try_attach();
                }
            }
        }
        self.state()
    }

    /// Release the active session, if any.
    pub fn shutdown(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            let node = sampler.node();
            drop(sampler);
            log::info!("Tracking session on node {:?} released", node);
        }
    }

    fn try_attach(&mut self) {
        let version = self.bus.topology_version();
        if version == self.observed {
            return;
        }
        self.observed = version;

        log::info!(
            "Bus topology version changed to {}, searching for available tracking node...",
            version.0
        );

        let node = match self.find_idle_node() {
            Ok(Some(node)) => node,
            Ok(None) => {
                log::info!("Tracking node not found.");
                return;
            }
            Err(e) => {
                log::warn!("Tracking node scan failed: {}", e);
                return;
            }
        };

        match self.read_serial(node) {
            Ok(serial) => log::info!("Tracking node found, serial number: {}", serial),
            Err(e) => log::warn!("Tracking node found, serial number unavailable: {}", e),
        }

        // The previous session is always gone here; NoDevice holds none.
        debug_assert!(self.sampler.is_none());
        match self
            .tracking
            .start_session(self.bus.as_ref(), node, self.environment.clone())
        {
            Ok(session) => {
                self.attaches += 1;
                self.sampler = Some(PoseSampler::new(session));
                log::info!("Run tracking on node {:?}", node);
            }
            Err(e) => {
                log::warn!("Failed to start tracking task on node {:?}: {}", node, e);
            }
        }
    }

    /// First supported node that is idle.
    fn find_idle_node(&mut self) -> Result<Option<DeviceHandle>> {
        self.scans += 1;
        let nodes = self.tracking.find_supported_nodes(self.bus.as_ref())?;
        Ok(nodes
            .into_iter()
            .find(|&node| self.bus.status(node) == NodeStatus::Idle))
    }

    /// Serial number of the socket the node is plugged into.
    fn read_serial(&self, node: DeviceHandle) -> Result<String> {
        let parent = self.bus.parent(node);
        let target = if parent.is_null() { node } else { parent };
        self.bus.string_property(target, HARDWARE_SERIAL_NUMBER_KEY)
    }
}

impl Drop for DeviceSessionManager {
    fn drop(&mut self) {
        self.release();
    }
}

use crate::gateway::{BusGateway, HARDWARE_SERIAL_NUMBER_KEY};
use crate::types::{DeviceHandle, NodeStatus, TopologyVersion, UsbDeviceType};
use crate::{AltcapError, Result};
use rusb::{Device, GlobalContext, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USB_TIMEOUT: Duration = Duration::from_secs(1);

/// Marks handles minted by this bus so none of them equals `DeviceHandle::NULL`.
const HANDLE_TAG: u64 = 1 << 16;

/// Snapshot entry used to detect topology changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NodeKey {
    bus: u8,
    address: u8,
    vid: u16,
    pid: u16,
}

/// Counts arrivals and departures of matching devices.
struct HotplugCounter {
    device_types: Vec<UsbDeviceType>,
    changes: Arc<AtomicU32>,
}

impl HotplugCounter {
    /// `ids` is `None` when the descriptor could not be read; that still counts.
    fn record(&self, ids: Option<(u16, u16)>) {
        let relevant = match ids {
            Some((vid, pid)) => self.device_types.iter().any(|t| t.matches(vid, pid)),
            None => true,
        };
        if relevant {
            self.changes.fetch_add(1, Ordering::AcqRel);
        }
    }
}

fn descriptor_ids<T: UsbContext>(device: &Device<T>) -> Option<(u16, u16)> {
    device
        .device_descriptor()
        .ok()
        .map(|d| (d.vendor_id(), d.product_id()))
}

impl<T: UsbContext> Hotplug<T> for HotplugCounter {
    fn device_arrived(&mut self, device: Device<T>) {
        log::debug!("USB device arrived: {}:{}", device.bus_number(), device.address());
        self.record(descriptor_ids(&device));
    }

    fn device_left(&mut self, device: Device<T>) {
        log::debug!("USB device left: {}:{}", device.bus_number(), device.address());
        self.record(descriptor_ids(&device));
    }
}

enum TopologyWatch {
    Hotplug {
        changes: Arc<AtomicU32>,
        _registration: Registration<GlobalContext>,
    },
    Polling {
        snapshot: RefCell<Vec<NodeKey>>,
        version: Cell<u32>,
    },
}

/// Device bus backed by libusb enumeration.
///
/// When libusb supports hotplug, the topology version counts arrival and
/// departure events of matching devices, pumped without blocking from
/// [`BusGateway::topology_version`]. Devices already present at construction
/// are reported as arrivals, so a plugged-in socket is found on the first poll.
///
/// Without hotplug support the bus falls back to polling: every
/// [`BusGateway::topology_version`] call re-lists the USB devices and bumps
/// the version when the matching set differs from the previous listing.
pub struct UsbBus {
    device_types: Vec<UsbDeviceType>,
    watch: TopologyWatch,
}

impl UsbBus {
    pub fn new(device_types: Vec<UsbDeviceType>) -> Result<Self> {
        rusb::devices().map_err(|e| AltcapError::CapabilityUnavailable("USB device bus", e.to_string()))?;
        let watch = if rusb::has_hotplug() {
            let changes = Arc::new(AtomicU32::new(0));
            let counter = HotplugCounter {
                device_types: device_types.clone(),
                changes: changes.clone(),
            };
            let callback: Box<dyn Hotplug<GlobalContext>> = Box::new(counter);
            let registration = HotplugBuilder::new()
                .enumerate(true)
                .register(GlobalContext::default(), callback)
                .map_err(|e| AltcapError::CapabilityUnavailable("USB hotplug", e.to_string()))?;
            log::info!("USB topology tracked by hotplug events");
            TopologyWatch::Hotplug {
                changes,
                _registration: registration,
            }
        } else {
            log::info!("USB hotplug unsupported, polling device list for topology changes");
            TopologyWatch::Polling {
                snapshot: RefCell::new(Vec::new()),
                version: Cell::new(0),
            }
        };
        Ok(Self { device_types, watch })
    }

    fn scan(&self) -> Result<Vec<NodeKey>> {
        let mut keys = Vec::new();
        for device in rusb::devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    log::trace!(
                        "Skipping USB device {}:{}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };
            let key = NodeKey {
                bus: device.bus_number(),
                address: device.address(),
                vid: desc.vendor_id(),
                pid: desc.product_id(),
            };
            if self.device_types.iter().any(|t| t.matches(key.vid, key.pid)) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn find_device(&self, node: DeviceHandle) -> Option<Device<GlobalContext>> {
        let (bus, address) = split_handle(node)?;
        let devices = rusb::devices().ok()?;
        let found = devices
            .iter()
            .find(|d| d.bus_number() == bus && d.address() == address);
        found
    }
}

impl BusGateway for UsbBus {
    fn version(&self) -> String {
        let v = rusb::version();
        format!("libusb {}.{}.{}.{}", v.major(), v.minor(), v.micro(), v.nano())
    }

    fn device_types(&self) -> &[UsbDeviceType] {
        &self.device_types
    }

    fn topology_version(&self) -> TopologyVersion {
        match &self.watch {
            TopologyWatch::Hotplug { changes, .. } => {
                if let Err(e) = GlobalContext::default().handle_events(Some(Duration::ZERO)) {
                    log::warn!("USB event handling failed: {}", e);
                }
                TopologyVersion(changes.load(Ordering::Acquire))
            }
            TopologyWatch::Polling { snapshot, version } => {
                match self.scan() {
                    Ok(keys) => {
                        let mut snapshot = snapshot.borrow_mut();
                        if *snapshot != keys {
                            log::debug!("USB topology changed: {} -> {} nodes", snapshot.len(), keys.len());
                            *snapshot = keys;
                            version.set(version.get().wrapping_add(1));
                        }
                    }
                    Err(e) => log::warn!("USB rescan failed: {}", e),
                }
                TopologyVersion(version.get())
            }
        }
    }

    fn enumerate(&self, filters: &[UsbDeviceType]) -> Result<Vec<DeviceHandle>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|k| filters.iter().any(|t| t.matches(k.vid, k.pid)))
            .map(|k| handle_for(k.bus, k.address))
            .collect())
    }

    fn status(&self, node: DeviceHandle) -> NodeStatus {
        let Some(device) = self.find_device(node) else {
            return NodeStatus::Invalid;
        };
        match device.open() {
            Ok(_) => NodeStatus::Idle,
            Err(rusb::Error::NoDevice) | Err(rusb::Error::NotFound) => NodeStatus::Invalid,
            Err(rusb::Error::Busy) | Err(rusb::Error::Access) => NodeStatus::Busy,
            Err(e) => {
                log::warn!("USB node {:?} status unknown: {}", node, e);
                NodeStatus::Busy
            }
        }
    }

    fn parent(&self, node: DeviceHandle) -> DeviceHandle {
        let Some(device) = self.find_device(node) else {
            return DeviceHandle::NULL;
        };
        let ids = descriptor_ids(&device);
        let upstream = device.get_parent().map(|p| (p.bus_number(), p.address()));
        parent_handle(&self.device_types, ids, upstream)
    }

    fn string_property(&self, node: DeviceHandle, key: &str) -> Result<String> {
        if key != HARDWARE_SERIAL_NUMBER_KEY {
            return Err(AltcapError::PropertyNotFound(key.to_string()));
        }
        let device = self
            .find_device(node)
            .ok_or_else(|| AltcapError::PropertyNotFound(format!("{:?} is not on the bus", node)))?;
        let desc = device.device_descriptor()?;
        let handle = device.open()?;
        let languages = handle.read_languages(USB_TIMEOUT)?;
        let lang = languages
            .first()
            .ok_or_else(|| AltcapError::PropertyNotFound(format!("{:?} has no string descriptors", node)))?;
        Ok(handle.read_serial_number_string(*lang, &desc, USB_TIMEOUT)?)
    }
}

/// A matched device is the socket itself and carries the hardware serial, so
/// it has no parent; anything else reports its upstream hub.
fn parent_handle(
    device_types: &[UsbDeviceType],
    ids: Option<(u16, u16)>,
    upstream: Option<(u8, u8)>,
) -> DeviceHandle {
    let is_socket = ids.is_some_and(|(vid, pid)| device_types.iter().any(|t| t.matches(vid, pid)));
    match upstream {
        Some((bus, address)) if !is_socket => handle_for(bus, address),
        _ => DeviceHandle::NULL,
    }
}

pub fn handle_for(bus: u8, address: u8) -> DeviceHandle {
    DeviceHandle(HANDLE_TAG | ((bus as u64) << 8) | address as u64)
}

fn split_handle(node: DeviceHandle) -> Option<(u8, u8)> {
    if node.0 & !0xFFFF != HANDLE_TAG {
        return None;
    }
    Some(((node.0 >> 8) as u8, node.0 as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{default_device_types, ANTILATENCY_VID};

    #[test]
    fn test_handles_round_trip_bus_address() {
        let h = handle_for(3, 17);
        assert!(!h.is_null());
        assert_eq!(split_handle(h), Some((3, 17)));
        assert_eq!(split_handle(DeviceHandle::NULL), None);
        assert_eq!(split_handle(DeviceHandle(42)), None);
    }

    #[test]
    fn test_bus_zero_address_zero_is_not_null() {
        assert_ne!(handle_for(0, 0), DeviceHandle::NULL);
    }

    #[test]
    fn test_socket_device_has_no_parent() {
        let types = default_device_types();
        let hub = Some((1, 4));
        assert_eq!(parent_handle(&types, Some((ANTILATENCY_VID, 0x0042)), hub), DeviceHandle::NULL);
        assert_eq!(parent_handle(&types, Some((0x1d6b, 0x0002)), hub), handle_for(1, 4));
        assert_eq!(parent_handle(&types, None, hub), handle_for(1, 4));
        assert_eq!(parent_handle(&types, Some((0x1d6b, 0x0002)), None), DeviceHandle::NULL);
    }

    #[test]
    fn test_hotplug_counts_only_matching_devices() {
        let changes = Arc::new(AtomicU32::new(0));
        let counter = HotplugCounter {
            device_types: default_device_types(),
            changes: changes.clone(),
        };
        counter.record(Some((ANTILATENCY_VID, 0x0001)));
        counter.record(Some((0x1d6b, 0x0003)));
        assert_eq!(changes.load(Ordering::Acquire), 1);

        // Departures whose descriptor is gone still count.
        counter.record(None);
        assert_eq!(changes.load(Ordering::Acquire), 2);
    }
}

//! Device Module
//!
//! Input devices known to the router and per-device idle bookkeeping.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

/// Input device id (XInput2 device id for X11)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u16);

impl DeviceId {
    /// Core keyboard as seen through the core protocol
    pub const CORE_KEYBOARD: DeviceId = DeviceId(3);
    /// Core pointer as seen through the core protocol
    pub const CORE_POINTER: DeviceId = DeviceId(2);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Keyboard,
    Pointer,
    Touchpad,
    Touchscreen,
    TabletTool,
    /// Tablet pad with buttons, rings and strips
    Pad,
}

/// Input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub id: DeviceId,

    pub name: String,

    pub device_type: DeviceType,
}

/// Device manager
///
/// Tracks the devices currently present and when each one last produced
/// user activity.
#[derive(Debug, Default)]
pub struct DeviceManager {
    devices: HashMap<DeviceId, InputDevice>,

    /// Last activity time per device, in server milliseconds
    last_activity: HashMap<DeviceId, u32>,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: InputDevice) {
        debug!("Input device {} added: {} ({:?})", device.id, device.name, device.device_type);
        self.devices.insert(device.id, device);
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<InputDevice> {
        self.last_activity.remove(&id);
        let device = self.devices.remove(&id)?;
        debug!("Input device {} removed: {}", id, device.name);
        Some(device)
    }

    pub fn get(&self, id: DeviceId) -> Option<&InputDevice> {
        self.devices.get(&id)
    }

    /// Device list
    pub fn devices(&self) -> impl Iterator<Item = &InputDevice> {
        self.devices.values()
    }

    /// Record user activity on `id`, resetting its idle time
    pub fn reset_idle(&mut self, id: DeviceId, time: u32) {
        self.last_activity.insert(id, time);
    }

    pub fn last_activity(&self, id: DeviceId) -> Option<u32> {
        self.last_activity.get(&id).copied()
    }

    /// Milliseconds since the most recent activity on any device
    pub fn idle_time(&self, now: u32) -> Option<u32> {
        self.last_activity
            .values()
            .max()
            .map(|&last| now.wrapping_sub(last))
    }
}

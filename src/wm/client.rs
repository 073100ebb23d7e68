use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::shared::Geometry;
use crate::wm::client_flags::{ClientFlags, WindowLayer, WindowType};
use crate::wm::device::DeviceId;
use crate::wm::grab::GrabOp;
use crate::wm::transients;

/// Handle of a managed window
///
/// For X11 clients this is the client's XID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Window Manager client state
/// Represents a window being managed by the WM
#[derive(Debug, Clone)]
pub struct Client {
    pub id: WindowId,

    pub window_type: WindowType,

    /// Window state flags (above, below, fullscreen, ...)
    pub flags: ClientFlags,

    /// Last known/validated frame geometry
    pub geometry: Geometry,

    /// Parent this window is transient for. Non-owning; cleared when the
    /// parent goes away.
    pub transient_for: Option<WindowId>,

    /// Window group (group leader XID)
    pub group: Option<u32>,

    /// Workspace index, `None` when on all workspaces
    pub workspace: Option<u32>,

    /// Current stacking layer. Written by the stack only.
    pub layer: WindowLayer,

    /// Dense position inside the stack, `None` while not stacked.
    /// Written by the stack only.
    pub stack_position: Option<usize>,

    /// Last user interaction time (_NET_WM_USER_TIME)
    pub user_time: Option<u32>,

    /// The monitor this window is on is showing a fullscreen window
    pub monitor_in_fullscreen: bool,

    /// Devices for which this window inhibits compositor shortcuts
    pub shortcuts_inhibited: HashSet<DeviceId>,

    /// Grab operation currently running on this window
    pub grab_op: Option<GrabOp>,
}

impl Client {
    pub fn new(id: WindowId, window_type: WindowType, geometry: Geometry) -> Self {
        Self {
            id,
            window_type,
            flags: ClientFlags::MAPPED,
            geometry,
            transient_for: None,
            group: None,
            workspace: Some(0),
            layer: WindowLayer::Normal,
            stack_position: None,
            user_time: None,
            monitor_in_fullscreen: false,
            shortcuts_inhibited: HashSet::new(),
            grab_op: None,
        }
    }

    pub fn is_override_redirect(&self) -> bool {
        self.flags.contains(ClientFlags::OVERRIDE_REDIRECT)
    }

    pub fn is_attached_dialog(&self) -> bool {
        self.flags.contains(ClientFlags::ATTACHED) && self.transient_for.is_some()
    }

    /// Whether the window shows up on `workspace`
    pub fn located_on_workspace(&self, workspace: u32) -> bool {
        self.workspace.is_none_or(|w| w == workspace)
    }

    pub fn shortcuts_inhibited(&self, device: DeviceId) -> bool {
        self.shortcuts_inhibited.contains(&device)
    }

    /// Layer ignoring any transient or group relationship
    pub fn standalone_layer(&self) -> WindowLayer {
        if self.window_type.is_override_layer_type() {
            return WindowLayer::OverrideRedirect;
        }

        if self.flags.contains(ClientFlags::BELOW) {
            WindowLayer::Bottom
        } else if self.flags.contains(ClientFlags::ABOVE) && !self.flags.is_maximized() {
            WindowLayer::Top
        } else if self.window_type == WindowType::Desktop {
            WindowLayer::Desktop
        } else if self.window_type == WindowType::Dock {
            if self.monitor_in_fullscreen {
                WindowLayer::Bottom
            } else {
                WindowLayer::DOCK
            }
        } else {
            WindowLayer::Normal
        }
    }

    /// Notification that a grab op started on this window
    pub fn grab_op_began(&mut self, op: GrabOp) {
        if op.is_window_op() {
            self.flags.insert(ClientFlags::MOVING_RESIZING);
        }
        self.grab_op = Some(op);
    }

    /// Notification that the grab op on this window ended
    pub fn grab_op_ended(&mut self) {
        self.flags.remove(ClientFlags::MOVING_RESIZING);
        self.grab_op = None;
    }
}

/// Arena of managed windows
///
/// Owns every [`Client`]; everything else refers to windows by [`WindowId`].
#[derive(Debug, Default)]
pub struct WindowArena {
    clients: HashMap<WindowId, Client>,

    /// Workspace currently shown
    pub active_workspace: u32,
}

impl WindowArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Client) {
        debug!("Managing window {}", client.id);
        self.clients.insert(client.id, client);
    }

    /// Remove a window, invalidating back-references to it
    pub fn remove(&mut self, id: WindowId) -> Option<Client> {
        let removed = self.clients.remove(&id)?;
        for client in self.clients.values_mut() {
            if client.transient_for == Some(id) {
                debug!("Clearing transient_for of {} (parent {} gone)", client.id, id);
                client.transient_for = None;
            }
        }
        Some(removed)
    }

    pub fn get(&self, id: WindowId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<WindowId> {
        let mut ids: Vec<WindowId> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Members of a window group, sorted by id
    pub fn group_members(&self, group: u32) -> Vec<WindowId> {
        let mut members: Vec<WindowId> = self
            .clients
            .values()
            .filter(|c| c.group == Some(group))
            .map(|c| c.id)
            .collect();
        members.sort();
        members
    }

    /// Set `transient_for`, refusing parents that would close a loop
    pub fn set_transient_for(&mut self, id: WindowId, parent: Option<WindowId>) -> bool {
        if let Some(parent) = parent {
            if transients::would_create_loop(self, id, parent) {
                warn!("Setting {} transient for {} would create a loop", id, parent);
                return false;
            }
        }

        match self.clients.get_mut(&id) {
            Some(client) => {
                client.transient_for = parent;
                true
            }
            None => false,
        }
    }

    /// Layer policy: standalone layer, promoted by group membership for
    /// transient-type windows that are not transient for a specific window.
    pub fn calculate_layer(&self, id: WindowId) -> WindowLayer {
        let Some(client) = self.get(id) else {
            return WindowLayer::Normal;
        };

        let mut layer = client.standalone_layer();

        if layer != WindowLayer::Desktop
            && client.window_type.is_transient_type()
            && client.transient_for.is_none()
        {
            let group_max = client
                .group
                .map(|group| {
                    self.group_members(group)
                        .into_iter()
                        .filter_map(|member| self.get(member))
                        .filter(|member| !member.is_override_redirect())
                        .map(|member| member.standalone_layer())
                        .max()
                        .unwrap_or(WindowLayer::Desktop)
                })
                .unwrap_or(WindowLayer::Desktop);

            if group_max > layer {
                debug!(
                    "Promoting window {} from layer {:?} to {:?} due to group membership",
                    id, layer, group_max
                );
                layer = group_max;
            }
        }

        layer
    }
}

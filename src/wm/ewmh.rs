//! EWMH (Extended Window Manager Hints) support
//!
//! The atoms the core needs, the stacking list property and reading the
//! client properties that feed stacking: window type, transiency and
//! window group.

use anyhow::{Context, Result};
use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::wrapper::ConnectionExt as _;

use crate::shared::Geometry;
use crate::wm::client::{Client, WindowId};
use crate::wm::client_flags::{ClientFlags, WindowType};

/// Interned atoms
#[derive(Debug, Clone, Copy)]
pub struct Atoms {
    pub net_supported: Atom,
    pub net_client_list_stacking: Atom,
    pub net_supporting_wm_check: Atom,
    pub net_wm_name: Atom,
    pub net_wm_window_type: Atom,
    pub net_wm_window_type_desktop: Atom,
    pub net_wm_window_type_dock: Atom,
    pub net_wm_window_type_normal: Atom,
    pub net_wm_window_type_dialog: Atom,
    pub net_wm_window_type_utility: Atom,
    pub net_wm_window_type_toolbar: Atom,
    pub net_wm_window_type_splash: Atom,
    pub net_wm_window_type_menu: Atom,
    pub net_wm_window_type_dropdown_menu: Atom,
    pub net_wm_window_type_popup_menu: Atom,
    pub net_wm_window_type_tooltip: Atom,
    pub net_wm_window_type_notification: Atom,
    pub net_wm_window_type_combo: Atom,
    pub net_wm_window_type_dnd: Atom,
    pub net_wm_state: Atom,
    pub net_wm_state_above: Atom,
    pub net_wm_state_below: Atom,
    pub net_wm_state_modal: Atom,
    pub wm_client_leader: Atom,
    pub utf8_string: Atom,
    /// Zero-length appends to this property fetch a server timestamp
    pub area_timestamp_prop: Atom,
}

impl Atoms {
    /// Intern all required atoms
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        let intern = |name: &str| -> Result<Atom> {
            Ok(conn
                .intern_atom(false, name.as_bytes())?
                .reply()
                .with_context(|| format!("Failed to intern {}", name))?
                .atom)
        };

        Ok(Self {
            net_supported: intern("_NET_SUPPORTED")?,
            net_client_list_stacking: intern("_NET_CLIENT_LIST_STACKING")?,
            net_supporting_wm_check: intern("_NET_SUPPORTING_WM_CHECK")?,
            net_wm_name: intern("_NET_WM_NAME")?,
            net_wm_window_type: intern("_NET_WM_WINDOW_TYPE")?,
            net_wm_window_type_desktop: intern("_NET_WM_WINDOW_TYPE_DESKTOP")?,
            net_wm_window_type_dock: intern("_NET_WM_WINDOW_TYPE_DOCK")?,
            net_wm_window_type_normal: intern("_NET_WM_WINDOW_TYPE_NORMAL")?,
            net_wm_window_type_dialog: intern("_NET_WM_WINDOW_TYPE_DIALOG")?,
            net_wm_window_type_utility: intern("_NET_WM_WINDOW_TYPE_UTILITY")?,
            net_wm_window_type_toolbar: intern("_NET_WM_WINDOW_TYPE_TOOLBAR")?,
            net_wm_window_type_splash: intern("_NET_WM_WINDOW_TYPE_SPLASH")?,
            net_wm_window_type_menu: intern("_NET_WM_WINDOW_TYPE_MENU")?,
            net_wm_window_type_dropdown_menu: intern("_NET_WM_WINDOW_TYPE_DROPDOWN_MENU")?,
            net_wm_window_type_popup_menu: intern("_NET_WM_WINDOW_TYPE_POPUP_MENU")?,
            net_wm_window_type_tooltip: intern("_NET_WM_WINDOW_TYPE_TOOLTIP")?,
            net_wm_window_type_notification: intern("_NET_WM_WINDOW_TYPE_NOTIFICATION")?,
            net_wm_window_type_combo: intern("_NET_WM_WINDOW_TYPE_COMBO")?,
            net_wm_window_type_dnd: intern("_NET_WM_WINDOW_TYPE_DND")?,
            net_wm_state: intern("_NET_WM_STATE")?,
            net_wm_state_above: intern("_NET_WM_STATE_ABOVE")?,
            net_wm_state_below: intern("_NET_WM_STATE_BELOW")?,
            net_wm_state_modal: intern("_NET_WM_STATE_MODAL")?,
            wm_client_leader: intern("WM_CLIENT_LEADER")?,
            utf8_string: intern("UTF8_STRING")?,
            area_timestamp_prop: intern("_AREA_TIMESTAMP_PROP")?,
        })
    }

    /// Advertise what we support on the root window
    pub fn setup_supported<C: Connection>(&self, conn: &C, root: Window) -> Result<()> {
        let supported = [
            self.net_supported,
            self.net_client_list_stacking,
            self.net_supporting_wm_check,
            self.net_wm_name,
            self.net_wm_window_type,
            self.net_wm_state,
            self.net_wm_state_above,
            self.net_wm_state_below,
            self.net_wm_state_modal,
        ];
        conn.change_property32(PropMode::REPLACE, root, self.net_supported, AtomEnum::ATOM, &supported)?;
        Ok(())
    }

    fn window_type_from_atom(&self, atom: Atom) -> Option<WindowType> {
        let window_type = match atom {
            a if a == self.net_wm_window_type_desktop => WindowType::Desktop,
            a if a == self.net_wm_window_type_dock => WindowType::Dock,
            a if a == self.net_wm_window_type_dialog => WindowType::Dialog,
            a if a == self.net_wm_window_type_utility => WindowType::Utility,
            a if a == self.net_wm_window_type_toolbar => WindowType::Toolbar,
            a if a == self.net_wm_window_type_splash => WindowType::Splashscreen,
            a if a == self.net_wm_window_type_menu => WindowType::Menu,
            a if a == self.net_wm_window_type_dropdown_menu => WindowType::DropdownMenu,
            a if a == self.net_wm_window_type_popup_menu => WindowType::PopupMenu,
            a if a == self.net_wm_window_type_tooltip => WindowType::Tooltip,
            a if a == self.net_wm_window_type_notification => WindowType::Notification,
            a if a == self.net_wm_window_type_combo => WindowType::Combo,
            a if a == self.net_wm_window_type_dnd => WindowType::Dnd,
            a if a == self.net_wm_window_type_normal => WindowType::Normal,
            _ => return None,
        };
        Some(window_type)
    }
}

/// Publish the stacking order, bottom to top
pub fn set_client_list_stacking<C: Connection>(
    conn: &C,
    atoms: &Atoms,
    root: Window,
    bottom_to_top: &[WindowId],
) -> Result<()> {
    let windows: Vec<Window> = bottom_to_top.iter().map(|w| w.0).collect();
    conn.change_property32(
        PropMode::REPLACE,
        root,
        atoms.net_client_list_stacking,
        AtomEnum::WINDOW,
        &windows,
    )?;
    Ok(())
}

fn property32<C: Connection>(conn: &C, window: Window, property: Atom, kind: AtomEnum, length: u32) -> Result<Vec<u32>> {
    let reply = conn.get_property(false, window, property, kind, 0, length)?.reply()?;
    Ok(reply.value32().map(|values| values.collect()).unwrap_or_default())
}

/// WM_TRANSIENT_FOR of `window`, ignoring self references
pub fn read_transient_for<C: Connection>(conn: &C, window: Window) -> Result<Option<WindowId>> {
    Ok(property32(conn, window, AtomEnum::WM_TRANSIENT_FOR.into(), AtomEnum::WINDOW, 1)?
        .first()
        .copied()
        .filter(|&w| w != x11rb::NONE && w != window)
        .map(WindowId))
}

/// Build a client record from a window's attributes and properties
pub fn read_client<C: Connection>(conn: &C, atoms: &Atoms, window: Window) -> Result<Client> {
    let attrs = conn
        .get_window_attributes(window)?
        .reply()
        .context("Failed to get window attributes")?;
    let geom = conn.get_geometry(window)?.reply().context("Failed to get window geometry")?;
    let geometry = Geometry::new(geom.x.into(), geom.y.into(), geom.width.into(), geom.height.into());

    let types = property32(conn, window, atoms.net_wm_window_type, AtomEnum::ATOM, 32)?;
    let transient_for = read_transient_for(conn, window)?;

    let window_type = if attrs.override_redirect {
        types
            .iter()
            .find_map(|&a| atoms.window_type_from_atom(a))
            .filter(|t| t.is_override_layer_type())
            .unwrap_or(WindowType::OverrideOther)
    } else {
        types.iter().find_map(|&a| atoms.window_type_from_atom(a)).unwrap_or(if transient_for.is_some() {
            WindowType::Dialog
        } else {
            WindowType::Normal
        })
    };

    let mut client = Client::new(WindowId(window), window_type, geometry);
    client.transient_for = transient_for;
    client.group = property32(conn, window, atoms.wm_client_leader, AtomEnum::WINDOW, 1)?
        .first()
        .copied()
        .filter(|&leader| leader != x11rb::NONE);

    if attrs.override_redirect {
        client.flags.insert(ClientFlags::OVERRIDE_REDIRECT);
    }
    if attrs.map_state != MapState::VIEWABLE {
        client.flags.remove(ClientFlags::MAPPED);
    }

    for state in property32(conn, window, atoms.net_wm_state, AtomEnum::ATOM, 32)? {
        if state == atoms.net_wm_state_above {
            client.flags.insert(ClientFlags::ABOVE);
        } else if state == atoms.net_wm_state_below {
            client.flags.insert(ClientFlags::BELOW);
        } else if state == atoms.net_wm_state_modal && client.window_type == WindowType::Dialog {
            client.window_type = WindowType::ModalDialog;
        }
    }

    debug!(
        "Read window 0x{:x}: {:?} transient for {:?} group {:?}",
        window, client.window_type, client.transient_for, client.group
    );
    Ok(client)
}

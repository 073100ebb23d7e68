//! X11 Backend Module
//!
//! The core protocol implementation of [`Backend`]: keymap queries, passive
//! and active grabs, event freezing, pointer queries, restacking and the
//! property-append timestamp roundtrip. Also translates core input events
//! into [`InputEvent`]s.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::shared::Geometry;
use crate::wm::backend::{Backend, EventMode, FrozenDevice, GrabModifiers, GrabTarget};
use crate::wm::client::WindowId;
use crate::wm::compositor::Compositor;
use crate::wm::events::{EventFlags, EventKind, InputEvent};
use crate::wm::ewmh::{self, Atoms};
use crate::wm::keyboard::KeyboardLayoutResolver;
use crate::wm::keymap::{Keycode, Keymap, Modifiers};
use crate::wm::settings::KeyboardRepeat;
use crate::x11_async::EventQueue;

/// Bit set in `response_type` for events sent with SendEvent
const SEND_EVENT_BIT: u8 = 0x80;

fn mod_mask(modifiers: GrabModifiers) -> ModMask {
    match modifiers {
        GrabModifiers::Any => ModMask::ANY,
        GrabModifiers::Exactly(mods) => ModMask::from(mods.real().bits() as u16),
    }
}

fn allow_mode(device: FrozenDevice, mode: EventMode) -> Allow {
    match (device, mode) {
        (FrozenDevice::Keyboard, EventMode::Thaw) => Allow::ASYNC_KEYBOARD,
        (FrozenDevice::Keyboard, EventMode::Replay) => Allow::REPLAY_KEYBOARD,
        (FrozenDevice::Keyboard, EventMode::KeepFrozen) => Allow::SYNC_KEYBOARD,
        (FrozenDevice::Pointer, EventMode::Thaw) => Allow::ASYNC_POINTER,
        (FrozenDevice::Pointer, EventMode::Replay) => Allow::REPLAY_POINTER,
        (FrozenDevice::Pointer, EventMode::KeepFrozen) => Allow::SYNC_POINTER,
    }
}

fn modifiers_from_state(state: KeyButMask) -> Modifiers {
    Modifiers::from_bits_truncate(u32::from(u16::from(state)))
}

fn core_keycode(keycode: Keycode) -> Option<u8> {
    match u8::try_from(keycode) {
        Ok(keycode) => Some(keycode),
        Err(_) => {
            warn!("Keycode {} is out of range for the core protocol", keycode);
            None
        }
    }
}

/// Window manager side of an X11 screen
pub struct X11Backend {
    conn: Arc<RustConnection>,
    root: Window,

    /// Owns the WM selection and receives the timestamp property appends
    helper: Window,

    atoms: Atoms,
    screen: Geometry,

    /// Events read while waiting for a roundtrip, replayed by the event
    /// stream before anything new
    deferred: EventQueue,
}

impl X11Backend {
    /// Create a new backend: take the `WM_Sn` selection and select
    /// substructure redirection on the root window.
    pub fn new(conn: Arc<RustConnection>, screen_num: usize, deferred: EventQueue, replace: bool) -> Result<Self> {
        info!("Initializing X11 backend (replace={})", replace);

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .with_context(|| format!("No screen {}", screen_num))?;
        let root = screen.root;
        let geometry = Geometry::new(0, 0, screen.width_in_pixels.into(), screen.height_in_pixels.into());

        let selection_name = format!("WM_S{}", screen_num);
        let selection = conn
            .intern_atom(false, selection_name.as_bytes())?
            .reply()
            .context("Failed to intern WM selection atom")?
            .atom;

        let current_owner = conn
            .get_selection_owner(selection)?
            .reply()
            .context("Failed to get current WM selection owner")?
            .owner;
        if current_owner != x11rb::NONE && !replace {
            anyhow::bail!(
                "Another window manager is already running (window 0x{:x}). \
                Use --replace to replace it.",
                current_owner
            );
        }

        let helper = conn.generate_id()?;
        conn.create_window(
            screen.root_depth,
            helper,
            root,
            -1000,
            -1000,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new()
                .override_redirect(1)
                .event_mask(EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY),
        )?;
        conn.map_window(helper)?;

        conn.set_selection_owner(helper, selection, x11rb::CURRENT_TIME)?
            .check()
            .context("Failed to set WM selection owner")?;
        let owner = conn
            .get_selection_owner(selection)?
            .reply()
            .context("Failed to verify WM selection ownership")?
            .owner;
        if owner != helper {
            anyhow::bail!("Failed to acquire WM selection (expected 0x{:x}, got 0x{:x})", helper, owner);
        }
        debug!("Acquired {} with helper window 0x{:x}", selection_name, helper);

        let root_mask = EventMask::SUBSTRUCTURE_REDIRECT
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::PROPERTY_CHANGE
            | EventMask::FOCUS_CHANGE;
        conn.change_window_attributes(root, &ChangeWindowAttributesAux::new().event_mask(root_mask))?
            .check()
            .context("Failed to select events on root window - is another WM running?")?;

        let atoms = Atoms::new(conn.as_ref())?;
        atoms.setup_supported(conn.as_ref(), root)?;
        conn.change_property32(
            PropMode::REPLACE,
            root,
            atoms.net_supporting_wm_check,
            AtomEnum::WINDOW,
            &[helper],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            helper,
            atoms.net_supporting_wm_check,
            AtomEnum::WINDOW,
            &[helper],
        )?;
        conn.change_property8(PropMode::REPLACE, helper, atoms.net_wm_name, atoms.utf8_string, b"area")?;
        conn.flush()?;

        info!("Managing screen {} ({}x{})", screen_num, geometry.width, geometry.height);

        Ok(Self {
            conn,
            root,
            helper,
            atoms,
            screen: geometry,
            deferred,
        })
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn grab_window(&self, target: GrabTarget) -> Window {
        match target {
            GrabTarget::Root => self.root,
            GrabTarget::Window(id) => id.0,
        }
    }
}

impl Backend for X11Backend {
    fn keymap(&mut self) -> Result<Keymap> {
        let setup = self.conn.setup();
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);

        let mapping = self
            .conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()
            .context("Failed to get keyboard mapping")?;
        let modifiers = self
            .conn
            .get_modifier_mapping()?
            .reply()
            .context("Failed to get modifier mapping")?;

        let modifier_map: Vec<Keycode> = modifiers.keycodes.iter().map(|&k| Keycode::from(k)).collect();
        Ok(Keymap::from_core_mapping(
            min_keycode.into(),
            mapping.keysyms_per_keycode.into(),
            &mapping.keysyms,
            modifiers.keycodes_per_modifier().into(),
            &modifier_map,
        ))
    }

    fn keymap_layout_group(&mut self) -> usize {
        // Without XKB the core protocol only exposes the first group
        0
    }

    fn grab_pointer(&mut self, window: WindowId, time: u32) -> Result<bool> {
        let reply = self
            .conn
            .grab_pointer(
                false,
                window.0,
                EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE | EventMask::POINTER_MOTION,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                x11rb::NONE,
                time,
            )?
            .reply()
            .context("Failed to grab pointer")?;
        debug!("Pointer grab on {}: {:?}", window, reply.status);
        Ok(reply.status == GrabStatus::SUCCESS)
    }

    fn ungrab_pointer(&mut self, time: u32) -> Result<()> {
        self.conn.ungrab_pointer(time)?;
        Ok(())
    }

    fn grab_keyboard(&mut self, window: WindowId, time: u32) -> Result<bool> {
        let reply = self
            .conn
            .grab_keyboard(false, window.0, time, GrabMode::ASYNC, GrabMode::ASYNC)?
            .reply()
            .context("Failed to grab keyboard")?;
        debug!("Keyboard grab on {}: {:?}", window, reply.status);
        Ok(reply.status == GrabStatus::SUCCESS)
    }

    fn ungrab_keyboard(&mut self, time: u32) -> Result<()> {
        self.conn.ungrab_keyboard(time)?;
        Ok(())
    }

    fn grab_key(&mut self, target: GrabTarget, keycode: Keycode, modifiers: GrabModifiers) -> Result<()> {
        let Some(key) = core_keycode(keycode) else {
            return Ok(());
        };
        // Keyboard frozen until the binding code decides what to do with it
        self.conn.grab_key(
            false,
            self.grab_window(target),
            mod_mask(modifiers),
            key,
            GrabMode::ASYNC,
            GrabMode::SYNC,
        )?;
        Ok(())
    }

    fn ungrab_key(&mut self, target: GrabTarget, keycode: Keycode, modifiers: GrabModifiers) -> Result<()> {
        let Some(key) = core_keycode(keycode) else {
            return Ok(());
        };
        self.conn.ungrab_key(key, self.grab_window(target), mod_mask(modifiers))?;
        Ok(())
    }

    fn grab_button(&mut self, window: WindowId, button: u8, modifiers: GrabModifiers, sync: bool) -> Result<()> {
        let pointer_mode = if sync { GrabMode::SYNC } else { GrabMode::ASYNC };
        self.conn.grab_button(
            false,
            window.0,
            EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE | EventMask::POINTER_MOTION,
            pointer_mode,
            GrabMode::ASYNC,
            x11rb::NONE,
            x11rb::NONE,
            ButtonIndex::from(button),
            mod_mask(modifiers),
        )?;
        Ok(())
    }

    fn ungrab_button(&mut self, window: WindowId, button: u8, modifiers: GrabModifiers) -> Result<()> {
        self.conn
            .ungrab_button(ButtonIndex::from(button), window.0, mod_mask(modifiers))?;
        Ok(())
    }

    fn allow_events(&mut self, device: FrozenDevice, mode: EventMode, time: u32) -> Result<()> {
        self.conn.allow_events(allow_mode(device, mode), time)?;
        Ok(())
    }

    fn query_pointer(&mut self) -> Result<(i32, i32)> {
        let reply = self
            .conn
            .query_pointer(self.root)?
            .reply()
            .context("Failed to query pointer")?;
        Ok((reply.root_x.into(), reply.root_y.into()))
    }

    fn warp_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        let clamp = |v: i32| v.clamp(i16::MIN.into(), i16::MAX.into()) as i16;
        self.conn
            .warp_pointer(x11rb::NONE, self.root, 0, 0, 0, 0, clamp(x), clamp(y))?;
        Ok(())
    }

    fn current_time_roundtrip(&mut self) -> Result<u32> {
        self.conn.change_property8(
            PropMode::APPEND,
            self.helper,
            self.atoms.area_timestamp_prop,
            AtomEnum::STRING,
            &[],
        )?;
        self.conn.flush()?;

        loop {
            match self.conn.wait_for_event().context("Connection lost during timestamp roundtrip")? {
                Event::PropertyNotify(ev) if ev.window == self.helper && ev.atom == self.atoms.area_timestamp_prop => {
                    return Ok(ev.time);
                }
                other => self.deferred.borrow_mut().push_back(other),
            }
        }
    }

    fn restack(&mut self, bottom_to_top: &[WindowId]) -> Result<()> {
        for pair in bottom_to_top.windows(2) {
            let (below, above) = (pair[0], pair[1]);
            self.conn.configure_window(
                above.0,
                &ConfigureWindowAux::new().sibling(below.0).stack_mode(StackMode::ABOVE),
            )?;
        }
        ewmh::set_client_list_stacking(self.conn.as_ref(), &self.atoms, self.root, bottom_to_top)?;
        debug!("Restacked {} windows", bottom_to_top.len());
        Ok(())
    }

    fn move_resize(&mut self, window: WindowId, geometry: Geometry) -> Result<()> {
        self.conn.configure_window(
            window.0,
            &ConfigureWindowAux::new()
                .x(geometry.x)
                .y(geometry.y)
                .width(geometry.width.max(1))
                .height(geometry.height.max(1)),
        )?;
        Ok(())
    }

    fn set_keyboard_repeat(&mut self, repeat: KeyboardRepeat) -> Result<()> {
        let mode = if repeat.enabled { AutoRepeatMode::ON } else { AutoRepeatMode::OFF };
        self.conn
            .change_keyboard_control(&ChangeKeyboardControlAux::new().auto_repeat_mode(mode))?;
        // Rate and delay need XKB
        debug!(
            "Keyboard repeat {} (delay {}ms, interval {}ms not applied)",
            if repeat.enabled { "on" } else { "off" },
            repeat.delay,
            repeat.interval
        );
        Ok(())
    }

    fn set_input_focus(&mut self, window: Option<WindowId>, time: u32) -> Result<()> {
        let focus = window.map_or(self.helper, |w| w.0);
        self.conn.set_input_focus(InputFocus::POINTER_ROOT, focus, time)?;
        Ok(())
    }

    fn screen_geometry(&self) -> Geometry {
        self.screen
    }
}

/// Compositor collaborator for a plain X11 session
///
/// There is no scene graph; key events the core passes on are released
/// from the synchronous key grab according to the requested mode.
pub struct X11Compositor {
    conn: Arc<RustConnection>,
}

impl X11Compositor {
    /// Create a new compositor on `conn`
    pub fn new(conn: Arc<RustConnection>) -> Self {
        Self { conn }
    }
}

impl Compositor for X11Compositor {
    fn handle_event(&mut self, event: &InputEvent, _window: Option<WindowId>, mode: EventMode) {
        if !event.is_key() {
            return;
        }
        if let Err(e) = self.conn.allow_events(allow_mode(FrozenDevice::Keyboard, mode), event.time) {
            warn!("Failed to release the keyboard: {:?}", e);
        }
    }

    fn locate_pointer(&mut self) {
        info!("Locate pointer requested");
    }

    fn queue_check_fullscreen(&mut self) {
        debug!("Fullscreen state may have changed");
    }
}

/// Translate a core input event. Non-input events give `None`.
pub fn translate_event(event: &Event, root: Window, resolver: &KeyboardLayoutResolver) -> Option<InputEvent> {
    let target = |event: Window, child: Window| {
        if event != root {
            Some(WindowId(event))
        } else if child != x11rb::NONE {
            Some(WindowId(child))
        } else {
            None
        }
    };

    let (kind, response_type, time, window, state, x, y) = match event {
        Event::KeyPress(ev) | Event::KeyRelease(ev) => {
            let keycode = Keycode::from(ev.detail);
            let modifiers = modifiers_from_state(ev.state);
            let level = usize::from(modifiers.contains(Modifiers::SHIFT));
            let keysym = resolver
                .keymap()
                .keysym(resolver.layout_group(), keycode, level)
                .filter(|&keysym| keysym != 0)
                .or_else(|| resolver.keysym_for_keycode(keycode))
                .unwrap_or(0);
            let kind = if matches!(event, Event::KeyPress(_)) {
                EventKind::KeyPress { keycode, keysym }
            } else {
                EventKind::KeyRelease { keycode, keysym }
            };
            (kind, ev.response_type, ev.time, target(ev.event, ev.child), ev.state, ev.root_x, ev.root_y)
        }
        Event::ButtonPress(ev) | Event::ButtonRelease(ev) => {
            let press = matches!(event, Event::ButtonPress(_));
            let kind = match (ev.detail, press) {
                (4..=7, true) => EventKind::Scroll,
                (4..=7, false) => return None,
                (button, true) => EventKind::ButtonPress { button },
                (button, false) => EventKind::ButtonRelease { button },
            };
            (kind, ev.response_type, ev.time, target(ev.event, ev.child), ev.state, ev.root_x, ev.root_y)
        }
        Event::MotionNotify(ev) => (
            EventKind::Motion,
            ev.response_type,
            ev.time,
            target(ev.event, ev.child),
            ev.state,
            ev.root_x,
            ev.root_y,
        ),
        Event::EnterNotify(ev) | Event::LeaveNotify(ev) => {
            let kind = if matches!(event, Event::EnterNotify(_)) {
                EventKind::Enter
            } else {
                EventKind::Leave
            };
            (kind, ev.response_type, ev.time, target(ev.event, ev.child), ev.state, ev.root_x, ev.root_y)
        }
        _ => return None,
    };

    let mut input = InputEvent::new(kind, time).with_modifiers(modifiers_from_state(state));
    input.window = window;
    input.x = x.into();
    input.y = y.into();
    if response_type & SEND_EVENT_BIT != 0 {
        input.flags |= EventFlags::SYNTHETIC;
    }
    Some(input)
}

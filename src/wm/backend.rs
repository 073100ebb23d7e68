//! Backend Module
//!
//! The windowing backend as seen by the core: device grabs, passive key
//! and button grabs, event freezing, the keymap and restacking.
//!
//! Grab requests the server refuses are reported as `Ok(false)`. `Err` is
//! reserved for connection-level failures.

use anyhow::Result;

use crate::shared::Geometry;
use crate::wm::client::WindowId;
use crate::wm::keymap::{Keycode, Keymap, Modifiers};
use crate::wm::settings::KeyboardRepeat;

/// How frozen device events are released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    /// Release the freeze, the event stays with us
    Thaw,
    /// Release the freeze and redeliver the event ignoring our passive
    /// grab, so it reaches the client
    Replay,
    /// Leave the device frozen
    KeepFrozen,
}

/// Which device a freeze applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrozenDevice {
    Keyboard,
    Pointer,
}

/// Where a passive grab is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabTarget {
    Root,
    Window(WindowId),
}

/// Modifier requirement of a passive grab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabModifiers {
    Any,
    Exactly(Modifiers),
}

pub trait Backend {
    /// Current keymap
    fn keymap(&mut self) -> Result<Keymap>;

    /// Index of the active layout group
    fn keymap_layout_group(&mut self) -> usize;

    /// Actively grab the pointer for `window`
    fn grab_pointer(&mut self, window: WindowId, time: u32) -> Result<bool>;

    fn ungrab_pointer(&mut self, time: u32) -> Result<()>;

    /// Actively grab the keyboard for `window`
    fn grab_keyboard(&mut self, window: WindowId, time: u32) -> Result<bool>;

    fn ungrab_keyboard(&mut self, time: u32) -> Result<()>;

    fn grab_key(&mut self, target: GrabTarget, keycode: Keycode, modifiers: GrabModifiers) -> Result<()>;

    fn ungrab_key(&mut self, target: GrabTarget, keycode: Keycode, modifiers: GrabModifiers) -> Result<()>;

    /// Passive button grab; `sync` freezes the pointer on activation
    fn grab_button(
        &mut self,
        window: WindowId,
        button: u8,
        modifiers: GrabModifiers,
        sync: bool,
    ) -> Result<()>;

    fn ungrab_button(&mut self, window: WindowId, button: u8, modifiers: GrabModifiers) -> Result<()>;

    /// Release (or keep) a device freeze
    fn allow_events(&mut self, device: FrozenDevice, mode: EventMode, time: u32) -> Result<()>;

    /// Pointer position in root coordinates
    fn query_pointer(&mut self) -> Result<(i32, i32)>;

    fn warp_pointer(&mut self, x: i32, y: i32) -> Result<()>;

    /// Fetch a server timestamp, blocking for one roundtrip
    fn current_time_roundtrip(&mut self) -> Result<u32>;

    /// Apply a bottom-to-top stacking order
    fn restack(&mut self, bottom_to_top: &[WindowId]) -> Result<()>;

    fn move_resize(&mut self, window: WindowId, geometry: Geometry) -> Result<()>;

    fn set_keyboard_repeat(&mut self, repeat: KeyboardRepeat) -> Result<()>;

    fn set_input_focus(&mut self, window: Option<WindowId>, time: u32) -> Result<()>;

    /// Root window geometry
    fn screen_geometry(&self) -> Geometry;
}

//! Key Grabs Module
//!
//! Passive key and button grabs. Every grab is installed once per
//! combination of ignored modifiers, so NumLock or CapsLock never stop a
//! binding from firing.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::wm::backend::{GrabModifiers, GrabTarget};
use crate::wm::client::WindowId;
use crate::wm::client_flags::WindowType;
use crate::wm::display::Display;
use crate::wm::keybindings::KeyBindingFlags;
use crate::wm::keyboard::ResolvedKeyCombo;
use crate::wm::keymap::Modifiers;

/// Highest button with a window grab
const MAX_BUTTON: u8 = 3;

/// `mask` combined with every subset of `ignored`, the empty subset first
pub fn expand_modifiers(mask: Modifiers, ignored: Modifiers) -> Vec<Modifiers> {
    let bits = ignored.bits();
    let mut subset: u32 = 0;
    let mut expanded = Vec::new();
    loop {
        expanded.push(mask | Modifiers::from_bits_truncate(subset));
        subset = subset.wrapping_sub(bits) & bits;
        if subset == 0 {
            break;
        }
    }
    expanded
}

/// Which passive grabs are currently installed
#[derive(Debug, Default)]
pub struct PassiveGrabs {
    root_keys_grabbed: bool,
    /// Windows with their per-window key bindings grabbed
    window_keys: HashSet<WindowId>,
    /// Window holding an active keyboard grab for a grab op
    all_keys: Option<WindowId>,
    /// Modifier mask the window button grabs were made with
    window_buttons: HashMap<WindowId, Modifiers>,
    focus_click: HashSet<WindowId>,
}

impl PassiveGrabs {
    /// Create a new, empty grab record
    pub fn new() -> Self {
        Self::default()
    }

    /// The window is gone, so are its grabs
    pub fn forget_window(&mut self, window: WindowId) {
        self.window_keys.remove(&window);
        self.window_buttons.remove(&window);
        self.focus_click.remove(&window);
        if self.all_keys == Some(window) {
            self.all_keys = None;
        }
    }

    pub fn has_window_keys(&self, window: WindowId) -> bool {
        self.window_keys.contains(&window)
    }

    pub fn has_focus_click(&self, window: WindowId) -> bool {
        self.focus_click.contains(&window)
    }

    pub fn has_window_buttons(&self, window: WindowId) -> bool {
        self.window_buttons.contains_key(&window)
    }
}

impl Display {
    fn change_keygrab(&mut self, target: GrabTarget, combo: &ResolvedKeyCombo, grab: bool) {
        let expanded = expand_modifiers(combo.mask, self.resolver.ignored_modifier_mask());
        for &keycode in &combo.keycodes {
            debug!(
                "{} keybinding keycode {} mask {:?} on {:?}",
                if grab { "Grabbing" } else { "Ungrabbing" },
                keycode,
                combo.mask,
                target
            );
            for &mods in &expanded {
                let result = if grab {
                    self.backend.grab_key(target, keycode, GrabModifiers::Exactly(mods))
                } else {
                    self.backend.ungrab_key(target, keycode, GrabModifiers::Exactly(mods))
                };
                if let Err(e) = result {
                    warn!("Failed to change key grab on {:?}: {:#}", target, e);
                }
            }
        }
    }

    /// Resolved combos of the bindings grabbed on root (`per_window`
    /// false) or on client windows
    fn binding_combos(&self, per_window: bool) -> Vec<ResolvedKeyCombo> {
        self.keys
            .bindings()
            .filter(|b| b.flags.contains(KeyBindingFlags::PER_WINDOW) == per_window)
            .filter(|b| !b.flags.contains(KeyBindingFlags::NO_AUTO_GRAB))
            .filter(|b| !b.resolved.is_empty())
            .map(|b| b.resolved.clone())
            .collect()
    }

    fn change_root_keygrabs(&mut self, grab: bool) {
        let mut combos = Vec::new();
        if !self.keys.overlay_combo.is_empty() {
            combos.push(self.keys.overlay_combo.clone());
        }
        if self.prefs.locate_pointer_enabled() && !self.keys.locate_pointer_combo.is_empty() {
            combos.push(self.keys.locate_pointer_combo.clone());
        }
        combos.extend(self.keys.iso_next_group_combos.iter().cloned());
        combos.extend(self.binding_combos(false));

        for combo in &combos {
            self.change_keygrab(GrabTarget::Root, combo, grab);
        }
    }

    pub(crate) fn grab_root_combo(&mut self, combo: &ResolvedKeyCombo) {
        if self.passive_grabs.root_keys_grabbed {
            self.change_keygrab(GrabTarget::Root, combo, true);
        }
    }

    pub(crate) fn ungrab_root_combo(&mut self, combo: &ResolvedKeyCombo) {
        if self.passive_grabs.root_keys_grabbed {
            self.change_keygrab(GrabTarget::Root, combo, false);
        }
    }

    /// Grab per-window bindings on a client window. Docks and
    /// override-redirect windows get none.
    pub fn grab_window_keys(&mut self, window: WindowId) {
        if self.passive_grabs.all_keys == Some(window) {
            return;
        }
        let Some(client) = self.windows.get(window) else {
            return;
        };

        if client.window_type == WindowType::Dock || client.is_override_redirect() {
            self.ungrab_window_keys(window);
            return;
        }
        if self.passive_grabs.window_keys.contains(&window) {
            return;
        }

        for combo in self.binding_combos(true) {
            self.change_keygrab(GrabTarget::Window(window), &combo, true);
        }
        self.passive_grabs.window_keys.insert(window);
    }

    pub fn ungrab_window_keys(&mut self, window: WindowId) {
        if !self.passive_grabs.window_keys.remove(&window) {
            return;
        }
        for combo in self.binding_combos(true) {
            self.change_keygrab(GrabTarget::Window(window), &combo, false);
        }
    }

    /// Root grabs plus per-window grabs on every managed window
    pub fn grab_key_bindings(&mut self) {
        if !self.passive_grabs.root_keys_grabbed {
            self.change_root_keygrabs(true);
            self.passive_grabs.root_keys_grabbed = true;
        }
        for window in self.windows.ids() {
            self.grab_window_keys(window);
        }
    }

    pub fn ungrab_key_bindings(&mut self) {
        if self.passive_grabs.root_keys_grabbed {
            self.change_root_keygrabs(false);
            self.passive_grabs.root_keys_grabbed = false;
        }
        for window in self.windows.ids() {
            self.ungrab_window_keys(window);
        }
    }

    /// Focus `window` and grab the whole keyboard for it
    pub fn grab_all_keys(&mut self, window: WindowId, time: u32) -> anyhow::Result<bool> {
        if self.passive_grabs.all_keys.is_some() {
            return Ok(false);
        }
        self.ungrab_window_keys(window);
        self.set_focus(Some(window), time);

        let grabbed = self.backend.grab_keyboard(window, time)?;
        if grabbed {
            debug!("Grabbed all keys on {}", window);
            self.passive_grabs.all_keys = Some(window);
        } else {
            // Put the normal grabs back
            self.grab_window_keys(window);
        }
        Ok(grabbed)
    }

    /// Release the keyboard grab and reinstall the window's bindings
    pub fn ungrab_all_keys(&mut self, window: WindowId, time: u32) {
        if self.passive_grabs.all_keys != Some(window) {
            return;
        }
        if let Err(e) = self.backend.ungrab_keyboard(time) {
            warn!("Failed to ungrab keyboard: {:#}", e);
        }
        self.passive_grabs.all_keys = None;
        self.grab_window_keys(window);
    }

    fn change_buttons_grab(&mut self, window: WindowId, grab: bool, sync: bool, modifiers: GrabModifiers) {
        for button in 1..=MAX_BUTTON {
            self.change_button_grab(window, grab, sync, button, modifiers);
        }
    }

    fn change_button_grab(&mut self, window: WindowId, grab: bool, sync: bool, button: u8, modifiers: GrabModifiers) {
        let variants: Vec<GrabModifiers> = match modifiers {
            GrabModifiers::Any => vec![GrabModifiers::Any],
            GrabModifiers::Exactly(mask) => expand_modifiers(mask, self.resolver.ignored_modifier_mask())
                .into_iter()
                .map(GrabModifiers::Exactly)
                .collect(),
        };
        for mods in variants {
            let result = if grab {
                self.backend.grab_button(window, button, mods, sync)
            } else {
                self.backend.ungrab_button(window, button, mods)
            };
            if let Err(e) = result {
                warn!("Failed to change button grab on {}: {:#}", window, e);
            }
        }
    }

    /// Modifier+button grabs for moving and resizing a focused window
    pub fn grab_window_buttons(&mut self, window: WindowId) {
        let mask = self.resolver.devirtualize_modifiers(self.prefs.mouse_button_mods());
        if mask.is_empty() || self.passive_grabs.window_buttons.contains_key(&window) {
            return;
        }
        debug!("Grabbing window buttons for {}", window);
        self.change_buttons_grab(window, true, false, GrabModifiers::Exactly(mask));
        // Modifier+Shift+button1 too
        self.change_button_grab(window, true, false, 1, GrabModifiers::Exactly(mask | Modifiers::SHIFT));
        self.passive_grabs.window_buttons.insert(window, mask);
    }

    pub fn ungrab_window_buttons(&mut self, window: WindowId) {
        let Some(mask) = self.passive_grabs.window_buttons.remove(&window) else {
            return;
        };
        self.change_buttons_grab(window, false, false, GrabModifiers::Exactly(mask));
        self.change_button_grab(window, false, false, 1, GrabModifiers::Exactly(mask | Modifiers::SHIFT));
    }

    /// Synchronous any-modifier grab that lets a click focus an unfocused
    /// window
    pub fn grab_focus_window_button(&mut self, window: WindowId) {
        if !self.passive_grabs.focus_click.insert(window) {
            return;
        }
        debug!("Grabbing unfocused window buttons for {}", window);
        self.change_buttons_grab(window, true, true, GrabModifiers::Any);
    }

    pub fn ungrab_focus_window_button(&mut self, window: WindowId) {
        if !self.passive_grabs.focus_click.remove(&window) {
            return;
        }
        self.change_buttons_grab(window, false, false, GrabModifiers::Any);
    }

    /// The mouse button modifier changed
    pub(crate) fn regrab_window_buttons(&mut self) {
        let windows: Vec<WindowId> = self.passive_grabs.window_buttons.keys().copied().collect();
        for window in windows {
            self.ungrab_window_buttons(window);
            self.grab_window_buttons(window);
        }
    }
}

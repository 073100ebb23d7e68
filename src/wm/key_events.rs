//! Key Events Module
//!
//! Key dispatch outside window ops: the overlay and locate-pointer tap
//! detection, the layout switch combos and the binding lookup itself.

use tracing::{debug, trace, warn};

use crate::wm::backend::{EventMode, FrozenDevice};
use crate::wm::client::WindowId;
use crate::wm::display::Display;
use crate::wm::events::{EventFlags, EventKind, InputEvent};
use crate::wm::keybindings::{BindingId, KeyBindingFlags};
use crate::wm::keyboard::ResolvedKeyCombo;
use crate::wm::keymap::Modifiers;
use crate::wm::keysyms::KEY_ISO_NEXT_GROUP;

/// State bits a lone modifier tap may carry
const TAP_IGNORED_MODIFIERS: Modifiers = Modifiers::LOCK
    .union(Modifiers::MOD2)
    .union(Modifiers::BUTTON1)
    .union(Modifiers::BUTTON2)
    .union(Modifiers::BUTTON3)
    .union(Modifiers::BUTTON4)
    .union(Modifiers::BUTTON5);

/// Modifier keys whose lone tap triggers an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialKey {
    Overlay,
    LocatePointer,
}

impl Display {
    /// Offer an event to the key binding machinery. Returns whether it
    /// was consumed.
    pub(crate) fn process_keybindings(&mut self, window: Option<WindowId>, event: &InputEvent) -> bool {
        match event.kind {
            EventKind::ButtonPress { .. }
            | EventKind::ButtonRelease { .. }
            | EventKind::TouchBegin { .. }
            | EventKind::TouchEnd { .. }
            | EventKind::Scroll => {
                self.keys.overlay_key_only_pressed = false;
                self.keys.locate_pointer_key_only_pressed = false;
                false
            }
            EventKind::KeyPress { .. } | EventKind::KeyRelease { .. } => self.process_key_event(window, event),
            _ => false,
        }
    }

    fn process_key_event(&mut self, window: Option<WindowId>, event: &InputEvent) -> bool {
        if self.process_overlay_key(window, event) {
            return true;
        }

        // Locate pointer never swallows the key
        if self.process_special_modifier_key(SpecialKey::LocatePointer, window, event) {
            return false;
        }

        if self.process_iso_next_group(event) {
            return true;
        }

        self.compositor.handle_event(event, window, EventMode::Thaw);
        self.process_event(window, event)
    }

    fn process_overlay_key(&mut self, window: Option<WindowId>, event: &InputEvent) -> bool {
        if !self.keys.overlay_key_only_pressed && self.focus_inhibits_shortcuts(event) {
            return false;
        }
        self.process_special_modifier_key(SpecialKey::Overlay, window, event)
    }

    fn focus_inhibits_shortcuts(&self, event: &InputEvent) -> bool {
        self.focus_window
            .and_then(|id| self.windows.get(id))
            .is_some_and(|focus| focus.shortcuts_inhibited(event.source_device))
    }

    fn special_key_state(&mut self, key: SpecialKey) -> (&mut bool, ResolvedKeyCombo) {
        match key {
            SpecialKey::Overlay => (
                &mut self.keys.overlay_key_only_pressed,
                self.keys.overlay_combo.clone(),
            ),
            SpecialKey::LocatePointer => (
                &mut self.keys.locate_pointer_key_only_pressed,
                self.keys.locate_pointer_combo.clone(),
            ),
        }
    }

    /// Tap detection for a lone modifier key.
    ///
    /// A press of the key with no other modifiers held arms it and keeps
    /// the keyboard frozen. Its release triggers the action. Any other key
    /// in between disarms it and is dispatched as a normal chord, or
    /// replayed to the client when nothing is bound to it.
    fn process_special_modifier_key(&mut self, key: SpecialKey, window: Option<WindowId>, event: &InputEvent) -> bool {
        let Some(keycode) = event.keycode() else {
            return false;
        };
        let is_release = matches!(event.kind, EventKind::KeyRelease { .. });
        let (only_pressed, combo) = self.special_key_state(key);

        if *only_pressed {
            if !combo.has_keycode(keycode) {
                *only_pressed = false;
                trace!("{:?} key combined with keycode {}", key, keycode);

                if !self.process_event(window, event) {
                    self.compositor.handle_event(event, window, EventMode::Replay);
                    return false;
                }
            } else if is_release {
                *only_pressed = false;

                let binding = self.keys.lookup(&combo);
                let filtered = binding
                    .and_then(|id| self.keys.get(id))
                    .is_some_and(|binding| self.compositor.filter_keybinding(binding));
                if binding.is_none() || !filtered {
                    self.trigger_special_key(key);
                }
            }

            self.compositor.handle_event(event, window, EventMode::Thaw);
            return true;
        }

        let held = event.modifiers - TAP_IGNORED_MODIFIERS;
        if !is_release && held.is_empty() && combo.has_keycode(keycode) {
            *only_pressed = true;
            trace!("{:?} key pressed alone, waiting for its release", key);
            self.compositor.handle_event(event, window, EventMode::KeepFrozen);
        }

        false
    }

    fn trigger_special_key(&mut self, key: SpecialKey) {
        match key {
            SpecialKey::Overlay => self.overlay_key_activate(),
            SpecialKey::LocatePointer => {
                debug!("Locate pointer key tapped");
                self.compositor.locate_pointer();
            }
        }
    }

    fn process_iso_next_group(&mut self, event: &InputEvent) -> bool {
        let EventKind::KeyPress { keysym, .. } = event.kind else {
            return false;
        };
        if keysym != KEY_ISO_NEXT_GROUP {
            return false;
        }

        let mask = self.resolver.mask_from_event(event.modifiers);
        if !self.keys.iso_next_group_combos.iter().any(|combo| combo.mask == mask) {
            return false;
        }

        // A handler that returns true keeps the keyboard frozen and thaws
        // it itself
        if !self.compositor.modifiers_accelerator_activate() {
            if let Err(e) = self.backend.allow_events(FrozenDevice::Keyboard, EventMode::Thaw, event.time) {
                warn!("Failed to unfreeze the keyboard: {:#}", e);
            }
        }
        true
    }

    /// Run the binding matching a key event, if any
    fn process_event(&mut self, window: Option<WindowId>, event: &InputEvent) -> bool {
        let Some(keycode) = event.keycode() else {
            return false;
        };
        let mask = self.resolver.mask_from_event(event.modifiers);
        let Some(id) = self.keys.lookup(&ResolvedKeyCombo::single(keycode, mask)) else {
            trace!("No binding for keycode {} mask {:?}", keycode, mask);
            return false;
        };
        let Some(binding) = self.keys.get(id) else {
            return false;
        };

        if window.is_none() && binding.flags.contains(KeyBindingFlags::PER_WINDOW) {
            return false;
        }
        if binding.flags.contains(KeyBindingFlags::CUSTOM_TRIGGER) {
            return false;
        }
        if !binding.flags.contains(KeyBindingFlags::NON_MASKABLE) && self.focus_inhibits_shortcuts(event) {
            debug!("Focus window inhibits shortcuts, skipping \"{}\"", binding.name);
            return false;
        }
        if self.compositor.filter_keybinding(binding) {
            debug!("Compositor filtered binding \"{}\"", binding.name);
            return false;
        }

        if event.flags.contains(EventFlags::REPEATED) && binding.flags.contains(KeyBindingFlags::IGNORE_AUTOREPEAT) {
            debug!("Ignore autorepeat for handler {}", binding.name);
            return true;
        }

        if matches!(event.kind, EventKind::KeyRelease { .. }) {
            if !binding.release_pending {
                trace!("Ignore release for handler {}", binding.name);
                return false;
            }
            debug!("Running release handler for {}", binding.name);
            self.invoke_handler(id, window, event);
            if let Some(binding) = self.keys.get_mut(id) {
                binding.release_pending = false;
            }
            return true;
        }

        debug!("Running handler for {}", binding.name);
        self.invoke_handler(id, window, event);
        if let Some(binding) = self.keys.get_mut(id) {
            if !binding.release_pending && binding.flags.contains(KeyBindingFlags::TRIGGER_RELEASE) {
                binding.release_pending = true;
            }
        }
        true
    }

    /// Call a binding's handler. The table may be rebuilt by the handler,
    /// so it runs on a snapshot of the binding.
    fn invoke_handler(&mut self, id: BindingId, window: Option<WindowId>, event: &InputEvent) {
        let Some(binding) = self.keys.get(id).cloned() else {
            return;
        };
        let handler = binding.handler.clone();
        let window = window.filter(|_| handler.flags.contains(KeyBindingFlags::PER_WINDOW));
        (handler.func)(self, window, event, &binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::events::EventResult;
    use crate::wm::keybindings::{KeyBindingAction, KeyHandlerFn};
    use crate::wm::keysyms::{KEY_SUPER_L, KEY_SUPER_R};
    use crate::wm::testing::{self, BackendCall, CompositorCall};
    use std::cell::RefCell;
    use std::rc::Rc;

    const SUPER_L: u32 = 133;
    const SUPER_R: u32 = 134;

    fn count_overlay(display: &mut Display) -> Rc<RefCell<u32>> {
        let taps = Rc::new(RefCell::new(0));
        let sink = taps.clone();
        display.overlay_key.connect(move |_| *sink.borrow_mut() += 1);
        taps
    }

    fn counting_handler(display: &mut Display, name: &str, accelerator: &str, flags: KeyBindingFlags) -> Rc<RefCell<Vec<Option<WindowId>>>> {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = hits.clone();
        let func: KeyHandlerFn = Rc::new(move |_, window, _, _| sink.borrow_mut().push(window));
        display
            .add_keybinding(name, &[accelerator.to_string()], flags, func)
            .unwrap();
        hits
    }

    #[test]
    fn test_overlay_tap_fires_once() {
        let (mut display, _backend, compositor) = testing::display();
        let taps = count_overlay(&mut display);

        let press = InputEvent::key_press(SUPER_L, KEY_SUPER_L, Modifiers::empty(), 10);
        assert_eq!(display.handle_event(&press), EventResult::Propagate);
        assert!(display.keys.overlay_key_only_pressed);
        assert!(compositor.calls().contains(&CompositorCall::HandleEvent(None, EventMode::KeepFrozen)));

        let release = InputEvent::key_release(SUPER_L, KEY_SUPER_L, Modifiers::MOD4, 11);
        assert_eq!(display.handle_event(&release), EventResult::Stop);
        assert_eq!(*taps.borrow(), 1);
        assert!(!display.keys.overlay_key_only_pressed);

        // A second release without a press does nothing
        display.handle_event(&release);
        assert_eq!(*taps.borrow(), 1);
    }

    #[test]
    fn test_right_super_also_taps() {
        let (mut display, _backend, _compositor) = testing::display();
        let taps = count_overlay(&mut display);
        display.handle_event(&InputEvent::key_press(SUPER_R, KEY_SUPER_R, Modifiers::empty(), 10));
        display.handle_event(&InputEvent::key_release(SUPER_R, KEY_SUPER_R, Modifiers::MOD4, 11));
        assert_eq!(*taps.borrow(), 1);
    }

    #[test]
    fn test_overlay_chord_dispatches_binding_instead() {
        let (mut display, _backend, _compositor) = testing::display();
        let taps = count_overlay(&mut display);
        let switched = Rc::new(RefCell::new(Vec::new()));
        let sink = switched.clone();
        display.workspace_switched.connect(move |w| sink.borrow_mut().push(*w));

        display.handle_event(&InputEvent::key_press(SUPER_L, KEY_SUPER_L, Modifiers::empty(), 10));
        // <Super>2 is switch-to-workspace-2; '2' is keycode 11
        let chord = InputEvent::key_press(11, '2' as u32, Modifiers::MOD4, 11);
        assert_eq!(display.handle_event(&chord), EventResult::Stop);
        display.handle_event(&InputEvent::key_release(11, '2' as u32, Modifiers::MOD4, 12));
        display.handle_event(&InputEvent::key_release(SUPER_L, KEY_SUPER_L, Modifiers::MOD4, 13));

        assert_eq!(*taps.borrow(), 0);
        assert_eq!(*switched.borrow(), vec![1]);
    }

    #[test]
    fn test_overlay_chord_without_binding_is_replayed() {
        let (mut display, _backend, compositor) = testing::display();
        let window = testing::manage(&mut display, 1);
        display.set_focus(Some(window), 5);
        let taps = count_overlay(&mut display);

        display.handle_event(&InputEvent::key_press(SUPER_L, KEY_SUPER_L, Modifiers::empty(), 10));
        let chord = InputEvent::key_press(38, 'a' as u32, Modifiers::MOD4, 11);
        display.handle_event(&chord);
        assert!(compositor.calls().contains(&CompositorCall::HandleEvent(Some(window), EventMode::Replay)));
        assert!(!display.keys.overlay_key_only_pressed);

        display.handle_event(&InputEvent::key_release(SUPER_L, KEY_SUPER_L, Modifiers::MOD4, 12));
        assert_eq!(*taps.borrow(), 0);
    }

    #[test]
    fn test_click_while_overlay_held_cancels_tap() {
        let (mut display, _backend, _compositor) = testing::display();
        let taps = count_overlay(&mut display);
        display.handle_event(&InputEvent::key_press(SUPER_L, KEY_SUPER_L, Modifiers::empty(), 10));
        display.handle_event(&InputEvent::button_press(1, None, 5, 5, 11));
        display.handle_event(&InputEvent::key_release(SUPER_L, KEY_SUPER_L, Modifiers::MOD4, 12));
        assert_eq!(*taps.borrow(), 0);
    }

    #[test]
    fn test_overlay_with_other_modifier_held_does_not_arm() {
        let (mut display, _backend, _compositor) = testing::display();
        let taps = count_overlay(&mut display);
        display.handle_event(&InputEvent::key_press(SUPER_L, KEY_SUPER_L, Modifiers::CONTROL, 10));
        assert!(!display.keys.overlay_key_only_pressed);
        display.handle_event(&InputEvent::key_press(SUPER_L, KEY_SUPER_L, Modifiers::MOD2 | Modifiers::LOCK, 11));
        assert!(display.keys.overlay_key_only_pressed);
        display.handle_event(&InputEvent::key_release(SUPER_L, KEY_SUPER_L, Modifiers::MOD4, 12));
        assert_eq!(*taps.borrow(), 1);
    }

    #[test]
    fn test_inhibited_focus_blocks_overlay_and_maskable_bindings() {
        let (mut display, _backend, _compositor) = testing::display();
        let window = testing::manage(&mut display, 1);
        display.set_focus(Some(window), 5);
        let taps = count_overlay(&mut display);
        let plain = counting_handler(&mut display, "plain", "<Control>F1", KeyBindingFlags::empty());
        let always = counting_handler(&mut display, "always", "<Control>F2", KeyBindingFlags::NON_MASKABLE);

        let keyboard = crate::wm::device::DeviceId::CORE_KEYBOARD;
        display.windows.get_mut(window).unwrap().shortcuts_inhibited.insert(keyboard);

        display.handle_event(&InputEvent::key_press(SUPER_L, KEY_SUPER_L, Modifiers::empty(), 10));
        display.handle_event(&InputEvent::key_release(SUPER_L, KEY_SUPER_L, Modifiers::MOD4, 11));
        assert_eq!(*taps.borrow(), 0);

        // F1 is 67, F2 is 68
        assert_eq!(
            display.handle_event(&InputEvent::key_press(67, 0xffbe, Modifiers::CONTROL, 12)),
            EventResult::Propagate
        );
        assert_eq!(
            display.handle_event(&InputEvent::key_press(68, 0xffbf, Modifiers::CONTROL, 13)),
            EventResult::Stop
        );
        assert!(plain.borrow().is_empty());
        assert_eq!(always.borrow().len(), 1);
    }

    #[test]
    fn test_per_window_binding_gets_window_and_needs_one() {
        let (mut display, _backend, _compositor) = testing::display();
        let hits = counting_handler(&mut display, "close", "<Alt>F4", KeyBindingFlags::PER_WINDOW);
        let global = counting_handler(&mut display, "run", "<Alt>F2", KeyBindingFlags::empty());

        let f4 = InputEvent::key_press(70, 0xffc1, Modifiers::MOD1, 10);
        assert_eq!(display.handle_event(&f4), EventResult::Propagate);
        assert!(hits.borrow().is_empty());

        let window = testing::manage(&mut display, 1);
        display.set_focus(Some(window), 11);
        assert_eq!(display.handle_event(&f4), EventResult::Stop);
        assert_eq!(*hits.borrow(), vec![Some(window)]);

        // Global handlers never see the window
        display.handle_event(&InputEvent::key_press(68, 0xffbf, Modifiers::MOD1, 12));
        assert_eq!(*global.borrow(), vec![None]);
    }

    #[test]
    fn test_autorepeat_and_release_handling() {
        let (mut display, _backend, _compositor) = testing::display();
        let once = counting_handler(
            &mut display,
            "once",
            "<Control>F1",
            KeyBindingFlags::IGNORE_AUTOREPEAT,
        );
        let both = counting_handler(
            &mut display,
            "both",
            "<Control>F2",
            KeyBindingFlags::TRIGGER_RELEASE,
        );

        display.handle_event(&InputEvent::key_press(67, 0xffbe, Modifiers::CONTROL, 10));
        let repeat = InputEvent::key_press(67, 0xffbe, Modifiers::CONTROL, 11).with_flags(EventFlags::REPEATED);
        assert_eq!(display.handle_event(&repeat), EventResult::Stop);
        assert_eq!(once.borrow().len(), 1);

        // Release without a pending release handler goes to the client
        assert_eq!(
            display.handle_event(&InputEvent::key_release(67, 0xffbe, Modifiers::CONTROL, 12)),
            EventResult::Propagate
        );

        display.handle_event(&InputEvent::key_press(68, 0xffbf, Modifiers::CONTROL, 13));
        display.handle_event(&InputEvent::key_press(68, 0xffbf, Modifiers::CONTROL, 14));
        assert_eq!(
            display.handle_event(&InputEvent::key_release(68, 0xffbf, Modifiers::CONTROL, 15)),
            EventResult::Stop
        );
        assert_eq!(both.borrow().len(), 3);
        assert_eq!(
            display.handle_event(&InputEvent::key_release(68, 0xffbf, Modifiers::CONTROL, 16)),
            EventResult::Propagate
        );
    }

    #[test]
    fn test_custom_trigger_and_filtered_bindings_are_skipped() {
        let (mut display, _backend, compositor) = testing::display();
        let custom = counting_handler(&mut display, "custom", "<Control>F1", KeyBindingFlags::CUSTOM_TRIGGER);
        let filtered = counting_handler(&mut display, "filtered", "<Control>F2", KeyBindingFlags::empty());
        compositor.set_filter(Some("filtered".to_string()));

        display.handle_event(&InputEvent::key_press(67, 0xffbe, Modifiers::CONTROL, 10));
        display.handle_event(&InputEvent::key_press(68, 0xffbf, Modifiers::CONTROL, 11));
        assert!(custom.borrow().is_empty());
        assert!(filtered.borrow().is_empty());
    }

    #[test]
    fn test_ignored_modifiers_do_not_change_lookup() {
        let (mut display, _backend, _compositor) = testing::display();
        let hits = counting_handler(&mut display, "run", "<Alt>F2", KeyBindingFlags::empty());
        let event = InputEvent::key_press(68, 0xffbf, Modifiers::MOD1 | Modifiers::MOD2 | Modifiers::LOCK, 10);
        assert_eq!(display.handle_event(&event), EventResult::Stop);
        assert_eq!(hits.borrow().len(), 1);
    }

    #[test]
    fn test_locate_pointer_tap_does_not_consume() {
        let mut config = crate::config::Config::default();
        config.behavior.locate_pointer = true;
        let (mut display, _backend, compositor) = testing::display_with_config(&config);

        // Control_L is 37
        let press = InputEvent::key_press(37, 0xffe3, Modifiers::empty(), 10);
        assert_eq!(display.handle_event(&press), EventResult::Propagate);
        let release = InputEvent::key_release(37, 0xffe3, Modifiers::CONTROL, 11);
        assert_eq!(display.handle_event(&release), EventResult::Propagate);
        assert_eq!(
            compositor.calls().iter().filter(|c| **c == CompositorCall::LocatePointer).count(),
            1
        );
    }

    #[test]
    fn test_iso_next_group_thaws_keyboard() {
        let mut config = crate::config::Config::default();
        config.behavior.iso_next_group = Some("shifts_toggle".to_string());
        // Shift_L types ISO_Next_Group with Shift held
        let mut layout = crate::wm::keymap::Layout::us();
        layout.set_key(50, &[crate::wm::keysyms::KEY_SHIFT_L, KEY_ISO_NEXT_GROUP]);
        let mut keymap = crate::wm::keymap::Keymap::new(vec![layout]);
        keymap.set_modifier("Super", Modifiers::MOD4);
        let (mut display, backend, compositor) = testing::display_with(&config, keymap);
        assert_eq!(display.keys.iso_next_group_combos.len(), 1);
        let keycode = display.keys.iso_next_group_combos[0].keycodes[0];

        let press = InputEvent::key_press(keycode, KEY_ISO_NEXT_GROUP, Modifiers::SHIFT, 10);
        assert_eq!(display.handle_event(&press), EventResult::Stop);
        assert!(compositor.calls().contains(&CompositorCall::ModifiersAcceleratorActivate));
        assert!(backend
            .calls()
            .contains(&BackendCall::AllowEvents(FrozenDevice::Keyboard, EventMode::Thaw)));

        // Other masks are left alone
        let press = InputEvent::key_press(keycode, KEY_ISO_NEXT_GROUP, Modifiers::CONTROL, 11);
        assert_eq!(display.handle_event(&press), EventResult::Propagate);
    }

    #[test]
    fn test_handler_may_rebuild_table() {
        let (mut display, _backend, _compositor) = testing::display();
        let func: KeyHandlerFn = Rc::new(|display, _, _, _| display.rebuild_keybindings());
        display
            .add_keybinding("rebuild", &["<Control>F1".to_string()], KeyBindingFlags::TRIGGER_RELEASE, func)
            .unwrap();
        let event = InputEvent::key_press(67, 0xffbe, Modifiers::CONTROL, 10);
        assert_eq!(display.handle_event(&event), EventResult::Stop);
        assert_ne!(display.get_keybinding_action(67, Modifiers::CONTROL), KeyBindingAction::NONE);
    }
}

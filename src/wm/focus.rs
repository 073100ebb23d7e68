//! Focus Module
//!
//! Input focus, the button grabs that follow it, and clicks on windows
//! outside any grab: click to focus, raise on click, and modifier+button
//! move and resize.

use tracing::{debug, warn};

use crate::wm::client::WindowId;
use crate::wm::client_flags::WindowType;
use crate::wm::display::Display;
use crate::wm::events::{EventKind, InputEvent};
use crate::wm::grab::{GrabInput, GrabOp};
use crate::wm::moveresize;

/// Button that moves a window with the mouse modifier held
pub const MOUSE_BUTTON_MOVE: u8 = 1;

/// Button that resizes a window with the mouse modifier held
pub const MOUSE_BUTTON_RESIZE: u8 = 2;

impl Display {
    /// Give `window` input focus. Unfocused windows keep a focus-click
    /// grab; the focused one gets the modifier+button grabs instead.
    pub fn set_focus(&mut self, window: Option<WindowId>, time: u32) {
        if window == self.focus_window {
            return;
        }
        let old_focus = self.focus_window;
        debug!("Focus {:?} -> {:?} at {}", old_focus, window, time);

        if let Err(e) = self.backend.set_input_focus(window, time) {
            warn!("Failed to set input focus: {:#}", e);
        }
        self.focus_window = window;

        if let Some(old) = old_focus.filter(|&w| self.windows.contains(w)) {
            self.ungrab_window_buttons(old);
            self.grab_focus_window_button(old);
        }
        if let Some(new) = window {
            self.ungrab_focus_window_button(new);
            self.grab_window_buttons(new);
        }
    }

    /// Focus the topmost suitable window on the active workspace
    pub fn focus_default_window(&mut self, not_this_one: Option<WindowId>, time: u32) {
        let workspace = self.windows.active_workspace;
        let window = self
            .stack
            .get_default_focus_window(&mut self.windows, workspace, not_this_one);
        debug!("Default focus on workspace {} is {:?}", workspace, window);
        self.set_focus(window, time);
    }

    /// A button press on a window outside any grab. Returns whether the
    /// press started a window operation and must not reach the client.
    pub(crate) fn handle_ungrabbed_event(&mut self, window: WindowId, event: &InputEvent) -> bool {
        let button = match event.kind {
            EventKind::ButtonPress { button } => button,
            EventKind::TouchBegin { sequence } => {
                if !self.router.is_pointer_emulating_sequence(sequence) {
                    return false;
                }
                1
            }
            _ => return false,
        };

        let Some(client) = self.windows.get(window) else {
            return false;
        };
        if client.is_override_redirect() {
            return false;
        }

        // Panels must request focus themselves
        if client.window_type != WindowType::Dock {
            debug!("Focusing {} due to button {} press", window, button);
            self.set_focus(Some(window), event.time);
        }

        let grab_mods = self.resolver.devirtualize_modifiers(self.prefs.mouse_button_mods());
        let event_mods = event.modifiers.real();
        let unmodified = grab_mods.is_empty() || !event_mods.intersects(grab_mods);
        let grab_allowed = self
            .focus_window
            .and_then(|f| self.windows.get(f))
            .is_none_or(|f| !f.shortcuts_inhibited(event.source_device));
        let is_window_grab = grab_allowed && !grab_mods.is_empty() && event_mods.contains(grab_mods);

        if unmodified {
            if self.prefs.raise_on_click {
                self.raise_window(window);
            } else {
                debug!("Not raising window on click due to don't-raise-on-click option");
            }
            return false;
        }
        if !is_window_grab {
            return false;
        }

        let op = match button {
            MOUSE_BUTTON_RESIZE => {
                let geometry = self.windows.get(window).map(|c| c.geometry).unwrap_or_default();
                match moveresize::direction_for_point(geometry, event.x, event.y) {
                    Some(direction) => GrabOp::Resizing(direction, GrabInput::Pointer),
                    None => return false,
                }
            }
            MOUSE_BUTTON_MOVE => GrabOp::Moving(GrabInput::Pointer),
            _ => return false,
        };

        match self.begin_grab_op(window, op, event.device, button, (event.x, event.y), event.time) {
            Ok(()) => true,
            Err(e) => {
                debug!("Not starting {:?} on {}: {}", op, window, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::backend::{EventMode, FrozenDevice};
    use crate::wm::events::EventResult;
    use crate::wm::grab::ResizeDirection;
    use crate::wm::keymap::Modifiers;
    use crate::wm::testing::{self, BackendCall, CompositorCall};

    #[test]
    fn test_click_focuses_raises_and_replays() {
        let (mut display, backend, compositor) = testing::display();
        let w1 = testing::manage(&mut display, 1);
        let w2 = testing::manage(&mut display, 2);

        let press = InputEvent::button_press(1, Some(w1), 15, 15, 40);
        assert_eq!(display.handle_event(&press), EventResult::Propagate);
        assert_eq!(display.focus_window, Some(w1));
        assert_eq!(display.stack.top(&mut display.windows), Some(w1));
        assert_eq!(display.windows.get(w1).unwrap().user_time, Some(40));
        assert!(compositor.calls().contains(&CompositorCall::HandleEvent(Some(w1), EventMode::Replay)));
        assert!(backend.calls().contains(&BackendCall::AllowEvents(FrozenDevice::Pointer, EventMode::Replay)));
        assert_ne!(display.focus_window, Some(w2));
    }

    #[test]
    fn test_modifier_click_starts_move_and_resize() {
        let (mut display, _backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        let g = display.windows.get(w).unwrap().geometry;

        let press = InputEvent::button_press(1, Some(w), g.x + 5, g.y + 5, 10).with_modifiers(Modifiers::MOD4);
        assert_eq!(display.handle_event(&press), EventResult::Stop);
        assert_eq!(display.grab.op(), Some(GrabOp::Moving(GrabInput::Pointer)));
        display.end_grab_op(11);

        let press = InputEvent::button_press(2, Some(w), g.right() - 2, g.bottom() - 2, 12)
            .with_modifiers(Modifiers::MOD4 | Modifiers::MOD2);
        assert_eq!(display.handle_event(&press), EventResult::Stop);
        assert_eq!(
            display.grab.op(),
            Some(GrabOp::Resizing(ResizeDirection::SouthEast, GrabInput::Pointer))
        );
    }

    #[test]
    fn test_dock_click_does_not_focus() {
        let (mut display, _backend, _compositor) = testing::display();
        let dock = display.manage_window(crate::wm::client::Client::new(
            WindowId(5),
            WindowType::Dock,
            crate::shared::Geometry::new(0, 0, 1920, 30),
        ));
        display.handle_event(&InputEvent::button_press(1, Some(dock), 3, 3, 10));
        assert_eq!(display.focus_window, None);
    }
}

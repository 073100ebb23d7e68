//! Compositor Module
//!
//! Hooks the core calls into the compositing and shell layer. Every hook
//! has a neutral default so a backend-only setup can run without one.

use crate::wm::backend::EventMode;
use crate::wm::client::WindowId;
use crate::wm::events::InputEvent;
use crate::wm::keybindings::KeyBinding;

pub trait Compositor {
    /// Input captured by a compositor-side grab. `true` consumes it.
    fn process_captured_input(&mut self, _event: &InputEvent) -> bool {
        false
    }

    /// Accessibility listeners for key events. `true` consumes the event.
    fn notify_a11y(&mut self, _event: &InputEvent) -> bool {
        false
    }

    /// Touch gesture tracker. `true` absorbs the event.
    fn gesture_tracker_handle(&mut self, _event: &InputEvent) -> bool {
        false
    }

    /// Pad button, ring and strip events, plus device hotplug.
    /// `true` consumes the event.
    fn pad_mapper_handle(&mut self, _event: &InputEvent) -> bool {
        false
    }

    /// Tablet tool buttons. `true` consumes the event.
    fn tool_mapper_handle(&mut self, _event: &InputEvent) -> bool {
        false
    }

    /// Shell filter for bindings; `true` makes the binding act as unbound
    fn filter_keybinding(&mut self, _binding: &KeyBinding) -> bool {
        false
    }

    /// An event that reached the end of routing
    fn handle_event(&mut self, _event: &InputEvent, _window: Option<WindowId>, _mode: EventMode) {}

    /// Layout switch shortcut. `true` means the keyboard stays frozen and
    /// the compositor will release it.
    fn modifiers_accelerator_activate(&mut self) -> bool {
        false
    }

    fn locate_pointer(&mut self) {}

    /// Cursor theme or size preference changed
    fn reload_cursor(&mut self, _theme: &str, _size: u32) {}

    /// The stacking order changed; fullscreen occlusion needs rechecking
    fn queue_check_fullscreen(&mut self) {}
}


//! Events Module
//!
//! Input events as the core sees them, independent of the windowing
//! backend, and the router that takes every event through idle tracking,
//! pad and tablet mapping, user-time stamping, gestures, window ops, key
//! bindings and finally client delivery.

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use crate::wm::backend::{EventMode, FrozenDevice};
use crate::wm::client::WindowId;
use crate::wm::device::{DeviceId, DeviceType, InputDevice};
use crate::wm::display::Display;
use crate::wm::keymap::{Keycode, Modifiers};
use crate::wm::keysyms::Keysym;

/// Timestamp meaning "no time available"
pub const CURRENT_TIME: u32 = 0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u32 {
        /// Sent by a client rather than the server
        const SYNTHETIC = 1 << 0;
        /// Key autorepeat
        const REPEATED = 1 << 1;
        /// Pointer event emulated from a touch sequence
        const POINTER_EMULATED = 1 << 2;
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    KeyPress { keycode: Keycode, keysym: Keysym },
    KeyRelease { keycode: Keycode, keysym: Keysym },
    ButtonPress { button: u8 },
    ButtonRelease { button: u8 },
    Motion,
    Enter,
    Leave,
    Scroll,
    TouchBegin { sequence: u32 },
    TouchUpdate { sequence: u32 },
    TouchEnd { sequence: u32 },
    TouchCancel { sequence: u32 },
    PadButtonPress { button: u8, mode_switch: bool },
    PadButtonRelease { button: u8, mode_switch: bool },
    PadRing,
    PadStrip,
    DeviceAdded(InputDevice),
    DeviceRemoved,
}

/// Input event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: EventKind,

    /// Server time in milliseconds, [`CURRENT_TIME`] when unknown
    pub time: u32,

    /// Logical device
    pub device: DeviceId,

    /// Physical device that produced the event
    pub source_device: DeviceId,

    pub flags: EventFlags,

    /// Managed window the event happened in
    pub window: Option<WindowId>,

    /// Modifier and button state before the event
    pub modifiers: Modifiers,

    /// Root coordinates
    pub x: i32,
    pub y: i32,
}

impl InputEvent {
    /// Create a new event from the core devices
    pub fn new(kind: EventKind, time: u32) -> Self {
        let device = match kind {
            EventKind::KeyPress { .. } | EventKind::KeyRelease { .. } => DeviceId::CORE_KEYBOARD,
            _ => DeviceId::CORE_POINTER,
        };
        Self {
            kind,
            time,
            device,
            source_device: device,
            flags: EventFlags::empty(),
            window: None,
            modifiers: Modifiers::empty(),
            x: 0,
            y: 0,
        }
    }

    pub fn key_press(keycode: Keycode, keysym: Keysym, modifiers: Modifiers, time: u32) -> Self {
        Self {
            modifiers,
            ..Self::new(EventKind::KeyPress { keycode, keysym }, time)
        }
    }

    pub fn key_release(keycode: Keycode, keysym: Keysym, modifiers: Modifiers, time: u32) -> Self {
        Self {
            modifiers,
            ..Self::new(EventKind::KeyRelease { keycode, keysym }, time)
        }
    }

    pub fn button_press(button: u8, window: Option<WindowId>, x: i32, y: i32, time: u32) -> Self {
        Self {
            window,
            x,
            y,
            ..Self::new(EventKind::ButtonPress { button }, time)
        }
    }

    pub fn button_release(button: u8, window: Option<WindowId>, x: i32, y: i32, time: u32) -> Self {
        Self {
            window,
            x,
            y,
            ..Self::new(EventKind::ButtonRelease { button }, time)
        }
    }

    pub fn motion(window: Option<WindowId>, x: i32, y: i32, time: u32) -> Self {
        Self {
            window,
            x,
            y,
            ..Self::new(EventKind::Motion, time)
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_source(mut self, source: DeviceId) -> Self {
        self.source_device = source;
        self
    }

    pub fn with_flags(mut self, flags: EventFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_key(&self) -> bool {
        matches!(self.kind, EventKind::KeyPress { .. } | EventKind::KeyRelease { .. })
    }

    /// Hardware keycode of a key event
    pub fn keycode(&self) -> Option<Keycode> {
        match self.kind {
            EventKind::KeyPress { keycode, .. } | EventKind::KeyRelease { keycode, .. } => Some(keycode),
            _ => None,
        }
    }

    pub fn keysym(&self) -> Option<Keysym> {
        match self.kind {
            EventKind::KeyPress { keysym, .. } | EventKind::KeyRelease { keysym, .. } => Some(keysym),
            _ => None,
        }
    }

    pub fn touch_sequence(&self) -> Option<u32> {
        match self.kind {
            EventKind::TouchBegin { sequence }
            | EventKind::TouchUpdate { sequence }
            | EventKind::TouchEnd { sequence }
            | EventKind::TouchCancel { sequence } => Some(sequence),
            _ => None,
        }
    }

    /// Presses that count as user interaction with a window
    fn is_user_time_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::KeyPress { .. } | EventKind::ButtonPress { .. } | EventKind::TouchBegin { .. }
        )
    }
}

/// Result of event handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    /// The core consumed the event
    Stop,
    /// The event continues to the compositor's scene graph
    Propagate,
}

/// Per-display routing state
#[derive(Debug, Default)]
pub struct RouterState {
    /// Time of the event being processed, [`CURRENT_TIME`] between events
    pub current_time: u32,

    /// The one touch sequence currently emulating the pointer
    pointer_emulating_sequence: Option<u32>,

    /// The compositor holds a stage-wide input grab
    pub stage_grab: bool,

    /// A compositor actor, not a window, has key focus
    pub stage_key_focus: bool,

    /// Pad mapping OSD currently shown. Non-owning, cleared on unmanage.
    pub pad_osd: Option<WindowId>,
}

impl RouterState {
    /// Create a new router state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pointer_emulating_sequence(&self, sequence: u32) -> bool {
        self.pointer_emulating_sequence == Some(sequence)
    }

    fn track_touch_sequence(&mut self, event: &InputEvent) {
        match event.kind {
            EventKind::TouchBegin { sequence } => {
                if self.pointer_emulating_sequence.is_none()
                    && event.flags.contains(EventFlags::POINTER_EMULATED)
                {
                    trace!("Touch sequence {} emulates the pointer", sequence);
                    self.pointer_emulating_sequence = Some(sequence);
                }
            }
            EventKind::TouchEnd { sequence } | EventKind::TouchCancel { sequence } => {
                if self.is_pointer_emulating_sequence(sequence) {
                    self.pointer_emulating_sequence = None;
                }
            }
            _ => {}
        }
    }
}

impl Display {
    /// Route one input event. Events are processed one at a time, start
    /// to finish.
    pub fn handle_event(&mut self, event: &InputEvent) -> EventResult {
        self.router.current_time = event.time;
        let result = self.route_event(event);
        self.router.current_time = CURRENT_TIME;
        self.sync_stack();
        result
    }

    fn route_event(&mut self, event: &InputEvent) -> EventResult {
        if self.compositor.process_captured_input(event) {
            return EventResult::Stop;
        }

        if event.is_key() && self.compositor.notify_a11y(event) {
            return EventResult::Stop;
        }

        self.router.track_touch_sequence(event);

        match &event.kind {
            EventKind::PadButtonPress { mode_switch, .. } | EventKind::PadButtonRelease { mode_switch, .. } => {
                if (self.router.pad_osd.is_none() || *mode_switch) && self.compositor.pad_mapper_handle(event) {
                    return EventResult::Stop;
                }
            }
            EventKind::PadRing | EventKind::PadStrip => {
                if self.router.pad_osd.is_none() && self.compositor.pad_mapper_handle(event) {
                    return EventResult::Stop;
                }
            }
            EventKind::ButtonPress { button } | EventKind::ButtonRelease { button } => {
                let from_tool = self
                    .devices
                    .get(event.source_device)
                    .is_some_and(|d| d.device_type == DeviceType::TabletTool);
                if from_tool {
                    if self.compositor.tool_mapper_handle(event) {
                        return EventResult::Stop;
                    }
                } else if *button == 0 {
                    // Not a real button, nothing can act on it
                    return EventResult::Stop;
                }
            }
            _ => {}
        }

        match &event.kind {
            EventKind::DeviceAdded(device) => {
                self.devices.add(device.clone());
                self.compositor.pad_mapper_handle(event);
            }
            EventKind::DeviceRemoved => {
                self.devices.remove(event.source_device);
                self.compositor.pad_mapper_handle(event);
            }
            EventKind::Enter | EventKind::Leave => {}
            _ if event.flags.contains(EventFlags::SYNTHETIC) => {}
            _ => self.devices.reset_idle(event.source_device, event.time),
        }

        let window = self.window_for_event(event);

        if let Some(id) = window {
            if event.is_user_time_event() {
                self.update_user_time(id, event.time);
            }
        }

        if self.compositor.gesture_tracker_handle(event) {
            debug!("Gesture tracker took event {:?}", event.kind);
            return EventResult::Propagate;
        }

        if self.grab.is_window_op() {
            if self.handle_grab_op_event(event) {
                return EventResult::Stop;
            }
        } else if self.process_keybindings(window, event) {
            return EventResult::Stop;
        }

        if !self.grab.is_active() && event.is_key() && self.router.stage_key_focus {
            return EventResult::Propagate;
        }

        if self.router.pad_osd.is_some() {
            return EventResult::Propagate;
        }

        if self.router.stage_grab {
            return EventResult::Propagate;
        }

        let mode = match window {
            Some(id) => {
                if self.handle_ungrabbed_event(id, event) {
                    self.allow_pointer_after_press(event, EventMode::Thaw);
                    return EventResult::Stop;
                }
                EventMode::Replay
            }
            None => EventMode::KeepFrozen,
        };

        self.compositor.handle_event(event, window, mode);
        self.allow_pointer_after_press(event, mode);
        EventResult::Propagate
    }

    /// Release a pointer frozen by the synchronous focus-click grab
    fn allow_pointer_after_press(&mut self, event: &InputEvent, mode: EventMode) {
        if !matches!(event.kind, EventKind::ButtonPress { .. }) || mode == EventMode::KeepFrozen {
            return;
        }
        if let Err(e) = self.backend.allow_events(FrozenDevice::Pointer, mode, event.time) {
            warn!("Failed to release the pointer: {:#}", e);
        }
    }

    /// Target window: none under a stage grab, the focus window for keys
    /// unless a stage actor has key focus, the event's window otherwise
    fn window_for_event(&self, event: &InputEvent) -> Option<WindowId> {
        if self.router.stage_grab {
            return None;
        }

        if event.is_key() {
            if self.router.stage_key_focus {
                return None;
            }
            return self.focus_window;
        }

        event.window.filter(|&id| self.windows.contains(id))
    }

    fn update_user_time(&mut self, window: WindowId, time: u32) {
        let Some(client) = self.windows.get_mut(window) else {
            return;
        };
        if client.is_override_redirect() {
            return;
        }
        if time == CURRENT_TIME {
            debug!("Press on {} without a timestamp, not updating user time", window);
            return;
        }
        client.user_time = Some(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::testing::{self, CompositorCall};

    #[test]
    fn test_pointer_emulating_sequence_is_exclusive() {
        let mut state = RouterState::new();
        let begin = |sequence| {
            InputEvent::new(EventKind::TouchBegin { sequence }, 10).with_flags(EventFlags::POINTER_EMULATED)
        };

        state.track_touch_sequence(&begin(1));
        state.track_touch_sequence(&begin(2));
        assert!(state.is_pointer_emulating_sequence(1));
        assert!(!state.is_pointer_emulating_sequence(2));

        state.track_touch_sequence(&InputEvent::new(EventKind::TouchEnd { sequence: 2 }, 11));
        assert!(state.is_pointer_emulating_sequence(1));
        state.track_touch_sequence(&InputEvent::new(EventKind::TouchCancel { sequence: 1 }, 12));
        assert!(!state.is_pointer_emulating_sequence(1));
    }

    #[test]
    fn test_unbound_key_is_delivered_with_replay() {
        let (mut display, _backend, compositor) = testing::display();
        let window = testing::manage(&mut display, 1);
        display.set_focus(Some(window), 5);

        let event = InputEvent::key_press(38, 'a' as Keysym, Modifiers::empty(), 10);
        assert_eq!(display.handle_event(&event), EventResult::Propagate);

        let calls = compositor.calls();
        assert!(calls.contains(&CompositorCall::HandleEvent(Some(window), EventMode::Replay)));
        assert_eq!(display.windows.get(window).unwrap().user_time, Some(10));
        assert_eq!(display.router.current_time, CURRENT_TIME);
    }

    #[test]
    fn test_captured_input_stops_before_anything_else() {
        let (mut display, _backend, compositor) = testing::display();
        compositor.set_capture_input(true);
        let event = InputEvent::key_press(38, 'a' as Keysym, Modifiers::empty(), 10);
        assert_eq!(display.handle_event(&event), EventResult::Stop);
        assert!(display.devices.last_activity(event.source_device).is_none());
    }

    #[test]
    fn test_idle_time_skips_synthetic_and_crossing_events() {
        let (mut display, _backend, _compositor) = testing::display();
        let enter = InputEvent::new(EventKind::Enter, 50);
        display.handle_event(&enter);
        assert!(display.devices.last_activity(DeviceId::CORE_POINTER).is_none());

        let synthetic = InputEvent::motion(None, 1, 1, 60).with_flags(EventFlags::SYNTHETIC);
        display.handle_event(&synthetic);
        assert!(display.devices.last_activity(DeviceId::CORE_POINTER).is_none());

        display.handle_event(&InputEvent::motion(None, 1, 1, 70));
        assert_eq!(display.devices.last_activity(DeviceId::CORE_POINTER), Some(70));
    }

    #[test]
    fn test_button_zero_is_stopped() {
        let (mut display, _backend, compositor) = testing::display();
        let window = testing::manage(&mut display, 1);
        let event = InputEvent::button_press(0, Some(window), 5, 5, 10);
        assert_eq!(display.handle_event(&event), EventResult::Stop);
        assert!(!compositor
            .calls()
            .iter()
            .any(|c| matches!(c, CompositorCall::HandleEvent(..))));
    }

    #[test]
    fn test_pad_events_go_to_the_mapper_unless_osd_is_shown() {
        let (mut display, _backend, compositor) = testing::display();
        compositor.set_pad_mapper_result(true);

        let press = InputEvent::new(EventKind::PadButtonPress { button: 1, mode_switch: false }, 10);
        assert_eq!(display.handle_event(&press), EventResult::Stop);

        display.router.pad_osd = Some(WindowId(99));
        assert_eq!(display.handle_event(&press), EventResult::Propagate);

        let mode_switch = InputEvent::new(EventKind::PadButtonPress { button: 2, mode_switch: true }, 11);
        assert_eq!(display.handle_event(&mode_switch), EventResult::Stop);
    }

    #[test]
    fn test_stage_key_focus_bypasses_windows() {
        let (mut display, _backend, compositor) = testing::display();
        let window = testing::manage(&mut display, 1);
        display.set_focus(Some(window), 5);
        display.router.stage_key_focus = true;

        let event = InputEvent::key_press(38, 'a' as Keysym, Modifiers::empty(), 10);
        assert_eq!(display.handle_event(&event), EventResult::Propagate);
        assert!(!compositor
            .calls()
            .iter()
            .any(|c| matches!(c, CompositorCall::HandleEvent(Some(_), _))));
        // The press went to no window, so no user time either
        assert_eq!(display.windows.get(window).unwrap().user_time, None);
    }

    #[test]
    fn test_gesture_tracker_absorbs_before_keybindings() {
        let (mut display, _backend, compositor) = testing::display();
        compositor.set_gesture_result(true);
        let event = InputEvent::new(EventKind::TouchBegin { sequence: 3 }, 10);
        assert_eq!(display.handle_event(&event), EventResult::Propagate);
        assert!(!compositor
            .calls()
            .iter()
            .any(|c| matches!(c, CompositorCall::HandleEvent(..))));
    }
}

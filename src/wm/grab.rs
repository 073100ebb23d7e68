//! Grab Module
//!
//! Grab operations: exclusive device grabs for interactive move/resize,
//! popups and frame buttons. At most one operation is active at a time.

use thiserror::Error;
use tracing::{debug, warn};

use crate::shared::Geometry;
use crate::wm::client::WindowId;
use crate::wm::device::DeviceId;
use crate::wm::display::{Display, GrabOpNotify};
use crate::wm::moveresize;
use crate::wm::transients;

/// Cumulative pointer travel on either axis that counts as a drag
pub const DRAG_THRESHOLD: i32 = 8;

/// Edge or corner a resize acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeDirection {
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

impl ResizeDirection {
    /// Direction for a set of touched edges; `None` for no edge or
    /// opposing edges only
    pub fn from_edges(north: bool, south: bool, west: bool, east: bool) -> Option<Self> {
        let vertical = match (north, south) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        };
        let horizontal = match (west, east) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        };
        Self::from_signs(horizontal, vertical)
    }

    fn from_signs(horizontal: i32, vertical: i32) -> Option<Self> {
        let direction = match (horizontal, vertical) {
            (0, -1) => Self::North,
            (0, 1) => Self::South,
            (1, 0) => Self::East,
            (-1, 0) => Self::West,
            (1, -1) => Self::NorthEast,
            (-1, -1) => Self::NorthWest,
            (1, 1) => Self::SouthEast,
            (-1, 1) => Self::SouthWest,
            _ => return None,
        };
        Some(direction)
    }

    /// `(horizontal, vertical)`: -1 for west/north, 1 for east/south
    pub fn signs(self) -> (i32, i32) {
        match self {
            Self::North => (0, -1),
            Self::South => (0, 1),
            Self::East => (1, 0),
            Self::West => (-1, 0),
            Self::NorthEast => (1, -1),
            Self::NorthWest => (-1, -1),
            Self::SouthEast => (1, 1),
            Self::SouthWest => (-1, 1),
        }
    }
}

/// Device driving a window operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabInput {
    Pointer,
    Keyboard,
}

/// Grab operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabOp {
    Moving(GrabInput),
    Resizing(ResizeDirection, GrabInput),
    WaylandPopup,
    FrameButton,
    /// Stage-wide grab owned by the compositor
    Compositor,
}

impl GrabOp {
    /// Interactive move or resize of a window
    pub fn is_window_op(&self) -> bool {
        matches!(self, GrabOp::Moving(_) | GrabOp::Resizing(..))
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(
            self,
            GrabOp::Moving(GrabInput::Keyboard) | GrabOp::Resizing(_, GrabInput::Keyboard)
        )
    }

    pub fn is_moving(&self) -> bool {
        matches!(self, GrabOp::Moving(_))
    }

    pub fn resize_direction(&self) -> Option<ResizeDirection> {
        match self {
            GrabOp::Resizing(direction, _) => Some(*direction),
            _ => None,
        }
    }
}

/// Where input goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRoute {
    Normal,
    WindowOp,
    WaylandPopup,
    FrameButton,
}

#[derive(Debug, Error)]
pub enum GrabError {
    #[error("a grab operation is already active")]
    AlreadyActive,

    #[error("{0:?} cannot be started on a window")]
    NotBeginnable(GrabOp),

    #[error("window {0} is not managed")]
    UnknownWindow(WindowId),

    #[error("pointer grab was rejected")]
    PointerGrabRejected,

    #[error("keyboard grab was rejected")]
    KeyboardGrabRejected,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// State of the active grab operation
#[derive(Debug, Clone)]
pub struct ActiveGrab {
    pub op: GrabOp,
    pub window: WindowId,
    pub device: DeviceId,
    pub button: u8,

    /// Pointer position the operation is measured from
    pub anchor: (i32, i32),
    /// Window geometry at the anchor
    pub anchor_geometry: Geometry,
    /// Geometry restored when the operation is cancelled
    pub initial_geometry: Geometry,

    /// Press position for the drag threshold, when raising waits for it
    pub initial_pointer: Option<(i32, i32)>,
    pub threshold_movement_reached: bool,

    pub have_pointer: bool,
}

/// Grab engine state
#[derive(Debug, Default)]
pub struct GrabState {
    active: Option<ActiveGrab>,
}

impl GrabState {
    /// Create a new, idle grab state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_window_op(&self) -> bool {
        self.route() == EventRoute::WindowOp
    }

    pub fn route(&self) -> EventRoute {
        match self.active.as_ref().map(|g| g.op) {
            None | Some(GrabOp::Compositor) => EventRoute::Normal,
            Some(GrabOp::Moving(_) | GrabOp::Resizing(..)) => EventRoute::WindowOp,
            Some(GrabOp::WaylandPopup) => EventRoute::WaylandPopup,
            Some(GrabOp::FrameButton) => EventRoute::FrameButton,
        }
    }

    pub fn op(&self) -> Option<GrabOp> {
        self.active.as_ref().map(|g| g.op)
    }

    pub fn window(&self) -> Option<WindowId> {
        self.active.as_ref().map(|g| g.window)
    }

    pub fn active(&self) -> Option<&ActiveGrab> {
        self.active.as_ref()
    }

    pub(crate) fn active_mut(&mut self) -> Option<&mut ActiveGrab> {
        self.active.as_mut()
    }

    /// Record pointer travel; returns whether the threshold is crossed
    pub fn check_threshold_reached(&mut self, x: i32, y: i32) -> bool {
        let Some(grab) = self.active.as_mut() else {
            return false;
        };
        if grab.threshold_movement_reached {
            return true;
        }
        if let Some((initial_x, initial_y)) = grab.initial_pointer {
            if (initial_x - x).abs() >= DRAG_THRESHOLD || (initial_y - y).abs() >= DRAG_THRESHOLD {
                debug!("Drag threshold reached at ({}, {})", x, y);
                grab.threshold_movement_reached = true;
            }
        }
        grab.threshold_movement_reached
    }
}

impl Display {
    /// Begin a grab operation on `window`.
    ///
    /// Fails without touching state when another operation is active.
    /// Moves are redirected to the first ancestor that is not an attached
    /// dialog. Keyboard operations warp the pointer to the window first.
    pub fn begin_grab_op(
        &mut self,
        window: WindowId,
        op: GrabOp,
        device: DeviceId,
        button: u8,
        pointer: (i32, i32),
        time: u32,
    ) -> Result<(), GrabError> {
        if let Some(active) = self.grab.active() {
            warn!(
                "Attempt to perform window operation {:?} on window {} when operation {:?} on {} already in effect",
                op, window, active.op, active.window
            );
            return Err(GrabError::AlreadyActive);
        }
        if op == GrabOp::Compositor {
            return Err(GrabError::NotBeginnable(op));
        }
        if !self.windows.contains(window) {
            return Err(GrabError::UnknownWindow(window));
        }

        debug!("Doing grab op {:?} on window {} button {} pointer {:?}", op, window, button, pointer);

        let mut initial_pointer = None;
        if op.is_window_op() {
            if self.prefs.raise_on_click {
                self.raise_window(window);
            } else {
                initial_pointer = Some(pointer);
            }
        }

        let grab_window = if op.is_moving() {
            transients::first_non_attached_ancestor(&self.windows, window)
        } else {
            window
        };

        let mut pointer = pointer;
        if op.is_keyboard() {
            let geometry = self.windows.get(grab_window).map(|c| c.geometry).unwrap_or_default();
            let screen = self.backend.screen_geometry();
            pointer = moveresize::keyboard_warp_position(op, geometry, screen);
            self.backend.warp_pointer(pointer.0, pointer.1)?;
            if initial_pointer.is_some() {
                initial_pointer = Some(pointer);
            }
        }

        // Drop the implicit grab of the press that started us
        self.backend.ungrab_pointer(time)?;
        let have_pointer = self.backend.grab_pointer(grab_window, time)?;
        if !have_pointer && !op.is_keyboard() {
            warn!("Pointer grab for {:?} on {} was rejected", op, grab_window);
            return Err(GrabError::PointerGrabRejected);
        }

        if op.is_window_op() {
            let have_keyboard = match self.grab_all_keys(grab_window, time) {
                Ok(have_keyboard) => have_keyboard,
                Err(e) => {
                    self.release_pointer(have_pointer, time);
                    return Err(e.into());
                }
            };
            if !have_keyboard {
                warn!("Keyboard grab for {:?} on {} was rejected", op, grab_window);
                self.release_pointer(have_pointer, time);
                return Err(GrabError::KeyboardGrabRejected);
            }
        }

        let geometry = self.windows.get(grab_window).map(|c| c.geometry).unwrap_or_default();
        self.grab.active = Some(ActiveGrab {
            op,
            window: grab_window,
            device,
            button,
            anchor: pointer,
            anchor_geometry: geometry,
            initial_geometry: geometry,
            initial_pointer,
            threshold_movement_reached: false,
            have_pointer,
        });

        self.grab_op_begin.emit(&GrabOpNotify { window: grab_window, op });
        if op.is_window_op() {
            if let Some(client) = self.windows.get_mut(grab_window) {
                client.grab_op_began(op);
            }
        }

        Ok(())
    }

    fn release_pointer(&mut self, have_pointer: bool, time: u32) {
        if !have_pointer {
            return;
        }
        if let Err(e) = self.backend.ungrab_pointer(time) {
            warn!("Failed to ungrab pointer: {:#}", e);
        }
    }

    /// End the active grab operation. Without one this does nothing.
    pub fn end_grab_op(&mut self, time: u32) {
        if self.grab.route() == EventRoute::Normal {
            debug!("No grab op to end");
            return;
        }
        let Some(grab) = self.grab.active.take() else {
            return;
        };

        debug!("Ending grab op {:?} on {} at time {}", grab.op, grab.window, time);
        self.grab_op_end.emit(&GrabOpNotify {
            window: grab.window,
            op: grab.op,
        });

        if grab.op.is_window_op() {
            // Only raise a click-without-drag when raising was deferred
            if !self.prefs.raise_on_click && !grab.threshold_movement_reached {
                self.raise_window(grab.window);
            }
            if let Some(client) = self.windows.get_mut(grab.window) {
                client.grab_op_ended();
            }
        }

        self.release_pointer(grab.have_pointer, time);

        if grab.op.is_window_op() {
            self.ungrab_all_keys(grab.window, time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::wm::client_flags::ClientFlags;
    use crate::wm::testing::{self, BackendCall};
    use std::cell::RefCell;
    use std::rc::Rc;

    const MOVE: GrabOp = GrabOp::Moving(GrabInput::Pointer);

    #[test]
    fn test_begin_and_end_window_op() {
        let (mut display, backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        let ops = Rc::new(RefCell::new(Vec::new()));
        let sink = ops.clone();
        display.grab_op_begin.connect(move |n| sink.borrow_mut().push(("begin", n.window)));
        let sink = ops.clone();
        display.grab_op_end.connect(move |n| sink.borrow_mut().push(("end", n.window)));

        display
            .begin_grab_op(w, MOVE, DeviceId::CORE_POINTER, 1, (10, 10), 100)
            .unwrap();
        assert_eq!(display.grab.op(), Some(MOVE));
        assert!(display.windows.get(w).unwrap().flags.contains(ClientFlags::MOVING_RESIZING));
        assert!(backend.calls().contains(&BackendCall::GrabPointer(w)));
        assert!(backend.calls().contains(&BackendCall::GrabKeyboard(w)));
        assert_eq!(display.focus_window, Some(w));

        display.end_grab_op(200);
        assert!(!display.grab.is_active());
        assert!(display.windows.get(w).unwrap().grab_op.is_none());
        assert_eq!(*ops.borrow(), vec![("begin", w), ("end", w)]);
        assert!(backend.calls().contains(&BackendCall::UngrabKeyboard));
    }

    #[test]
    fn test_begin_while_active_fails_and_keeps_state() {
        let (mut display, _backend, _compositor) = testing::display();
        let w1 = testing::manage(&mut display, 1);
        let w2 = testing::manage(&mut display, 2);

        display
            .begin_grab_op(w1, MOVE, DeviceId::CORE_POINTER, 1, (10, 10), 100)
            .unwrap();
        let before = display.grab.active().cloned().unwrap();

        for op in [
            MOVE,
            GrabOp::Resizing(ResizeDirection::East, GrabInput::Pointer),
            GrabOp::WaylandPopup,
            GrabOp::FrameButton,
        ] {
            let result = display.begin_grab_op(w2, op, DeviceId::CORE_POINTER, 1, (50, 50), 101);
            assert!(matches!(result, Err(GrabError::AlreadyActive)));
        }

        let after = display.grab.active().unwrap();
        assert_eq!(after.window, before.window);
        assert_eq!(after.op, before.op);
        assert_eq!(after.anchor, before.anchor);
        assert!(display.windows.get(w2).unwrap().grab_op.is_none());
    }

    #[test]
    fn test_rejected_pointer_grab_aborts_cleanly() {
        let (mut display, backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        backend.reject_pointer_grabs(true);

        let result = display.begin_grab_op(w, MOVE, DeviceId::CORE_POINTER, 1, (0, 0), 100);
        assert!(matches!(result, Err(GrabError::PointerGrabRejected)));
        assert!(!display.grab.is_active());
        assert!(display.windows.get(w).unwrap().grab_op.is_none());
    }

    #[test]
    fn test_rejected_keyboard_grab_releases_pointer() {
        let (mut display, backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        backend.reject_keyboard_grabs(true);
        backend.clear();

        let result = display.begin_grab_op(w, MOVE, DeviceId::CORE_POINTER, 1, (0, 0), 100);
        assert!(matches!(result, Err(GrabError::KeyboardGrabRejected)));
        assert!(!display.grab.is_active());
        let calls = backend.calls();
        let grab = calls.iter().position(|c| *c == BackendCall::GrabPointer(w)).unwrap();
        assert!(calls[grab..].contains(&BackendCall::UngrabPointer));
    }

    #[test]
    fn test_compositor_op_and_unknown_window_are_refused() {
        let (mut display, _backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        assert!(matches!(
            display.begin_grab_op(w, GrabOp::Compositor, DeviceId::CORE_POINTER, 0, (0, 0), 1),
            Err(GrabError::NotBeginnable(_))
        ));
        assert!(matches!(
            display.begin_grab_op(WindowId(77), MOVE, DeviceId::CORE_POINTER, 1, (0, 0), 1),
            Err(GrabError::UnknownWindow(_))
        ));
        // Ending without a grab is a no-op
        display.end_grab_op(5);
        assert!(!display.grab.is_active());
    }

    #[test]
    fn test_click_without_drag_raises_on_end() {
        let (mut display, _backend, _compositor) = testing::display();
        let mut config = Config::default();
        config.behavior.raise_on_click = false;
        display.apply_config(&config);

        let w1 = testing::manage(&mut display, 1);
        let w2 = testing::manage(&mut display, 2);
        display
            .begin_grab_op(w1, MOVE, DeviceId::CORE_POINTER, 1, (10, 10), 100)
            .unwrap();
        // Not raised yet
        assert_eq!(display.stack.top(&mut display.windows), Some(w2));

        assert!(!display.grab.check_threshold_reached(15, 17));
        display.end_grab_op(101);
        assert_eq!(display.stack.top(&mut display.windows), Some(w1));

        // A real drag does not raise
        display
            .begin_grab_op(w2, MOVE, DeviceId::CORE_POINTER, 1, (10, 10), 102)
            .unwrap();
        assert!(display.grab.check_threshold_reached(18, 10));
        display.end_grab_op(103);
        assert_eq!(display.stack.top(&mut display.windows), Some(w1));
    }

    #[test]
    fn test_move_is_redirected_to_non_attached_ancestor() {
        let (mut display, _backend, _compositor) = testing::display();
        let parent = testing::manage(&mut display, 1);
        let dialog = testing::manage(&mut display, 2);
        {
            let client = display.windows.get_mut(dialog).unwrap();
            client.flags.insert(ClientFlags::ATTACHED);
        }
        display.windows.set_transient_for(dialog, Some(parent));

        display
            .begin_grab_op(dialog, MOVE, DeviceId::CORE_POINTER, 1, (0, 0), 100)
            .unwrap();
        assert_eq!(display.grab.window(), Some(parent));
    }

    #[test]
    fn test_resize_direction_from_edges() {
        assert_eq!(ResizeDirection::from_edges(true, false, true, false), Some(ResizeDirection::NorthWest));
        assert_eq!(ResizeDirection::from_edges(false, true, false, false), Some(ResizeDirection::South));
        assert_eq!(ResizeDirection::from_edges(false, false, false, false), None);
        assert_eq!(ResizeDirection::SouthEast.signs(), (1, 1));
    }
}

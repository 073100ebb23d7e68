//! MoveResize Module
//!
//! Interactive window moving and resizing while a window grab op is
//! active: pointer motion relative to the anchor, keyboard steps, cancel
//! and finish.

use tracing::{debug, warn};

use crate::shared::Geometry;
use crate::wm::display::Display;
use crate::wm::events::{EventKind, InputEvent};
use crate::wm::grab::{GrabInput, GrabOp, ResizeDirection};
use crate::wm::keysyms::{self, Keysym};

/// Pixels moved or resized per arrow key press
pub const KEYBOARD_STEP: i32 = 10;

/// Smallest width and height a resize produces
const MIN_SIZE: i32 = 1;

/// Geometry offset by the pointer travel
pub fn moved_geometry(start: Geometry, dx: i32, dy: i32) -> Geometry {
    Geometry {
        x: start.x + dx,
        y: start.y + dy,
        ..start
    }
}

/// Geometry after dragging the `direction` edge or corner by the pointer
/// travel. The opposite edges stay put.
pub fn resized_geometry(start: Geometry, direction: ResizeDirection, dx: i32, dy: i32) -> Geometry {
    let (horizontal, vertical) = direction.signs();
    let (x, width) = resize_axis(start.x, start.width as i32, horizontal, dx);
    let (y, height) = resize_axis(start.y, start.height as i32, vertical, dy);
    Geometry::new(x, y, width as u32, height as u32)
}

fn resize_axis(origin: i32, size: i32, sign: i32, delta: i32) -> (i32, i32) {
    match sign {
        1 => (origin, (size + delta).max(MIN_SIZE)),
        -1 => {
            let new_size = (size - delta).max(MIN_SIZE);
            (origin + size - new_size, new_size)
        }
        _ => (origin, size),
    }
}

/// Direction for a pointer resize started at `(x, y)`: the window is cut
/// into thirds on each axis and the centre cell has no direction
pub fn direction_for_point(geometry: Geometry, x: i32, y: i32) -> Option<ResizeDirection> {
    let width = geometry.width as i32;
    let height = geometry.height as i32;
    let west = x < geometry.x + width / 3;
    let east = x > geometry.x + 2 * width / 3;
    let north = y < geometry.y + height / 3;
    let south = y > geometry.y + 2 * height / 3;
    ResizeDirection::from_edges(north, south, west, east)
}

/// Where a keyboard op puts the pointer: the window centre for moves, the
/// grabbed edge or corner for resizes, clamped to the screen
pub fn keyboard_warp_position(op: GrabOp, geometry: Geometry, screen: Geometry) -> (i32, i32) {
    let (center_x, center_y) = geometry.center();
    let (x, y) = match op.resize_direction() {
        Some(direction) => {
            let (horizontal, vertical) = direction.signs();
            let x = match horizontal {
                -1 => geometry.x,
                1 => geometry.right() - 1,
                _ => center_x,
            };
            let y = match vertical {
                -1 => geometry.y,
                1 => geometry.bottom() - 1,
                _ => center_y,
            };
            (x, y)
        }
        None => (center_x, center_y),
    };
    screen.clamp_point(x, y)
}

fn arrow_delta(keysym: Keysym) -> Option<(i32, i32)> {
    match keysym {
        keysyms::KEY_LEFT => Some((-KEYBOARD_STEP, 0)),
        keysyms::KEY_RIGHT => Some((KEYBOARD_STEP, 0)),
        keysyms::KEY_UP => Some((0, -KEYBOARD_STEP)),
        keysyms::KEY_DOWN => Some((0, KEYBOARD_STEP)),
        _ => None,
    }
}

impl Display {
    /// Feed an event to the active window op. Returns whether it was
    /// consumed.
    pub(crate) fn handle_grab_op_event(&mut self, event: &InputEvent) -> bool {
        let Some(op) = self.grab.op().filter(|op| op.is_window_op()) else {
            return false;
        };

        match event.kind {
            EventKind::Motion => {
                if op.is_keyboard() {
                    return true;
                }
                self.update_grab_motion(event.x, event.y);
                true
            }
            EventKind::ButtonPress { .. } => true,
            EventKind::ButtonRelease { .. } => {
                if !op.is_keyboard() {
                    self.update_grab_motion(event.x, event.y);
                }
                self.end_grab_op(event.time);
                true
            }
            EventKind::KeyPress { keysym, .. } => {
                self.handle_grab_op_key(op, keysym, event.time);
                true
            }
            EventKind::KeyRelease { .. } => true,
            _ => false,
        }
    }

    fn handle_grab_op_key(&mut self, op: GrabOp, keysym: Keysym, time: u32) {
        if keysyms::is_modifier_key(keysym) {
            return;
        }

        match keysym {
            keysyms::KEY_ESCAPE => {
                if let Some(initial) = self.grab.active().map(|g| g.initial_geometry) {
                    debug!("Grab op cancelled, restoring {:?}", initial);
                    self.apply_grab_geometry(initial);
                }
                self.end_grab_op(time);
            }
            keysyms::KEY_RETURN | keysyms::KEY_KP_ENTER => self.end_grab_op(time),
            _ if op.is_keyboard() => match arrow_delta(keysym) {
                Some((dx, dy)) => self.keyboard_step(op, dx, dy),
                None => {
                    debug!("Ending keyboard grab op on key {:#x}", keysym);
                    self.end_grab_op(time);
                }
            },
            _ => {}
        }
    }

    /// Move, or grow/shrink the bottom-right corner, by one step
    fn keyboard_step(&mut self, op: GrabOp, dx: i32, dy: i32) {
        let Some(current) = self
            .grab
            .window()
            .and_then(|w| self.windows.get(w))
            .map(|c| c.geometry)
        else {
            return;
        };

        let geometry = match op {
            GrabOp::Moving(GrabInput::Keyboard) => moved_geometry(current, dx, dy),
            GrabOp::Resizing(_, GrabInput::Keyboard) => {
                resized_geometry(current, ResizeDirection::SouthEast, dx, dy)
            }
            _ => return,
        };
        self.apply_grab_geometry(geometry);
    }

    fn update_grab_motion(&mut self, x: i32, y: i32) {
        self.grab.check_threshold_reached(x, y);

        let Some(grab) = self.grab.active() else {
            return;
        };
        let dx = x - grab.anchor.0;
        let dy = y - grab.anchor.1;
        let geometry = match grab.op {
            GrabOp::Moving(_) => moved_geometry(grab.anchor_geometry, dx, dy),
            GrabOp::Resizing(direction, _) => resized_geometry(grab.anchor_geometry, direction, dx, dy),
            _ => return,
        };
        self.apply_grab_geometry(geometry);
    }

    fn apply_grab_geometry(&mut self, geometry: Geometry) {
        let Some(window) = self.grab.window() else {
            return;
        };
        let Some(client) = self.windows.get_mut(window) else {
            return;
        };
        if client.geometry == geometry {
            return;
        }
        client.geometry = geometry;
        if let Err(e) = self.backend.move_resize(window, geometry) {
            warn!("Failed to configure window {}: {:#}", window, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::device::DeviceId;
    use crate::wm::events::EventResult;
    use crate::wm::keymap::Modifiers;
    use crate::wm::testing::{self, BackendCall};

    #[test]
    fn test_resize_keeps_opposite_edges() {
        let start = Geometry::new(100, 100, 200, 100);

        let g = resized_geometry(start, ResizeDirection::NorthWest, 20, -10);
        assert_eq!(g, Geometry::new(120, 90, 180, 110));
        assert_eq!(g.right(), start.right());
        assert_eq!(g.bottom(), start.bottom());

        let g = resized_geometry(start, ResizeDirection::East, -500, 40);
        assert_eq!(g, Geometry::new(100, 100, 1, 100));

        let g = resized_geometry(start, ResizeDirection::North, 0, 500);
        assert_eq!(g.height, 1);
        assert_eq!(g.bottom(), start.bottom());
    }

    #[test]
    fn test_direction_for_point_uses_thirds() {
        let g = Geometry::new(0, 0, 300, 300);
        assert_eq!(direction_for_point(g, 10, 10), Some(ResizeDirection::NorthWest));
        assert_eq!(direction_for_point(g, 290, 150), Some(ResizeDirection::East));
        assert_eq!(direction_for_point(g, 150, 150), None);
    }

    #[test]
    fn test_keyboard_warp_position() {
        let screen = Geometry::new(0, 0, 1000, 800);
        let g = Geometry::new(900, 100, 200, 100);
        assert_eq!(keyboard_warp_position(GrabOp::Moving(GrabInput::Keyboard), g, screen), (999, 150));
        let resize = GrabOp::Resizing(ResizeDirection::SouthWest, GrabInput::Keyboard);
        assert_eq!(keyboard_warp_position(resize, g, screen), (900, 199));
    }

    #[test]
    fn test_pointer_move_follows_motion_and_ends_on_release() {
        let (mut display, backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        let start = display.windows.get(w).unwrap().geometry;

        display
            .begin_grab_op(w, GrabOp::Moving(GrabInput::Pointer), DeviceId::CORE_POINTER, 1, (50, 50), 10)
            .unwrap();

        let motion = InputEvent::motion(Some(w), 80, 40, 11);
        assert_eq!(display.handle_event(&motion), EventResult::Stop);
        assert_eq!(display.windows.get(w).unwrap().geometry, moved_geometry(start, 30, -10));
        assert!(backend.calls().contains(&BackendCall::MoveResize(w, moved_geometry(start, 30, -10))));

        let release = InputEvent::button_release(1, Some(w), 90, 40, 12);
        assert_eq!(display.handle_event(&release), EventResult::Stop);
        assert!(!display.grab.is_active());
        assert_eq!(display.windows.get(w).unwrap().geometry, moved_geometry(start, 40, -10));
    }

    #[test]
    fn test_escape_restores_initial_geometry() {
        let (mut display, _backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        let start = display.windows.get(w).unwrap().geometry;
        let op = GrabOp::Resizing(ResizeDirection::SouthEast, GrabInput::Pointer);
        display.begin_grab_op(w, op, DeviceId::CORE_POINTER, 2, (0, 0), 10).unwrap();

        display.handle_event(&InputEvent::motion(Some(w), 25, 25, 11));
        assert_ne!(display.windows.get(w).unwrap().geometry, start);

        let escape = InputEvent::key_press(9, keysyms::KEY_ESCAPE, Modifiers::empty(), 12);
        assert_eq!(display.handle_event(&escape), EventResult::Stop);
        assert_eq!(display.windows.get(w).unwrap().geometry, start);
        assert!(!display.grab.is_active());
    }

    #[test]
    fn test_keyboard_move_steps_and_finishes() {
        let (mut display, backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        let start = display.windows.get(w).unwrap().geometry;
        display
            .begin_grab_op(w, GrabOp::Moving(GrabInput::Keyboard), DeviceId::CORE_KEYBOARD, 0, (0, 0), 10)
            .unwrap();
        assert!(backend.calls().contains(&BackendCall::WarpPointer(start.center().0, start.center().1)));

        for _ in 0..2 {
            display.handle_event(&InputEvent::key_press(114, keysyms::KEY_RIGHT, Modifiers::empty(), 11));
        }
        display.handle_event(&InputEvent::key_press(111, keysyms::KEY_UP, Modifiers::empty(), 12));
        assert_eq!(display.windows.get(w).unwrap().geometry, moved_geometry(start, 20, -10));

        // Pointer motion does not move a keyboard-driven window
        display.handle_event(&InputEvent::motion(Some(w), 500, 500, 13));
        assert_eq!(display.windows.get(w).unwrap().geometry, moved_geometry(start, 20, -10));

        display.handle_event(&InputEvent::key_press(36, keysyms::KEY_RETURN, Modifiers::empty(), 14));
        assert!(!display.grab.is_active());
    }

    #[test]
    fn test_keyboard_resize_grows_bottom_right() {
        let (mut display, _backend, _compositor) = testing::display();
        let w = testing::manage(&mut display, 1);
        let start = display.windows.get(w).unwrap().geometry;
        let op = GrabOp::Resizing(ResizeDirection::SouthEast, GrabInput::Keyboard);
        display.begin_grab_op(w, op, DeviceId::CORE_KEYBOARD, 0, (0, 0), 10).unwrap();

        display.handle_event(&InputEvent::key_press(116, keysyms::KEY_DOWN, Modifiers::empty(), 11));
        display.handle_event(&InputEvent::key_press(113, keysyms::KEY_LEFT, Modifiers::empty(), 12));
        let g = display.windows.get(w).unwrap().geometry;
        assert_eq!((g.x, g.y), (start.x, start.y));
        assert_eq!((g.width, g.height), (start.width - 10, start.height + 10));

        // Any other key finishes
        display.handle_event(&InputEvent::key_press(38, 'a' as Keysym, Modifiers::empty(), 13));
        assert!(!display.grab.is_active());
    }
}

//! Handlers Module
//!
//! The built-in key binding handlers: stacking, keyboard move and
//! resize, workspaces and the shared handler behind external grabs.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::wm::client::WindowId;
use crate::wm::client_flags::ClientFlags;
use crate::wm::display::Display;
use crate::wm::events::{EventKind, InputEvent};
use crate::wm::grab::{GrabInput, GrabOp, ResizeDirection};
use crate::wm::keybindings::{
    KeyBinding, KeyBindingAction, KeyBindingFlags, KeyBindingTable, KeyHandler, KeyHandlerFn,
    EXTERNAL_GRAB_HANDLER,
};
use crate::wm::settings::MAX_WORKSPACES;

type WindowHandler = fn(&mut Display, WindowId, &InputEvent, &KeyBinding);

fn per_window(func: WindowHandler) -> KeyHandlerFn {
    Rc::new(move |display: &mut Display, window: Option<WindowId>, event: &InputEvent, binding: &KeyBinding| {
        if let Some(window) = window {
            func(display, window, event, binding);
        }
    })
}

/// Register every built-in handler with the table
pub fn register_builtin_handlers(keys: &mut KeyBindingTable) {
    let window_flags = KeyBindingFlags::PER_WINDOW | KeyBindingFlags::BUILTIN;
    let window_handlers: [(&str, KeyBindingAction, WindowHandler); 6] = [
        ("raise", KeyBindingAction::RAISE, handle_raise),
        ("lower", KeyBindingAction::LOWER, handle_lower),
        ("raise-or-lower", KeyBindingAction::RAISE_OR_LOWER, handle_raise_or_lower),
        ("toggle-above", KeyBindingAction::TOGGLE_ABOVE, handle_toggle_above),
        ("begin-move", KeyBindingAction::BEGIN_MOVE, handle_begin_move),
        ("begin-resize", KeyBindingAction::BEGIN_RESIZE, handle_begin_resize),
    ];
    for (name, action, func) in window_handlers {
        keys.register_handler(KeyHandler::new(name, action, window_flags, 0, per_window(func)));
    }

    for n in 1..=MAX_WORKSPACES {
        keys.register_handler(KeyHandler::new(
            format!("switch-to-workspace-{}", n),
            KeyBindingAction::WORKSPACE_SWITCH,
            KeyBindingFlags::BUILTIN,
            n as i32 - 1,
            Rc::new(handle_switch_to_workspace),
        ));
        keys.register_handler(KeyHandler::new(
            format!("move-to-workspace-{}", n),
            KeyBindingAction::MOVE_TO_WORKSPACE,
            window_flags,
            n as i32 - 1,
            per_window(handle_move_to_workspace),
        ));
    }

    keys.register_handler(KeyHandler::new(
        EXTERNAL_GRAB_HANDLER,
        KeyBindingAction::NONE,
        KeyBindingFlags::BUILTIN,
        0,
        Rc::new(handle_external_grab),
    ));
}

fn handle_raise(display: &mut Display, window: WindowId, _event: &InputEvent, _binding: &KeyBinding) {
    display.raise_window(window);
}

fn handle_lower(display: &mut Display, window: WindowId, _event: &InputEvent, _binding: &KeyBinding) {
    display.lower_window(window);
}

/// Raise when anything above covers part of the window, lower otherwise
fn handle_raise_or_lower(display: &mut Display, window: WindowId, _event: &InputEvent, _binding: &KeyBinding) {
    let Some(geometry) = display.windows.get(window).map(|c| c.geometry) else {
        return;
    };
    let workspace = display.windows.active_workspace;
    let stacked = display.stack.list_windows(&mut display.windows, Some(workspace));

    let obscured = stacked
        .iter()
        .skip_while(|&&w| w != window)
        .skip(1)
        .filter_map(|&w| display.windows.get(w))
        .any(|above| above.flags.contains(ClientFlags::MAPPED) && above.geometry.intersects(&geometry));

    if obscured {
        display.raise_window(window);
    } else {
        display.lower_window(window);
    }
}

fn handle_toggle_above(display: &mut Display, window: WindowId, _event: &InputEvent, _binding: &KeyBinding) {
    let Some(client) = display.windows.get_mut(window) else {
        return;
    };
    client.flags.toggle(ClientFlags::ABOVE);
    debug!("Window {} above: {}", window, client.flags.contains(ClientFlags::ABOVE));
    display.stack.update_layer(&mut display.windows, window);
    display.sync_stack();
}

fn begin_keyboard_op(display: &mut Display, window: WindowId, op: GrabOp, event: &InputEvent) {
    let pointer = match display.backend.query_pointer() {
        Ok(pointer) => pointer,
        Err(e) => {
            warn!("Failed to query the pointer: {:#}", e);
            (event.x, event.y)
        }
    };
    if let Err(e) = display.begin_grab_op(window, op, event.device, 0, pointer, event.time) {
        debug!("Keyboard {:?} on {} not started: {}", op, window, e);
    }
}

fn handle_begin_move(display: &mut Display, window: WindowId, event: &InputEvent, _binding: &KeyBinding) {
    begin_keyboard_op(display, window, GrabOp::Moving(GrabInput::Keyboard), event);
}

fn handle_begin_resize(display: &mut Display, window: WindowId, event: &InputEvent, _binding: &KeyBinding) {
    let op = GrabOp::Resizing(ResizeDirection::SouthEast, GrabInput::Keyboard);
    begin_keyboard_op(display, window, op, event);
}

fn handle_switch_to_workspace(
    display: &mut Display,
    _window: Option<WindowId>,
    event: &InputEvent,
    binding: &KeyBinding,
) {
    let Ok(workspace) = u32::try_from(binding.handler.data) else {
        return;
    };
    display.switch_to_workspace(workspace, event.time);
}

fn handle_move_to_workspace(display: &mut Display, window: WindowId, event: &InputEvent, binding: &KeyBinding) {
    let Ok(workspace) = u32::try_from(binding.handler.data) else {
        return;
    };
    if workspace >= display.prefs.num_workspaces() {
        return;
    }
    let Some(client) = display.windows.get_mut(window) else {
        return;
    };
    if client.workspace == Some(workspace) {
        return;
    }
    debug!("Moving window {} to workspace {}", window, workspace);
    client.workspace = Some(workspace);

    if display.focus_window == Some(window) && workspace != display.windows.active_workspace {
        display.focus_default_window(Some(window), event.time);
    }
}

/// Forwards external grabs to the accelerator signals: press activates,
/// release deactivates
fn handle_external_grab(display: &mut Display, _window: Option<WindowId>, event: &InputEvent, binding: &KeyBinding) {
    let action = display.keys.binding_action(&binding.resolved);
    if matches!(event.kind, EventKind::KeyRelease { .. }) {
        display.accelerator_deactivate(action, event);
    } else {
        display.accelerator_activate(action, event);
    }
}

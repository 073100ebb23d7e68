//! Test doubles for the backend and compositor seams.
//!
//! Both record every call into shared state that the test keeps a handle
//! to after the display took ownership of the boxed collaborator.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use crate::config::Config;
use crate::shared::Geometry;
use crate::wm::backend::{Backend, EventMode, FrozenDevice, GrabModifiers, GrabTarget};
use crate::wm::client::{Client, WindowId};
use crate::wm::client_flags::WindowType;
use crate::wm::compositor::Compositor;
use crate::wm::display::Display;
use crate::wm::events::InputEvent;
use crate::wm::keybindings::KeyBinding;
use crate::wm::keymap::{Keycode, Keymap, Modifiers};
use crate::wm::settings::{KeyboardRepeat, Preferences};

/// A backend request. `None` modifiers stand for "any modifier".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    GrabKey(GrabTarget, Keycode, Option<Modifiers>),
    UngrabKey(GrabTarget, Keycode, Option<Modifiers>),
    GrabButton(WindowId, u8, Option<Modifiers>, bool),
    UngrabButton(WindowId, u8, Option<Modifiers>),
    GrabPointer(WindowId),
    UngrabPointer,
    GrabKeyboard(WindowId),
    UngrabKeyboard,
    AllowEvents(FrozenDevice, EventMode),
    WarpPointer(i32, i32),
    Restack(Vec<WindowId>),
    MoveResize(WindowId, Geometry),
    SetInputFocus(Option<WindowId>),
    SetKeyboardRepeat(KeyboardRepeat),
}

fn modifiers(modifiers: GrabModifiers) -> Option<Modifiers> {
    match modifiers {
        GrabModifiers::Any => None,
        GrabModifiers::Exactly(mask) => Some(mask),
    }
}

#[derive(Debug)]
struct BackendState {
    keymap: Keymap,
    calls: Vec<BackendCall>,
    reject_pointer: bool,
    reject_keyboard: bool,
    pointer: (i32, i32),
    time: u32,
}

#[derive(Clone)]
pub struct BackendHandle(Rc<RefCell<BackendState>>);

impl BackendHandle {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.0.borrow().calls.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().calls.clear();
    }

    pub fn last_restack(&self) -> Option<Vec<WindowId>> {
        self.0.borrow().calls.iter().rev().find_map(|call| match call {
            BackendCall::Restack(order) => Some(order.clone()),
            _ => None,
        })
    }

    pub fn reject_pointer_grabs(&self, reject: bool) {
        self.0.borrow_mut().reject_pointer = reject;
    }

    pub fn reject_keyboard_grabs(&self, reject: bool) {
        self.0.borrow_mut().reject_keyboard = reject;
    }
}

struct FakeBackend(Rc<RefCell<BackendState>>);

impl FakeBackend {
    fn record(&mut self, call: BackendCall) -> Result<()> {
        self.0.borrow_mut().calls.push(call);
        Ok(())
    }
}

impl Backend for FakeBackend {
    fn keymap(&mut self) -> Result<Keymap> {
        Ok(self.0.borrow().keymap.clone())
    }

    fn keymap_layout_group(&mut self) -> usize {
        0
    }

    fn grab_pointer(&mut self, window: WindowId, _time: u32) -> Result<bool> {
        self.record(BackendCall::GrabPointer(window))?;
        Ok(!self.0.borrow().reject_pointer)
    }

    fn ungrab_pointer(&mut self, _time: u32) -> Result<()> {
        self.record(BackendCall::UngrabPointer)
    }

    fn grab_keyboard(&mut self, window: WindowId, _time: u32) -> Result<bool> {
        self.record(BackendCall::GrabKeyboard(window))?;
        Ok(!self.0.borrow().reject_keyboard)
    }

    fn ungrab_keyboard(&mut self, _time: u32) -> Result<()> {
        self.record(BackendCall::UngrabKeyboard)
    }

    fn grab_key(&mut self, target: GrabTarget, keycode: Keycode, mods: GrabModifiers) -> Result<()> {
        self.record(BackendCall::GrabKey(target, keycode, modifiers(mods)))
    }

    fn ungrab_key(&mut self, target: GrabTarget, keycode: Keycode, mods: GrabModifiers) -> Result<()> {
        self.record(BackendCall::UngrabKey(target, keycode, modifiers(mods)))
    }

    fn grab_button(&mut self, window: WindowId, button: u8, mods: GrabModifiers, sync: bool) -> Result<()> {
        self.record(BackendCall::GrabButton(window, button, modifiers(mods), sync))
    }

    fn ungrab_button(&mut self, window: WindowId, button: u8, mods: GrabModifiers) -> Result<()> {
        self.record(BackendCall::UngrabButton(window, button, modifiers(mods)))
    }

    fn allow_events(&mut self, device: FrozenDevice, mode: EventMode, _time: u32) -> Result<()> {
        self.record(BackendCall::AllowEvents(device, mode))
    }

    fn query_pointer(&mut self) -> Result<(i32, i32)> {
        Ok(self.0.borrow().pointer)
    }

    fn warp_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        self.0.borrow_mut().pointer = (x, y);
        self.record(BackendCall::WarpPointer(x, y))
    }

    fn current_time_roundtrip(&mut self) -> Result<u32> {
        let mut state = self.0.borrow_mut();
        state.time += 1;
        Ok(state.time)
    }

    fn restack(&mut self, bottom_to_top: &[WindowId]) -> Result<()> {
        self.record(BackendCall::Restack(bottom_to_top.to_vec()))
    }

    fn move_resize(&mut self, window: WindowId, geometry: Geometry) -> Result<()> {
        self.record(BackendCall::MoveResize(window, geometry))
    }

    fn set_keyboard_repeat(&mut self, repeat: KeyboardRepeat) -> Result<()> {
        self.record(BackendCall::SetKeyboardRepeat(repeat))
    }

    fn set_input_focus(&mut self, window: Option<WindowId>, _time: u32) -> Result<()> {
        self.record(BackendCall::SetInputFocus(window))
    }

    fn screen_geometry(&self) -> Geometry {
        Geometry::new(0, 0, 1920, 1080)
    }
}

/// A compositor hook invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorCall {
    HandleEvent(Option<WindowId>, EventMode),
    LocatePointer,
    ModifiersAcceleratorActivate,
    QueueCheckFullscreen,
    ReloadCursor(u32),
}

#[derive(Debug, Default)]
struct CompositorState {
    calls: Vec<CompositorCall>,
    capture_input: bool,
    pad_mapper_result: bool,
    gesture_result: bool,
    filter: Option<String>,
}

#[derive(Clone)]
pub struct CompositorHandle(Rc<RefCell<CompositorState>>);

impl CompositorHandle {
    pub fn calls(&self) -> Vec<CompositorCall> {
        self.0.borrow().calls.clone()
    }

    pub fn set_capture_input(&self, capture: bool) {
        self.0.borrow_mut().capture_input = capture;
    }

    pub fn set_pad_mapper_result(&self, result: bool) {
        self.0.borrow_mut().pad_mapper_result = result;
    }

    pub fn set_gesture_result(&self, result: bool) {
        self.0.borrow_mut().gesture_result = result;
    }

    /// Name of a binding the compositor filters out
    pub fn set_filter(&self, name: Option<String>) {
        self.0.borrow_mut().filter = name;
    }
}

struct RecordingCompositor(Rc<RefCell<CompositorState>>);

impl Compositor for RecordingCompositor {
    fn process_captured_input(&mut self, _event: &InputEvent) -> bool {
        self.0.borrow().capture_input
    }

    fn gesture_tracker_handle(&mut self, _event: &InputEvent) -> bool {
        self.0.borrow().gesture_result
    }

    fn pad_mapper_handle(&mut self, _event: &InputEvent) -> bool {
        self.0.borrow().pad_mapper_result
    }

    fn filter_keybinding(&mut self, binding: &KeyBinding) -> bool {
        self.0.borrow().filter.as_deref() == Some(binding.name.as_str())
    }

    fn handle_event(&mut self, _event: &InputEvent, window: Option<WindowId>, mode: EventMode) {
        self.0.borrow_mut().calls.push(CompositorCall::HandleEvent(window, mode));
    }

    fn modifiers_accelerator_activate(&mut self) -> bool {
        self.0.borrow_mut().calls.push(CompositorCall::ModifiersAcceleratorActivate);
        false
    }

    fn locate_pointer(&mut self) {
        self.0.borrow_mut().calls.push(CompositorCall::LocatePointer);
    }

    fn reload_cursor(&mut self, _theme: &str, size: u32) {
        self.0.borrow_mut().calls.push(CompositorCall::ReloadCursor(size));
    }

    fn queue_check_fullscreen(&mut self) {
        self.0.borrow_mut().calls.push(CompositorCall::QueueCheckFullscreen);
    }
}

/// Display over recording doubles, a custom configuration and keymap
pub fn display_with(config: &Config, keymap: Keymap) -> (Display, BackendHandle, CompositorHandle) {
    let backend = Rc::new(RefCell::new(BackendState {
        keymap,
        calls: Vec::new(),
        reject_pointer: false,
        reject_keyboard: false,
        pointer: (0, 0),
        time: 1000,
    }));
    let compositor = Rc::new(RefCell::new(CompositorState::default()));

    let display = Display::new(
        Box::new(FakeBackend(backend.clone())),
        Box::new(RecordingCompositor(compositor.clone())),
        Preferences::from_config(config),
    )
    .expect("display over fake backend");

    (display, BackendHandle(backend), CompositorHandle(compositor))
}

pub fn display_with_config(config: &Config) -> (Display, BackendHandle, CompositorHandle) {
    display_with(config, Keymap::us())
}

/// Display with the default configuration and the us keymap
pub fn display() -> (Display, BackendHandle, CompositorHandle) {
    display_with_config(&Config::default())
}

/// Manage a normal 200x100 window at `(10 * id, 10 * id)`
pub fn manage(display: &mut Display, id: u32) -> WindowId {
    let offset = id as i32 * 10;
    let client = Client::new(WindowId(id), WindowType::Normal, Geometry::new(offset, offset, 200, 100));
    display.manage_window(client)
}

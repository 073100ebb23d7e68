//! Window Manager Module
//!
//! The window manager core: the window stack and its constraints,
//! keyboard layout resolution, key bindings, grab operations and the
//! input event router, plus the X11 backend driving them.

pub mod accelerator;
pub mod backend;
pub mod client;
pub mod client_flags;
pub mod compositor;
pub mod constraints;
pub mod device;
pub mod display;
pub mod events;
pub mod ewmh;
pub mod focus;
pub mod grab;
pub mod handlers;
pub mod key_events;
pub mod keybindings;
pub mod keyboard;
pub mod keygrabs;
pub mod keymap;
pub mod keysyms;
pub mod moveresize;
pub mod settings;
pub mod signals;
pub mod stacking;
pub mod transients;
pub mod x11;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::Backend;
pub use compositor::Compositor;
pub use display::Display;

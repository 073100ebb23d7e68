//! area-core
//!
//! Window manager core for the area desktop: stacking, key bindings,
//! grab operations and input event routing over an X11 backend.

pub mod config;
pub mod shared;
pub mod wm;
pub mod x11_async;

//! Types shared between the window manager core and its backends.

pub mod window_state;

pub use window_state::Geometry;

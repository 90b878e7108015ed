//! Terminal state types shared by the emulator and the overlay engine.

mod state;

pub use state::{Cell, DrawState, Framebuffer, Renditions};

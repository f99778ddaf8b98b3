//! x11nest - headless X11 compositor and window capture
//!
//! Runs a private Xvfb session, tracks the top-level windows clients put
//! on it, keeps an RGBA copy of each one fresh through Composite and
//! Damage, and injects pointer and keyboard input into individual
//! windows.
//!
//! ```text
//! let mut compositor = Compositor::new(SessionConfig::default());
//! compositor.initialize();
//! // DISPLAY=<compositor.display_name()> some-client &
//! loop {
//!     compositor.pump(dt);
//!     for id in compositor.window_ids() { compositor.window_buffer(id); }
//! }
//! ```

pub mod backend;
pub mod capture;
pub mod compositor;
pub mod config;
mod dispatch;
pub mod engine;
pub mod input;
pub mod probe;
pub mod registry;
pub mod session;
pub mod x11;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use capture::Frame;
pub use compositor::Compositor;
pub use config::SessionConfig;
pub use engine::Engine;
pub use registry::WindowId;

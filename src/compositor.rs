//! Host-facing facade: one nested X session plus the engine driving it
//!
//! Everything here is safe to call in any state. Before [`Compositor::initialize`]
//! succeeds (or after [`Compositor::cleanup`]) queries return `None` or empty
//! values and input calls do nothing.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::capture::Frame;
use crate::config::SessionConfig;
use crate::engine::Engine;
use crate::registry::WindowId;
use crate::session::Session;
use crate::x11::X11Backend;

pub struct Compositor {
    config: SessionConfig,
    session: Option<Session>,
    engine: Option<Engine<X11Backend>>,
}

impl Compositor {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            session: None,
            engine: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start the server, connect, probe and scan. Returns false with
    /// everything torn down if any step fails; calling again retries.
    pub fn initialize(&mut self) -> bool {
        if self.is_initialized() {
            return true;
        }
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                error!("compositor setup failed: {e:#}");
                self.cleanup();
                false
            }
        }
    }

    fn try_initialize(&mut self) -> Result<()> {
        let session = Session::launch(&self.config)?;
        let name = session.display_name();
        let (number, pid) = (session.display_number(), session.pid());
        self.session = Some(session);

        let backend = X11Backend::connect(&name)?;
        let engine = Engine::start(backend).context("failed to start compositor engine")?;
        if self.config.require_composite && !engine.capabilities().can_capture() {
            bail!("Composite extension is required but not available on {}", name);
        }
        self.engine = Some(engine);
        info!(
            display_number = number,
            server_pid = ?pid,
            "compositor ready on {}",
            name
        );
        Ok(())
    }

    /// Tear down in order: damage, redirection, connection, server.
    /// Idempotent.
    pub fn cleanup(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
            // dropping the engine closes the connection
            drop(engine);
        }
        if let Some(mut session) = self.session.take() {
            session.terminate();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    /// Empty until initialized
    pub fn display_name(&self) -> String {
        match (&self.engine, &self.session) {
            (Some(_), Some(session)) => session.display_name(),
            _ => String::new(),
        }
    }

    /// One tick: drain events, then refresh captures. `_time_delta` is
    /// accepted for the host scheduler but unused.
    pub fn pump(&mut self, _time_delta: f64) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if let Err(e) = engine.pump() {
            error!("{e:#}; shutting down session");
            self.cleanup();
        }
    }

    pub fn engine(&self) -> Option<&Engine<X11Backend>> {
        self.engine.as_ref()
    }

    pub fn window_ids(&self) -> BTreeSet<WindowId> {
        self.engine
            .as_ref()
            .map(Engine::window_ids)
            .unwrap_or_default()
    }

    pub fn window_buffer(&self, id: WindowId) -> Option<Frame> {
        self.engine.as_ref()?.window_buffer(id)
    }

    pub fn window_size(&self, id: WindowId) -> Option<(u32, u32)> {
        self.engine.as_ref()?.window_size(id)
    }

    pub fn window_position(&self, id: WindowId) -> Option<(i32, i32)> {
        self.engine.as_ref()?.window_position(id)
    }

    pub fn window_class(&self, id: WindowId) -> Option<&str> {
        self.engine.as_ref()?.window_class(id)
    }

    pub fn window_title(&self, id: WindowId) -> Option<&str> {
        self.engine.as_ref()?.window_title(id)
    }

    pub fn window_pid(&self, id: WindowId) -> Option<u32> {
        self.engine.as_ref()?.window_pid(id)
    }

    pub fn parent_window_id(&self, id: WindowId) -> Option<WindowId> {
        self.engine.as_ref()?.parent_window_id(id)
    }

    pub fn is_window_mapped(&self, id: WindowId) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_window_mapped(id))
    }

    pub fn send_mouse_button(&mut self, id: WindowId, button: u8, pressed: bool, x: i32, y: i32) {
        if let Some(engine) = self.engine.as_mut() {
            engine.send_mouse_button(id, button, pressed, x, y);
        }
    }

    pub fn send_mouse_motion(&mut self, id: WindowId, x: i32, y: i32) {
        if let Some(engine) = self.engine.as_mut() {
            engine.send_mouse_motion(id, x, y);
        }
    }

    pub fn send_key_event(&mut self, id: WindowId, code: u32, pressed: bool) {
        match self.engine.as_mut() {
            Some(engine) => engine.send_key_event(id, code, pressed),
            None => warn!("key event for window {} before initialization", id),
        }
    }

    pub fn release_all_keys(&mut self, id: WindowId) {
        if let Some(engine) = self.engine.as_mut() {
            engine.release_all_keys(id);
        }
    }

    pub fn set_window_focus(&mut self, id: WindowId) {
        if let Some(engine) = self.engine.as_mut() {
            engine.set_focus(id);
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_server() -> SessionConfig {
        SessionConfig {
            server: "x11nest-no-such-server".into(),
            first_display: 4200,
            last_display: 4210,
            ..Default::default()
        }
    }

    #[test]
    fn test_cleanup_without_initialize() {
        let mut compositor = Compositor::new(SessionConfig::default());
        compositor.cleanup();
        compositor.cleanup();
        assert!(!compositor.is_initialized());
        assert_eq!(compositor.display_name(), "");
    }

    #[test]
    fn test_uninitialized_queries_are_empty() {
        let mut compositor = Compositor::new(SessionConfig::default());
        assert!(compositor.window_ids().is_empty());
        assert!(compositor.window_buffer(1).is_none());
        assert!(compositor.window_size(1).is_none());
        assert!(compositor.window_position(1).is_none());
        assert!(compositor.window_class(1).is_none());
        assert!(compositor.window_title(1).is_none());
        assert!(compositor.window_pid(1).is_none());
        assert!(compositor.parent_window_id(1).is_none());
        assert!(!compositor.is_window_mapped(1));

        compositor.pump(0.016);
        compositor.send_mouse_button(1, 1, true, 5, 5);
        compositor.send_mouse_motion(1, 5, 5);
        compositor.send_key_event(1, 'a' as u32, true);
        compositor.release_all_keys(1);
        compositor.set_window_focus(1);
        assert!(!compositor.is_initialized());
    }

    #[test]
    fn test_failed_initialize_leaves_nothing_behind() {
        let mut compositor = Compositor::new(unreachable_server());
        assert!(!compositor.initialize());
        assert!(!compositor.is_initialized());
        assert!(compositor.session.is_none());
        assert_eq!(compositor.display_name(), "");

        // retry is allowed and fails the same way
        assert!(!compositor.initialize());
        compositor.cleanup();
        assert!(!compositor.is_initialized());
    }
}

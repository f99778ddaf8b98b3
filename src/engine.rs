//! Core compositor state on top of a [`Backend`]
//!
//! The engine owns the backend, the probed capabilities, the window
//! registry and the input latch. It is driven by [`Engine::pump`] from a
//! single thread; see `dispatch`, `capture` and `input` for the per-tick
//! work.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::backend::{Backend, DamageHandle, SurfaceHandle};
use crate::capture::Frame;
use crate::input::InputState;
use crate::probe::{self, Capabilities};
use crate::registry::{self, Registry, WindowId};

pub struct Engine<B: Backend> {
    pub(crate) backend: B,
    pub(crate) caps: Capabilities,
    pub(crate) registry: Registry,
    pub(crate) input: InputState,
}

impl<B: Backend> Engine<B> {
    /// Probe extensions, listen on the root and pick up existing windows
    pub fn start(backend: B) -> Result<Self> {
        let caps = probe::probe(&backend);

        // SubstructureNotify only; redirecting would make us a window manager
        backend.watch_root().context("failed to select root events")?;

        let mut engine = Self {
            backend,
            caps,
            registry: Registry::new(),
            input: InputState::default(),
        };
        engine.scan()?;
        info!("tracking {} windows", engine.registry.len());
        Ok(engine)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn input_state(&self) -> &InputState {
        &self.input
    }

    fn scan(&mut self) -> Result<()> {
        let children = self
            .backend
            .children()
            .context("failed to query root children")?;
        for handle in children {
            if self.should_track(handle) {
                self.add(handle);
            }
        }
        Ok(())
    }

    pub(crate) fn should_track(&self, handle: SurfaceHandle) -> bool {
        self.backend
            .surface_info(handle)
            .is_some_and(|info| registry::should_track(&info))
    }

    /// Start tracking `handle`; no-op if it is already tracked or gone
    pub(crate) fn add(&mut self, handle: SurfaceHandle) {
        if self.registry.lookup(handle).is_some() {
            return;
        }
        let Some(info) = self.backend.surface_info(handle) else {
            return;
        };
        let metadata = self.backend.surface_metadata(handle);
        let parent = metadata
            .transient_for
            .and_then(|owner| self.registry.lookup(owner));

        let damage = if self.caps.tracks_damage() {
            match self.backend.create_damage(handle) {
                Ok(damage) => Some(damage),
                Err(e) => {
                    warn!("failed to create damage for 0x{handle:x}: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = self.backend.watch_surface(handle) {
            debug!("failed to select events on 0x{handle:x}: {e:#}");
        }

        let Some(window) = self.registry.insert(handle, &info) else {
            return;
        };
        window.title = metadata.title;
        window.class = metadata.class;
        window.pid = metadata.pid;
        window.parent = parent;
        window.damage = damage;

        info!(
            "tracking window {}: {:?} [{}] ({}x{})",
            window.id, window.title, window.class, window.width, window.height
        );
        if let Some(parent) = parent {
            debug!("window {} is transient for window {}", window.id, parent);
        }
    }

    /// Stop tracking `handle`, releasing its damage object first
    pub(crate) fn remove(&mut self, handle: SurfaceHandle) {
        let Some(id) = self.registry.lookup(handle) else {
            return;
        };
        info!("removing window {}", id);

        if let Some(damage) = self.registry.get(id).and_then(|w| w.damage) {
            self.release_damage(damage);
        }
        self.registry.remove(handle);
    }

    // the surface may already be gone server-side; sync on both sides so
    // any BadDamage lands here rather than on a later request
    fn release_damage(&self, damage: DamageHandle) {
        if let Err(e) = self.backend.sync() {
            debug!("sync before damage release failed: {e:#}");
        }
        if let Err(e) = self.backend.destroy_damage(damage) {
            debug!("damage 0x{damage:x} already gone: {e:#}");
        }
        if let Err(e) = self.backend.sync() {
            debug!("sync after damage release failed: {e:#}");
        }
    }

    /// Release every server-side resource the engine created.
    /// Idempotent; the backend is dropped by the caller afterwards.
    pub fn shutdown(&mut self) {
        for window in self.registry.drain() {
            if let Some(damage) = window.damage {
                if let Err(e) = self.backend.destroy_damage(damage) {
                    debug!("damage 0x{damage:x} already gone: {e:#}");
                }
            }
        }
        if self.caps.can_capture() {
            if let Err(e) = self.backend.unredirect_subwindows() {
                debug!("unredirect failed: {e:#}");
            }
            self.caps.composite = None;
        }
        if let Err(e) = self.backend.flush() {
            debug!("flush on shutdown failed: {e:#}");
        }
    }

    pub fn window_ids(&self) -> BTreeSet<WindowId> {
        self.registry.ids()
    }

    /// Cached image if valid; never captures
    pub fn window_buffer(&self, id: WindowId) -> Option<Frame> {
        let window = self.registry.get(id)?;
        if !window.has_image || window.image.is_empty() || window.width == 0 || window.height == 0 {
            return None;
        }
        Some(Frame {
            width: window.width,
            height: window.height,
            data: window.image.clone(),
        })
    }

    pub fn window_size(&self, id: WindowId) -> Option<(u32, u32)> {
        self.registry.get(id).map(|w| (w.width, w.height))
    }

    /// Root-relative origin; the cached x/y may be parent-relative
    pub fn window_position(&self, id: WindowId) -> Option<(i32, i32)> {
        let window = self.registry.get(id)?;
        let absolute = self.backend.translate_to_root(window.handle)?;
        debug!(
            "window {} position: attrs=({},{}) absolute=({},{})",
            id, window.x, window.y, absolute.0, absolute.1
        );
        Some(absolute)
    }

    pub fn window_class(&self, id: WindowId) -> Option<&str> {
        self.registry.get(id).map(|w| w.class.as_str())
    }

    pub fn window_title(&self, id: WindowId) -> Option<&str> {
        self.registry.get(id).map(|w| w.title.as_str())
    }

    pub fn window_pid(&self, id: WindowId) -> Option<u32> {
        self.registry.get(id).and_then(|w| w.pid)
    }

    pub fn parent_window_id(&self, id: WindowId) -> Option<WindowId> {
        self.registry.get(id).and_then(|w| w.parent)
    }

    pub fn is_window_mapped(&self, id: WindowId) -> bool {
        self.registry.get(id).is_some_and(|w| w.mapped)
    }
}

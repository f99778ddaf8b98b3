//! Per-tick event drain and routing

use anyhow::{Context, Result};
use tracing::{debug, trace};

use crate::backend::{Backend, SurfaceEvent};
use crate::engine::Engine;

impl<B: Backend> Engine<B> {
    /// One tick: apply every event queued so far, then refresh stale caches.
    ///
    /// Events that arrive while this tick runs are left for the next one.
    /// An error means the connection is unusable.
    pub fn pump(&mut self) -> Result<()> {
        let events = self
            .backend
            .poll_events()
            .context("lost connection to display server")?;
        for event in events {
            self.dispatch(event);
        }
        self.capture_pending();
        Ok(())
    }

    pub(crate) fn dispatch(&mut self, event: SurfaceEvent) {
        trace!(?event, "dispatch");
        match event {
            SurfaceEvent::Created(handle) => {
                if self.should_track(handle) {
                    self.add(handle);
                }
            }
            SurfaceEvent::Destroyed(handle) => self.remove(handle),
            SurfaceEvent::Mapped(handle) => match self.registry.lookup(handle) {
                Some(id) => {
                    self.registry.set_mapped(id, true);
                    debug!("window {} mapped", id);
                }
                // may have grown past the filter since it was created
                None if self.should_track(handle) => self.add(handle),
                None => {}
            },
            SurfaceEvent::Unmapped(handle) => {
                if let Some(id) = self.registry.lookup(handle) {
                    self.registry.set_mapped(id, false);
                    debug!("window {} unmapped", id);
                }
            }
            SurfaceEvent::GeometryChanged { handle, geometry } => {
                if let Some(id) = self.registry.lookup(handle) {
                    if self.registry.apply_geometry(id, &geometry) {
                        debug!(
                            "window {} resized to {}x{}",
                            id, geometry.width, geometry.height
                        );
                    }
                }
            }
            SurfaceEvent::Damaged(damage) => {
                if let Some(id) = self.registry.find_by_damage(damage) {
                    if let Err(e) = self.backend.subtract_damage(damage) {
                        debug!("damage subtract failed for window {}: {e:#}", id);
                    }
                    self.registry.invalidate(id);
                }
            }
        }
    }
}

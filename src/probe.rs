//! Optional extension discovery

use tracing::{info, warn};

use crate::backend::{Backend, Extension, ExtensionInfo};

/// Which advanced paths this session can use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub composite: Option<ExtensionInfo>,
    pub damage: Option<ExtensionInfo>,
}

impl Capabilities {
    /// Surface content can be read back at all
    pub fn can_capture(&self) -> bool {
        self.composite.is_some()
    }

    /// Damage events invalidate the cache; otherwise every tick recaptures
    pub fn tracks_damage(&self) -> bool {
        self.damage.is_some()
    }
}

/// Query extensions and enable session-wide redirection when possible
pub fn probe<B: Backend>(backend: &B) -> Capabilities {
    let composite = match query(backend, Extension::Composite) {
        Some(ext) => match backend.redirect_subwindows() {
            Ok(()) => Some(ext),
            Err(e) => {
                warn!("failed to redirect subwindows: {e:#}");
                None
            }
        },
        None => None,
    };
    if composite.is_none() {
        warn!("Composite extension not available - window capture disabled");
    }

    let damage = query(backend, Extension::Damage);
    if damage.is_none() {
        info!("DAMAGE extension not available - capturing every tick");
    }

    Capabilities { composite, damage }
}

fn query<B: Backend>(backend: &B, extension: Extension) -> Option<ExtensionInfo> {
    match backend.query_extension(extension) {
        Ok(Some(ext)) => {
            info!(
                "{} extension: {}.{} (first event {})",
                extension.name(),
                ext.major_version,
                ext.minor_version,
                ext.first_event
            );
            Some(ext)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("{} query failed: {e:#}", extension.name());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    #[test]
    fn test_probe_full_support_redirects_once() {
        let backend = FakeBackend::new();
        let caps = probe(&backend);
        assert!(caps.can_capture());
        assert!(caps.tracks_damage());
        assert_eq!(backend.redirects.get(), 1);
    }

    #[test]
    fn test_probe_without_damage_falls_back_to_polling() {
        let backend = FakeBackend::new().without_damage();
        let caps = probe(&backend);
        assert!(caps.can_capture());
        assert!(!caps.tracks_damage());
    }

    #[test]
    fn test_probe_without_composite_disables_capture() {
        let backend = FakeBackend::new().without_composite();
        let caps = probe(&backend);
        assert!(!caps.can_capture());
        assert_eq!(backend.redirects.get(), 0);
    }
}

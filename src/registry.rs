//! Tracked windows, keyed by internal id with a reverse index by handle

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::backend::{DamageHandle, Geometry, SurfaceHandle, SurfaceInfo};

/// Internal window id; never reused within a session
pub type WindowId = u32;

/// Surfaces smaller than this in either dimension are ignored
pub const MIN_TRACKED_SIZE: u32 = 10;

/// Decide whether a surface is worth compositing
pub fn should_track(info: &SurfaceInfo) -> bool {
    if info.input_only {
        return false;
    }
    // popup menus can be as small as 50x20, so only drop the really tiny ones
    if info.geometry.width < MIN_TRACKED_SIZE || info.geometry.height < MIN_TRACKED_SIZE {
        return false;
    }
    info.managed || info.viewable
}

/// One tracked client surface
#[derive(Debug, Clone)]
pub struct Window {
    pub id: WindowId,
    pub handle: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    /// Parent-relative; use the backend for root coordinates
    pub x: i32,
    pub y: i32,
    pub mapped: bool,
    pub pid: Option<u32>,
    pub class: String,
    pub title: String,
    pub parent: Option<WindowId>,
    pub damage: Option<DamageHandle>,
    pub has_image: bool,
    /// RGBA8, `width * height * 4` bytes while `has_image` holds
    pub image: Vec<u8>,
}

impl Window {
    fn new(id: WindowId, handle: SurfaceHandle, info: &SurfaceInfo) -> Self {
        Self {
            id,
            handle,
            width: info.geometry.width,
            height: info.geometry.height,
            x: info.geometry.x,
            y: info.geometry.y,
            mapped: info.viewable,
            pid: None,
            class: String::new(),
            title: String::new(),
            parent: None,
            damage: None,
            has_image: false,
            image: Vec::new(),
        }
    }

    pub fn image_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Arena of windows plus the handle index.
///
/// Both maps and the dirty set only change together, through the methods
/// below.
#[derive(Debug)]
pub struct Registry {
    windows: BTreeMap<WindowId, Window>,
    by_handle: HashMap<SurfaceHandle, WindowId>,
    dirty: BTreeSet<WindowId>,
    next_id: WindowId,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            windows: BTreeMap::new(),
            by_handle: HashMap::new(),
            dirty: BTreeSet::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn lookup(&self, handle: SurfaceHandle) -> Option<WindowId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn ids(&self) -> BTreeSet<WindowId> {
        self.windows.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.windows.values()
    }

    /// Ids of windows whose cached image is stale
    pub fn dirty_ids(&self) -> Vec<WindowId> {
        self.dirty.iter().copied().collect()
    }

    /// Track a new surface. Returns `None` if the handle is already known.
    pub(crate) fn insert(&mut self, handle: SurfaceHandle, info: &SurfaceInfo) -> Option<&mut Window> {
        if self.by_handle.contains_key(&handle) {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        self.by_handle.insert(handle, id);
        self.dirty.insert(id);
        Some(self.windows.entry(id).or_insert_with(|| Window::new(id, handle, info)))
    }

    pub(crate) fn remove(&mut self, handle: SurfaceHandle) -> Option<Window> {
        let id = self.by_handle.remove(&handle)?;
        self.dirty.remove(&id);
        self.windows.remove(&id)
    }

    /// Remove every window, e.g. on teardown
    pub(crate) fn drain(&mut self) -> Vec<Window> {
        self.by_handle.clear();
        self.dirty.clear();
        std::mem::take(&mut self.windows).into_values().collect()
    }

    pub fn find_by_damage(&self, damage: DamageHandle) -> Option<WindowId> {
        self.windows
            .values()
            .find(|w| w.damage == Some(damage))
            .map(|w| w.id)
    }

    pub(crate) fn set_mapped(&mut self, id: WindowId, mapped: bool) -> bool {
        match self.windows.get_mut(&id) {
            Some(window) => {
                window.mapped = mapped;
                true
            }
            None => false,
        }
    }

    /// Mark the cached image stale
    pub(crate) fn invalidate(&mut self, id: WindowId) {
        if let Some(window) = self.windows.get_mut(&id) {
            window.has_image = false;
            self.dirty.insert(id);
        }
    }

    /// Apply a configure. Returns true if the size changed, in which case
    /// the cache is invalidated.
    pub(crate) fn apply_geometry(&mut self, id: WindowId, geometry: &Geometry) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        let resized = window.width != geometry.width || window.height != geometry.height;
        window.x = geometry.x;
        window.y = geometry.y;
        window.width = geometry.width;
        window.height = geometry.height;
        if resized {
            self.invalidate(id);
        }
        resized
    }

    /// Store a freshly converted image. Rejected if its length does not
    /// match the window's current size.
    pub(crate) fn store_image(&mut self, id: WindowId, image: Vec<u8>) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        if image.len() != window.image_len() {
            return false;
        }
        window.image = image;
        window.has_image = true;
        self.dirty.remove(&id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32) -> SurfaceInfo {
        SurfaceInfo {
            geometry: Geometry {
                x: 0,
                y: 0,
                width,
                height,
            },
            input_only: false,
            viewable: true,
            managed: false,
        }
    }

    #[test]
    fn test_filter_rejects_small_surfaces() {
        for (w, h) in [(9, 100), (100, 9), (0, 0), (9, 9)] {
            let mut managed = info(w, h);
            managed.managed = true;
            assert!(!should_track(&managed), "{}x{} managed", w, h);
            assert!(!should_track(&info(w, h)), "{}x{} viewable", w, h);
        }
    }

    #[test]
    fn test_filter_accepts_managed_popup_size() {
        let mut popup = info(50, 20);
        popup.viewable = false;
        popup.managed = true;
        assert!(should_track(&popup));
    }

    #[test]
    fn test_filter_rejects_input_only_and_unmapped() {
        let mut input_only = info(200, 200);
        input_only.input_only = true;
        input_only.managed = true;
        assert!(!should_track(&input_only));

        let mut hidden = info(200, 200);
        hidden.viewable = false;
        assert!(!should_track(&hidden));
    }

    #[test]
    fn test_ids_strictly_increase_and_are_not_reused() {
        let mut registry = Registry::new();
        let mut issued = Vec::new();

        for handle in 100..105 {
            issued.push(registry.insert(handle, &info(20, 20)).unwrap().id);
        }
        registry.remove(102);
        registry.remove(104);
        issued.push(registry.insert(102, &info(20, 20)).unwrap().id);
        issued.push(registry.insert(200, &info(20, 20)).unwrap().id);

        assert!(issued.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(issued, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_insert_known_handle_is_noop() {
        let mut registry = Registry::new();
        assert!(registry.insert(7, &info(20, 20)).is_some());
        assert!(registry.insert(7, &info(30, 30)).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().width, 20);
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let mut registry = Registry::new();
        let id = registry.insert(7, &info(20, 20)).unwrap().id;
        assert!(registry.remove(7).is_some());
        assert!(registry.lookup(7).is_none());
        assert!(registry.get(id).is_none());
        assert!(registry.dirty_ids().is_empty());
        assert!(registry.remove(7).is_none());
    }

    #[test]
    fn test_resize_invalidates_but_move_does_not() {
        let mut registry = Registry::new();
        let id = registry.insert(7, &info(20, 20)).unwrap().id;
        assert!(registry.store_image(id, vec![0; 20 * 20 * 4]));
        assert!(registry.dirty_ids().is_empty());

        let moved = Geometry {
            x: 5,
            y: 5,
            width: 20,
            height: 20,
        };
        assert!(!registry.apply_geometry(id, &moved));
        assert!(registry.get(id).unwrap().has_image);

        let taller = Geometry { height: 40, ..moved };
        assert!(registry.apply_geometry(id, &taller));
        assert!(!registry.get(id).unwrap().has_image);
        assert_eq!(registry.dirty_ids(), vec![id]);
    }

    #[test]
    fn test_store_image_rejects_wrong_length() {
        let mut registry = Registry::new();
        let id = registry.insert(7, &info(20, 20)).unwrap().id;
        assert!(!registry.store_image(id, vec![0; 10]));
        assert!(!registry.get(id).unwrap().has_image);
    }
}

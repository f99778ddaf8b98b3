//! In-memory backend for unit tests

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{bail, Result};

use crate::backend::{
    Backend, ByteOrder, ChannelMasks, DamageHandle, Extension, ExtensionInfo, Geometry,
    InjectedEvent, RawImage, SurfaceEvent, SurfaceHandle, SurfaceInfo, SurfaceMetadata,
};

pub const ROOT: SurfaceHandle = 1;

/// Extra bytes at the end of every fake scanline
pub const ROW_PADDING: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Sync,
    Flush,
    DestroyDamage(DamageHandle),
    SubtractDamage(DamageHandle),
    Unredirect,
    Focus(SurfaceHandle),
}

pub struct FakeSurface {
    pub info: SurfaceInfo,
    pub metadata: SurfaceMetadata,
    pub origin: (i32, i32),
    /// Native B, G, R, X bytes
    pub fill: [u8; 4],
}

pub struct FakeBackend {
    composite: bool,
    damage: bool,
    pub surfaces: RefCell<HashMap<SurfaceHandle, FakeSurface>>,
    pub children: RefCell<Vec<SurfaceHandle>>,
    pub queue: RefCell<VecDeque<SurfaceEvent>>,
    pub keymap: HashMap<u32, u8>,
    next_damage: Cell<DamageHandle>,
    pub live_damage: RefCell<HashSet<DamageHandle>>,
    pub watched: RefCell<Vec<SurfaceHandle>>,
    pub redirects: Cell<u32>,
    pub reads: Cell<u32>,
    pub sent: RefCell<Vec<(SurfaceHandle, InjectedEvent)>>,
    pub calls: RefCell<Vec<Call>>,
    pub disconnected: Cell<bool>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let keymap = HashMap::from([
            (0x61, 38),   // a
            (0x41, 38),   // A
            (0x20, 65),   // space
            (0xff0d, 36), // Return
            (0xff1b, 9),  // Escape
            (0xff51, 113), // Left
            (0xffe1, 50), // Shift_L
            (0xffe3, 37), // Control_L
            (0xffe9, 64), // Alt_L
            (0xffe7, 133), // Meta_L
            (0xffbe, 67), // F1
        ]);
        Self {
            composite: true,
            damage: true,
            surfaces: RefCell::new(HashMap::new()),
            children: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            keymap,
            next_damage: Cell::new(0x500),
            live_damage: RefCell::new(HashSet::new()),
            watched: RefCell::new(Vec::new()),
            redirects: Cell::new(0),
            reads: Cell::new(0),
            sent: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            disconnected: Cell::new(false),
        }
    }

    pub fn without_damage(mut self) -> Self {
        self.damage = false;
        self
    }

    pub fn without_composite(mut self) -> Self {
        self.composite = false;
        self
    }

    /// A viewable, managed surface that is already a root child
    pub fn add_surface(&self, handle: SurfaceHandle, width: u32, height: u32) {
        let info = SurfaceInfo {
            geometry: Geometry {
                x: 0,
                y: 0,
                width,
                height,
            },
            input_only: false,
            viewable: true,
            managed: true,
        };
        self.surfaces.borrow_mut().insert(
            handle,
            FakeSurface {
                info,
                metadata: SurfaceMetadata::default(),
                origin: (0, 0),
                fill: [0x10, 0x20, 0x30, 0x00],
            },
        );
        self.children.borrow_mut().push(handle);
    }

    pub fn with_surface<F: FnOnce(&mut FakeSurface)>(&self, handle: SurfaceHandle, f: F) {
        if let Some(surface) = self.surfaces.borrow_mut().get_mut(&handle) {
            f(surface);
        }
    }

    pub fn forget_surface(&self, handle: SurfaceHandle) {
        self.surfaces.borrow_mut().remove(&handle);
        self.children.borrow_mut().retain(|&h| h != handle);
    }

    pub fn push(&self, event: SurfaceEvent) {
        self.queue.borrow_mut().push_back(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl Backend for FakeBackend {
    fn root(&self) -> SurfaceHandle {
        ROOT
    }

    fn query_extension(&self, extension: Extension) -> Result<Option<ExtensionInfo>> {
        let (present, first_event) = match extension {
            Extension::Composite => (self.composite, 0),
            Extension::Damage => (self.damage, 91),
        };
        Ok(present.then_some(ExtensionInfo {
            major_version: 1,
            minor_version: 1,
            first_event,
        }))
    }

    fn redirect_subwindows(&self) -> Result<()> {
        self.redirects.set(self.redirects.get() + 1);
        Ok(())
    }

    fn unredirect_subwindows(&self) -> Result<()> {
        self.record(Call::Unredirect);
        Ok(())
    }

    fn watch_root(&self) -> Result<()> {
        self.watched.borrow_mut().push(ROOT);
        Ok(())
    }

    fn watch_surface(&self, handle: SurfaceHandle) -> Result<()> {
        self.watched.borrow_mut().push(handle);
        Ok(())
    }

    fn children(&self) -> Result<Vec<SurfaceHandle>> {
        Ok(self.children.borrow().clone())
    }

    fn surface_info(&self, handle: SurfaceHandle) -> Option<SurfaceInfo> {
        self.surfaces.borrow().get(&handle).map(|s| s.info)
    }

    fn surface_metadata(&self, handle: SurfaceHandle) -> SurfaceMetadata {
        self.surfaces
            .borrow()
            .get(&handle)
            .map(|s| s.metadata.clone())
            .unwrap_or_default()
    }

    fn create_damage(&self, _handle: SurfaceHandle) -> Result<DamageHandle> {
        let damage = self.next_damage.get();
        self.next_damage.set(damage + 1);
        self.live_damage.borrow_mut().insert(damage);
        Ok(damage)
    }

    fn destroy_damage(&self, damage: DamageHandle) -> Result<()> {
        self.record(Call::DestroyDamage(damage));
        self.live_damage.borrow_mut().remove(&damage);
        Ok(())
    }

    fn subtract_damage(&self, damage: DamageHandle) -> Result<()> {
        self.record(Call::SubtractDamage(damage));
        Ok(())
    }

    fn poll_events(&self) -> Result<Vec<SurfaceEvent>> {
        if self.disconnected.get() {
            bail!("connection closed");
        }
        Ok(self.queue.borrow_mut().drain(..).collect())
    }

    fn read_pixels(&self, handle: SurfaceHandle, width: u32, height: u32) -> Result<RawImage> {
        self.reads.set(self.reads.get() + 1);
        let surfaces = self.surfaces.borrow();
        let Some(surface) = surfaces.get(&handle) else {
            bail!("BadDrawable");
        };
        let stride = width as usize * 4 + ROW_PADDING;
        let mut data = vec![0xee; stride * height as usize];
        for row in data.chunks_exact_mut(stride) {
            for px in row[..width as usize * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&surface.fill);
            }
        }
        Ok(RawImage {
            width,
            height,
            stride,
            bits_per_pixel: 32,
            byte_order: ByteOrder::LsbFirst,
            masks: ChannelMasks::default(),
            has_alpha: false,
            data,
        })
    }

    fn translate_to_root(&self, handle: SurfaceHandle) -> Option<(i32, i32)> {
        self.surfaces.borrow().get(&handle).map(|s| s.origin)
    }

    fn keysym_to_keycode(&self, keysym: u32) -> Option<u8> {
        self.keymap.get(&keysym).copied()
    }

    fn send_input(&self, handle: SurfaceHandle, event: &InjectedEvent) -> Result<()> {
        self.sent.borrow_mut().push((handle, *event));
        Ok(())
    }

    fn focus(&self, handle: SurfaceHandle) -> Result<()> {
        self.record(Call::Focus(handle));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.record(Call::Flush);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.record(Call::Sync);
        Ok(())
    }
}

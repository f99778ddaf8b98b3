//! Windowing backend seam
//!
//! Everything the core needs from the display server goes through
//! [`Backend`]. The X11 implementation lives in [`crate::x11`]; tests use
//! an in-memory double.

use anyhow::Result;

/// Protocol-level surface handle (an X11 window id)
pub type SurfaceHandle = u32;

/// Protocol-level damage object handle
pub type DamageHandle = u32;

/// Optional server extensions the core cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Composite,
    Damage,
}

impl Extension {
    pub fn name(self) -> &'static str {
        match self {
            Extension::Composite => "Composite",
            Extension::Damage => "DAMAGE",
        }
    }
}

/// Result of a successful extension query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub major_version: u32,
    pub minor_version: u32,
    /// Event code offset for this extension's events in the generic stream
    pub first_event: u8,
}

/// Position and size of a surface relative to its parent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Attributes used by the tracking filter and to seed a new window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub geometry: Geometry,
    /// InputOnly surfaces carry no pixel content
    pub input_only: bool,
    /// Map state is "viewable" (mapped and all ancestors mapped)
    pub viewable: bool,
    /// Carries a WM_STATE property, i.e. a managed top-level
    pub managed: bool,
}

/// Best-effort client metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceMetadata {
    pub title: String,
    pub class: String,
    pub pid: Option<u32>,
    pub transient_for: Option<SurfaceHandle>,
}

/// Typed protocol events the dispatcher consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Created(SurfaceHandle),
    Destroyed(SurfaceHandle),
    Mapped(SurfaceHandle),
    Unmapped(SurfaceHandle),
    GeometryChanged {
        handle: SurfaceHandle,
        geometry: Geometry,
    },
    Damaged(DamageHandle),
}

/// Byte order of packed pixels in a raw image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LsbFirst,
    MsbFirst,
}

/// Channel masks of the source visual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl Default for ChannelMasks {
    fn default() -> Self {
        Self {
            red: 0x00ff_0000,
            green: 0x0000_ff00,
            blue: 0x0000_00ff,
        }
    }
}

/// Pixels as read back from a surface's off-screen storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// Bytes per row; may exceed `width * bytes_per_pixel`
    pub stride: usize,
    pub bits_per_pixel: u8,
    pub byte_order: ByteOrder,
    pub masks: ChannelMasks,
    /// Bits outside the colour masks hold meaningful alpha
    pub has_alpha: bool,
    pub data: Vec<u8>,
}

/// A synthetic input event addressed to one surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedEvent {
    Button {
        button: u8,
        pressed: bool,
        local: (i16, i16),
        root: (i16, i16),
    },
    Motion {
        local: (i16, i16),
        root: (i16, i16),
    },
    Key {
        keycode: u8,
        pressed: bool,
        state: u16,
    },
}

/// Synchronous access to a windowing protocol connection.
///
/// Query methods return `None` when the handle is already gone; the core
/// treats that as "not trackable" rather than an error.
pub trait Backend {
    fn root(&self) -> SurfaceHandle;

    fn query_extension(&self, extension: Extension) -> Result<Option<ExtensionInfo>>;

    /// Redirect all root children to off-screen storage
    fn redirect_subwindows(&self) -> Result<()>;
    fn unredirect_subwindows(&self) -> Result<()>;

    /// Ask for create/destroy/map/unmap/configure of root children
    fn watch_root(&self) -> Result<()>;
    /// Ask for structure changes on a single surface
    fn watch_surface(&self, handle: SurfaceHandle) -> Result<()>;

    fn children(&self) -> Result<Vec<SurfaceHandle>>;
    fn surface_info(&self, handle: SurfaceHandle) -> Option<SurfaceInfo>;
    fn surface_metadata(&self, handle: SurfaceHandle) -> SurfaceMetadata;

    fn create_damage(&self, handle: SurfaceHandle) -> Result<DamageHandle>;
    fn destroy_damage(&self, damage: DamageHandle) -> Result<()>;
    fn subtract_damage(&self, damage: DamageHandle) -> Result<()>;

    /// Drain the events queued right now without blocking
    fn poll_events(&self) -> Result<Vec<SurfaceEvent>>;

    fn read_pixels(&self, handle: SurfaceHandle, width: u32, height: u32) -> Result<RawImage>;

    /// Origin of `handle` in root coordinates
    fn translate_to_root(&self, handle: SurfaceHandle) -> Option<(i32, i32)>;
    fn keysym_to_keycode(&self, keysym: u32) -> Option<u8>;

    fn send_input(&self, handle: SurfaceHandle, event: &InjectedEvent) -> Result<()>;
    /// Give input focus to `handle` and raise it to the top
    fn focus(&self, handle: SurfaceHandle) -> Result<()>;

    fn flush(&self) -> Result<()>;
    /// Flush and wait until the server has processed every request
    fn sync(&self) -> Result<()>;
}

//! Off-screen readback and RGBA8 normalization

use tracing::{debug, warn};

use crate::backend::{Backend, ByteOrder, RawImage};
use crate::engine::Engine;
use crate::registry::WindowId;

/// A cached window image, RGBA8, tightly packed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl<B: Backend> Engine<B> {
    /// Refresh one window's cache if it needs it. Returns true if pixels
    /// were read and stored.
    pub fn capture(&mut self, id: WindowId) -> bool {
        if !self.caps.can_capture() {
            return false;
        }
        let Some(window) = self.registry.get(id) else {
            return false;
        };
        if !window.mapped || window.width == 0 || window.height == 0 {
            return false;
        }
        // without damage events there is nothing telling us the cache went stale
        if window.has_image && self.caps.tracks_damage() {
            return false;
        }

        let (handle, width, height) = (window.handle, window.width, window.height);
        let raw = match self.backend.read_pixels(handle, width, height) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("capture of window {} failed: {e:#}", id);
                return false;
            }
        };
        let Some(rgba) = convert_to_rgba(&raw) else {
            warn!(
                "unsupported image format for window {}: {} bits per pixel",
                id, raw.bits_per_pixel
            );
            return false;
        };
        self.registry.store_image(id, rgba)
    }

    /// Capture every window that may need it this tick
    pub(crate) fn capture_pending(&mut self) {
        if !self.caps.can_capture() {
            return;
        }
        let candidates = if self.caps.tracks_damage() {
            self.registry.dirty_ids()
        } else {
            self.registry.ids().into_iter().collect()
        };
        for id in candidates {
            self.capture(id);
        }
    }
}

/// Convert packed 32-bit pixels into RGBA8, honouring row stride.
///
/// Channels are located through the visual's masks, so BGRX, XRGB and
/// friends all land in R, G, B, A order. Without an alpha channel the
/// output is fully opaque.
pub fn convert_to_rgba(raw: &RawImage) -> Option<Vec<u8>> {
    if raw.bits_per_pixel != 32 {
        return None;
    }
    let width = raw.width as usize;
    let height = raw.height as usize;
    let row_bytes = width * 4;
    if raw.stride < row_bytes {
        return None;
    }
    if height > 0 && raw.data.len() < raw.stride * (height - 1) + row_bytes {
        return None;
    }

    let masks = raw.masks;
    let alpha_mask = !(masks.red | masks.green | masks.blue);
    let mut out = vec![0u8; row_bytes * height];

    for (y, dst_row) in out.chunks_exact_mut(row_bytes).enumerate() {
        let src_row = &raw.data[y * raw.stride..y * raw.stride + row_bytes];
        for (src, dst) in src_row.chunks_exact(4).zip(dst_row.chunks_exact_mut(4)) {
            let bytes = [src[0], src[1], src[2], src[3]];
            let pixel = match raw.byte_order {
                ByteOrder::LsbFirst => u32::from_le_bytes(bytes),
                ByteOrder::MsbFirst => u32::from_be_bytes(bytes),
            };
            dst[0] = channel(pixel, masks.red);
            dst[1] = channel(pixel, masks.green);
            dst[2] = channel(pixel, masks.blue);
            dst[3] = if raw.has_alpha {
                channel(pixel, alpha_mask)
            } else {
                0xff
            };
        }
    }
    Some(out)
}

fn channel(pixel: u32, mask: u32) -> u8 {
    if mask == 0 {
        return 0;
    }
    let value = (pixel & mask) >> mask.trailing_zeros();
    let bits = (mask >> mask.trailing_zeros()).count_ones();
    match bits {
        8 => value as u8,
        // widen or narrow to 8 bits
        b if b < 8 => ((value * 255) / ((1 << b) - 1)) as u8,
        b => (value >> (b - 8)) as u8,
    }
}

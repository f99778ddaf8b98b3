//! Synthetic pointer and keyboard events addressed to tracked windows
//!
//! Key codes come from the host in its own numbering: special keys live
//! in the `0x40_0000` range, printable keys are their Unicode value.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::backend::{Backend, InjectedEvent, SurfaceHandle};
use crate::engine::Engine;
use crate::registry::WindowId;

/// Host key codes for non-printable keys
pub mod key {
    pub const SPECIAL: u32 = 0x40_0000;
    pub const ESCAPE: u32 = SPECIAL | 0x01;
    pub const TAB: u32 = SPECIAL | 0x02;
    pub const BACKSPACE: u32 = SPECIAL | 0x04;
    pub const ENTER: u32 = SPECIAL | 0x05;
    pub const INSERT: u32 = SPECIAL | 0x07;
    pub const DELETE: u32 = SPECIAL | 0x08;
    pub const HOME: u32 = SPECIAL | 0x09;
    pub const END: u32 = SPECIAL | 0x0a;
    pub const PAGE_UP: u32 = SPECIAL | 0x0b;
    pub const PAGE_DOWN: u32 = SPECIAL | 0x0c;
    pub const LEFT: u32 = SPECIAL | 0x0f;
    pub const UP: u32 = SPECIAL | 0x10;
    pub const RIGHT: u32 = SPECIAL | 0x11;
    pub const DOWN: u32 = SPECIAL | 0x12;
    pub const SHIFT: u32 = SPECIAL | 0x15;
    pub const CTRL: u32 = SPECIAL | 0x16;
    pub const META: u32 = SPECIAL | 0x17;
    pub const ALT: u32 = SPECIAL | 0x18;
    pub const F1: u32 = SPECIAL | 0x1c;
    pub const F12: u32 = SPECIAL | 0x27;
    pub const SPACE: u32 = 0x20;
}

/// X keysyms for the keys above
mod keysym {
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const HOME: u32 = 0xff50;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const END: u32 = 0xff57;
    pub const INSERT: u32 = 0xff63;
    pub const F1: u32 = 0xffbe;
    pub const SHIFT_L: u32 = 0xffe1;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const META_L: u32 = 0xffe7;
    pub const ALT_L: u32 = 0xffe9;
    pub const DELETE: u32 = 0xffff;
    pub const SPACE: u32 = 0x20;
    /// Offset for keysyms that encode a Unicode codepoint directly
    pub const UNICODE: u32 = 0x0100_0000;
}

/// Modifier bits as carried in a key event's state field
pub mod modifier {
    pub const SHIFT: u16 = 1 << 0;
    pub const CONTROL: u16 = 1 << 2;
    pub const MOD1: u16 = 1 << 3;
}

/// Map a host key code to an X keysym
pub fn key_to_keysym(code: u32) -> u32 {
    match code {
        key::ENTER => keysym::RETURN,
        key::BACKSPACE => keysym::BACKSPACE,
        key::ESCAPE => keysym::ESCAPE,
        key::TAB => keysym::TAB,
        key::SPACE => keysym::SPACE,
        key::LEFT => keysym::LEFT,
        key::UP => keysym::UP,
        key::RIGHT => keysym::RIGHT,
        key::DOWN => keysym::DOWN,
        key::SHIFT => keysym::SHIFT_L,
        key::CTRL => keysym::CONTROL_L,
        key::ALT => keysym::ALT_L,
        key::META => keysym::META_L,
        key::F1..=key::F12 => keysym::F1 + (code - key::F1),
        key::DELETE => keysym::DELETE,
        key::INSERT => keysym::INSERT,
        key::HOME => keysym::HOME,
        key::END => keysym::END,
        key::PAGE_UP => keysym::PAGE_UP,
        key::PAGE_DOWN => keysym::PAGE_DOWN,
        // Latin-1 keysyms equal their codepoint
        c if c < 0x100 => c,
        c if c < key::SPECIAL => keysym::UNICODE | c,
        c => c,
    }
}

fn modifier_for(code: u32) -> Option<u16> {
    match code {
        key::SHIFT => Some(modifier::SHIFT),
        key::CTRL => Some(modifier::CONTROL),
        key::ALT | key::META => Some(modifier::MOD1),
        _ => None,
    }
}

/// Latched modifiers and held keys, owned by one engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputState {
    modifiers: u16,
    held: BTreeSet<u8>,
}

impl InputState {
    pub fn modifiers(&self) -> u16 {
        self.modifiers
    }

    pub fn held_keys(&self) -> impl Iterator<Item = u8> + '_ {
        self.held.iter().copied()
    }

    /// Record a key transition and build the event, stamped with the
    /// modifier state after this transition
    pub fn key_event(&mut self, code: u32, keycode: u8, pressed: bool) -> InjectedEvent {
        if let Some(mask) = modifier_for(code) {
            if pressed {
                self.modifiers |= mask;
            } else {
                self.modifiers &= !mask;
            }
        }
        if pressed {
            self.held.insert(keycode);
        } else {
            self.held.remove(&keycode);
        }
        InjectedEvent::Key {
            keycode,
            pressed,
            state: self.modifiers,
        }
    }

    fn clear(&mut self) -> BTreeSet<u8> {
        self.modifiers = 0;
        std::mem::take(&mut self.held)
    }
}

fn clamp_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Root position of window-local (x, y), saturating at the i32 bounds
fn root_point(origin: (i32, i32), x: i32, y: i32) -> (i32, i32) {
    (origin.0.saturating_add(x), origin.1.saturating_add(y))
}

impl<B: Backend> Engine<B> {
    /// Press or release `button` at window-local (x, y)
    pub fn send_mouse_button(&mut self, id: WindowId, button: u8, pressed: bool, x: i32, y: i32) {
        let Some((handle, origin)) = self.resolve_origin(id) else {
            return;
        };
        let root = root_point(origin, x, y);
        debug!(
            "mouse button {} {} on window {} at ({},{}) root ({},{})",
            button,
            if pressed { "press" } else { "release" },
            id,
            x,
            y,
            root.0,
            root.1
        );
        let event = InjectedEvent::Button {
            button,
            pressed,
            local: (clamp_i16(x), clamp_i16(y)),
            root: (clamp_i16(root.0), clamp_i16(root.1)),
        };
        self.deliver(id, handle, &event);
    }

    /// Move the pointer to window-local (x, y)
    pub fn send_mouse_motion(&mut self, id: WindowId, x: i32, y: i32) {
        let Some((handle, origin)) = self.resolve_origin(id) else {
            return;
        };
        let root = root_point(origin, x, y);
        let event = InjectedEvent::Motion {
            local: (clamp_i16(x), clamp_i16(y)),
            root: (clamp_i16(root.0), clamp_i16(root.1)),
        };
        self.deliver(id, handle, &event);
    }

    /// Press or release a host key code; dropped if it has no keycode
    pub fn send_key_event(&mut self, id: WindowId, code: u32, pressed: bool) {
        let Some(handle) = self.registry.get(id).map(|w| w.handle) else {
            return;
        };
        let sym = key_to_keysym(code);
        let Some(keycode) = self.backend.keysym_to_keycode(sym) else {
            warn!("cannot map key code 0x{code:x} (keysym 0x{sym:x}) to a keycode");
            return;
        };
        let event = self.input.key_event(code, keycode, pressed);
        self.deliver(id, handle, &event);
    }

    /// Release every key still held and drop latched modifiers
    pub fn release_all_keys(&mut self, id: WindowId) {
        let held = self.input.clear();
        let Some(handle) = self.registry.get(id).map(|w| w.handle) else {
            return;
        };
        for keycode in held {
            let event = InjectedEvent::Key {
                keycode,
                pressed: false,
                state: 0,
            };
            self.deliver(id, handle, &event);
        }
    }

    /// Focus a window and raise it to the top of the stack
    pub fn set_focus(&mut self, id: WindowId) {
        let Some(handle) = self.registry.get(id).map(|w| w.handle) else {
            return;
        };
        if let Err(e) = self.backend.focus(handle).and_then(|()| self.backend.flush()) {
            debug!("focus of window {} failed: {e:#}", id);
        }
    }

    fn resolve_origin(&self, id: WindowId) -> Option<(SurfaceHandle, (i32, i32))> {
        let handle = self.registry.get(id)?.handle;
        let Some(origin) = self.backend.translate_to_root(handle) else {
            debug!("window {} vanished before input could be delivered", id);
            return None;
        };
        Some((handle, origin))
    }

    fn deliver(&self, id: WindowId, handle: SurfaceHandle, event: &InjectedEvent) {
        let sent = self
            .backend
            .send_input(handle, event)
            .and_then(|()| self.backend.flush());
        if let Err(e) = sent {
            debug!("input to window {} failed: {e:#}", id);
        }
    }
}

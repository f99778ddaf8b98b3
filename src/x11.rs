//! X11 backend over x11rb
//!
//! Composite provides the off-screen pixmaps, DAMAGE the invalidation
//! events. Input is delivered with SendEvent straight to the target
//! window, so no XTest grab is needed.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{debug, info, trace};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::composite::{self, ConnectionExt as _, Redirect};
use x11rb::protocol::damage::{self, ConnectionExt as _, ReportLevel};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ButtonPressEvent, ChangeWindowAttributesAux, ConfigureWindowAux,
    ConnectionExt as _, EventMask, GetPropertyReply, ImageFormat, ImageOrder, InputFocus,
    KeyButMask, KeyPressEvent, MapState, Motion, MotionNotifyEvent, StackMode, Visualid, Window,
    WindowClass, BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT, KEY_PRESS_EVENT, KEY_RELEASE_EVENT,
    MOTION_NOTIFY_EVENT,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::{CURRENT_TIME, NONE};

use crate::backend::{
    Backend, ByteOrder, ChannelMasks, DamageHandle, Extension, ExtensionInfo, Geometry,
    InjectedEvent, RawImage, SurfaceEvent, SurfaceHandle, SurfaceInfo, SurfaceMetadata,
};

/// Upper bound on events handled per drain; the rest wait for next tick
const MAX_EVENTS_PER_DRAIN: usize = 4096;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        WM_STATE,
        _NET_WM_PID,
        _NET_WM_NAME,
        UTF8_STRING,
    }
}

pub struct X11Backend {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
    visuals: HashMap<Visualid, ChannelMasks>,
    /// keysym -> first keycode producing it
    keymap: HashMap<u32, u8>,
}

impl X11Backend {
    pub fn connect(display_name: &str) -> Result<Self> {
        let (conn, screen_num) =
            x11rb::connect(Some(display_name)).context("failed to connect to X display")?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let (width, height) = (screen.width_in_pixels, screen.height_in_pixels);
        let visuals = screen
            .allowed_depths
            .iter()
            .flat_map(|depth| depth.visuals.iter())
            .map(|v| {
                let masks = ChannelMasks {
                    red: v.red_mask,
                    green: v.green_mask,
                    blue: v.blue_mask,
                };
                (v.visual_id, masks)
            })
            .collect();

        let atoms = Atoms::new(&conn)?.reply().context("failed to intern atoms")?;
        let keymap = load_keymap(&conn)?;

        info!("connected to {} - screen {}x{}", display_name, width, height);

        Ok(Self {
            conn,
            root,
            atoms,
            visuals,
            keymap,
        })
    }

    /// Fetch a property, `None` if unset or the window is gone
    fn property(
        &self,
        window: Window,
        property: impl Into<Atom>,
        type_: impl Into<Atom>,
        length: u32,
    ) -> Option<GetPropertyReply> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, length)
            .ok()?
            .reply()
            .ok()?;
        (reply.type_ != NONE).then_some(reply)
    }

    fn translate_event(&self, event: Event) -> Option<SurfaceEvent> {
        let event = match event {
            Event::CreateNotify(e) => SurfaceEvent::Created(e.window),
            Event::DestroyNotify(e) => SurfaceEvent::Destroyed(e.window),
            Event::MapNotify(e) => SurfaceEvent::Mapped(e.window),
            Event::UnmapNotify(e) => SurfaceEvent::Unmapped(e.window),
            Event::ConfigureNotify(e) => SurfaceEvent::GeometryChanged {
                handle: e.window,
                geometry: Geometry {
                    x: e.x.into(),
                    y: e.y.into(),
                    width: e.width.into(),
                    height: e.height.into(),
                },
            },
            Event::DamageNotify(e) => SurfaceEvent::Damaged(e.damage),
            // BadWindow/BadDamage for surfaces that died under us
            Event::Error(e) => {
                debug!("X11 error: {:?}", e);
                return None;
            }
            other => {
                trace!("ignoring {:?}", other);
                return None;
            }
        };
        Some(event)
    }
}

fn load_keymap(conn: &RustConnection) -> Result<HashMap<u32, u8>> {
    let setup = conn.setup();
    let (min, max) = (setup.min_keycode, setup.max_keycode);
    let reply = conn
        .get_keyboard_mapping(min, max - min + 1)?
        .reply()
        .context("failed to read keyboard mapping")?;

    let mut keymap = HashMap::new();
    let per_keycode = usize::from(reply.keysyms_per_keycode);
    if per_keycode == 0 {
        return Ok(keymap);
    }
    for (keycode, syms) in (min..=max).zip(reply.keysyms.chunks(per_keycode)) {
        for &sym in syms.iter().filter(|&&sym| sym != 0) {
            keymap.entry(sym).or_insert(keycode);
        }
    }
    debug!("keymap: {} keysyms", keymap.len());
    Ok(keymap)
}

impl Backend for X11Backend {
    fn root(&self) -> SurfaceHandle {
        self.root
    }

    fn query_extension(&self, extension: Extension) -> Result<Option<ExtensionInfo>> {
        let name = match extension {
            Extension::Composite => composite::X11_EXTENSION_NAME,
            Extension::Damage => damage::X11_EXTENSION_NAME,
        };
        let Some(present) = self.conn.extension_information(name)? else {
            return Ok(None);
        };
        let (major_version, minor_version) = match extension {
            Extension::Composite => {
                let v = self.conn.composite_query_version(0, 4)?.reply()?;
                (v.major_version, v.minor_version)
            }
            Extension::Damage => {
                let v = self.conn.damage_query_version(1, 1)?.reply()?;
                (v.major_version, v.minor_version)
            }
        };
        Ok(Some(ExtensionInfo {
            major_version,
            minor_version,
            first_event: present.first_event,
        }))
    }

    fn redirect_subwindows(&self) -> Result<()> {
        self.conn
            .composite_redirect_subwindows(self.root, Redirect::AUTOMATIC)?
            .check()
            .context("composite redirect refused")?;
        Ok(())
    }

    fn unredirect_subwindows(&self) -> Result<()> {
        self.conn
            .composite_unredirect_subwindows(self.root, Redirect::AUTOMATIC)?;
        Ok(())
    }

    fn watch_root(&self) -> Result<()> {
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY);
        self.conn
            .change_window_attributes(self.root, &aux)?
            .check()?;
        Ok(())
    }

    fn watch_surface(&self, handle: SurfaceHandle) -> Result<()> {
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY);
        self.conn.change_window_attributes(handle, &aux)?;
        Ok(())
    }

    fn children(&self) -> Result<Vec<SurfaceHandle>> {
        Ok(self.conn.query_tree(self.root)?.reply()?.children)
    }

    fn surface_info(&self, handle: SurfaceHandle) -> Option<SurfaceInfo> {
        let attrs = self.conn.get_window_attributes(handle).ok()?;
        let geometry = self.conn.get_geometry(handle).ok()?;
        let attrs = attrs.reply().ok()?;
        let geometry = geometry.reply().ok()?;
        let managed = self
            .property(handle, self.atoms.WM_STATE, AtomEnum::ANY, 0)
            .is_some();

        Some(SurfaceInfo {
            geometry: Geometry {
                x: geometry.x.into(),
                y: geometry.y.into(),
                width: geometry.width.into(),
                height: geometry.height.into(),
            },
            input_only: attrs.class == WindowClass::INPUT_ONLY,
            viewable: attrs.map_state == MapState::VIEWABLE,
            managed,
        })
    }

    fn surface_metadata(&self, handle: SurfaceHandle) -> SurfaceMetadata {
        let title = self
            .property(handle, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING, 1024)
            .filter(|p| !p.value.is_empty())
            .or_else(|| self.property(handle, AtomEnum::WM_NAME, AtomEnum::ANY, 1024))
            .map(|p| String::from_utf8_lossy(&p.value).into_owned())
            .unwrap_or_default();

        // WM_CLASS is "instance\0class\0"
        let class = self
            .property(handle, AtomEnum::WM_CLASS, AtomEnum::STRING, 1024)
            .and_then(|p| {
                p.value
                    .split(|&b| b == 0)
                    .nth(1)
                    .map(|c| String::from_utf8_lossy(c).into_owned())
            })
            .unwrap_or_default();

        let pid = self
            .property(handle, self.atoms._NET_WM_PID, AtomEnum::CARDINAL, 1)
            .and_then(|p| p.value32().and_then(|mut v| v.next()));

        let transient_for = self
            .property(handle, AtomEnum::WM_TRANSIENT_FOR, AtomEnum::WINDOW, 1)
            .and_then(|p| p.value32().and_then(|mut v| v.next()))
            .filter(|&owner| owner != NONE);

        SurfaceMetadata {
            title,
            class,
            pid,
            transient_for,
        }
    }

    fn create_damage(&self, handle: SurfaceHandle) -> Result<DamageHandle> {
        let damage = self.conn.generate_id()?;
        self.conn
            .damage_create(damage, handle, ReportLevel::NON_EMPTY)?;
        Ok(damage)
    }

    fn destroy_damage(&self, damage: DamageHandle) -> Result<()> {
        self.conn.damage_destroy(damage)?;
        Ok(())
    }

    fn subtract_damage(&self, damage: DamageHandle) -> Result<()> {
        self.conn.damage_subtract(damage, NONE, NONE)?;
        Ok(())
    }

    fn poll_events(&self) -> Result<Vec<SurfaceEvent>> {
        let mut events = Vec::new();
        for _ in 0..MAX_EVENTS_PER_DRAIN {
            let Some(event) = self.conn.poll_for_event()? else {
                break;
            };
            events.extend(self.translate_event(event));
        }
        Ok(events)
    }

    fn read_pixels(&self, handle: SurfaceHandle, width: u32, height: u32) -> Result<RawImage> {
        let visual = self.conn.get_window_attributes(handle)?.reply()?.visual;

        let pixmap = self.conn.generate_id()?;
        self.conn
            .composite_name_window_pixmap(handle, pixmap)?
            .check()
            .context("failed to name window pixmap")?;
        let image = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                pixmap,
                0,
                0,
                u16::try_from(width)?,
                u16::try_from(height)?,
                !0,
            )?
            .reply();
        self.conn.free_pixmap(pixmap)?;
        let image = image.context("failed to read window pixmap")?;

        let setup = self.conn.setup();
        let bits_per_pixel = setup
            .pixmap_formats
            .iter()
            .find(|f| f.depth == image.depth)
            .map(|f| f.bits_per_pixel)
            .context("no pixmap format for image depth")?;
        let byte_order = if setup.image_byte_order == ImageOrder::MSB_FIRST {
            ByteOrder::MsbFirst
        } else {
            ByteOrder::LsbFirst
        };
        // Z pixmap rows are padded to the scanline unit; derive the real stride
        let stride = if height == 0 {
            0
        } else {
            image.data.len() / height as usize
        };

        Ok(RawImage {
            width,
            height,
            stride,
            bits_per_pixel,
            byte_order,
            masks: self.visuals.get(&visual).copied().unwrap_or_default(),
            has_alpha: image.depth == 32,
            data: image.data,
        })
    }

    fn translate_to_root(&self, handle: SurfaceHandle) -> Option<(i32, i32)> {
        let reply = self
            .conn
            .translate_coordinates(handle, self.root, 0, 0)
            .ok()?
            .reply()
            .ok()?;
        Some((reply.dst_x.into(), reply.dst_y.into()))
    }

    fn keysym_to_keycode(&self, keysym: u32) -> Option<u8> {
        self.keymap.get(&keysym).copied()
    }

    fn send_input(&self, handle: SurfaceHandle, event: &InjectedEvent) -> Result<()> {
        match *event {
            InjectedEvent::Button {
                button,
                pressed,
                local,
                root,
            } => {
                let event = ButtonPressEvent {
                    response_type: if pressed {
                        BUTTON_PRESS_EVENT
                    } else {
                        BUTTON_RELEASE_EVENT
                    },
                    detail: button,
                    sequence: 0,
                    time: CURRENT_TIME,
                    root: self.root,
                    event: handle,
                    child: NONE,
                    root_x: root.0,
                    root_y: root.1,
                    event_x: local.0,
                    event_y: local.1,
                    state: KeyButMask::from(0u16),
                    same_screen: true,
                };
                self.conn.send_event(
                    true,
                    handle,
                    EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE,
                    event,
                )?;
            }
            InjectedEvent::Motion { local, root } => {
                let event = MotionNotifyEvent {
                    response_type: MOTION_NOTIFY_EVENT,
                    detail: Motion::NORMAL,
                    sequence: 0,
                    time: CURRENT_TIME,
                    root: self.root,
                    event: handle,
                    child: NONE,
                    root_x: root.0,
                    root_y: root.1,
                    event_x: local.0,
                    event_y: local.1,
                    state: KeyButMask::from(0u16),
                    same_screen: true,
                };
                self.conn
                    .send_event(true, handle, EventMask::POINTER_MOTION, event)?;
            }
            InjectedEvent::Key {
                keycode,
                pressed,
                state,
            } => {
                let event = KeyPressEvent {
                    response_type: if pressed {
                        KEY_PRESS_EVENT
                    } else {
                        KEY_RELEASE_EVENT
                    },
                    detail: keycode,
                    sequence: 0,
                    time: CURRENT_TIME,
                    root: self.root,
                    event: handle,
                    child: NONE,
                    root_x: 0,
                    root_y: 0,
                    event_x: 0,
                    event_y: 0,
                    state: KeyButMask::from(state),
                    same_screen: true,
                };
                self.conn.send_event(
                    true,
                    handle,
                    EventMask::KEY_PRESS | EventMask::KEY_RELEASE,
                    event,
                )?;
            }
        }
        Ok(())
    }

    fn focus(&self, handle: SurfaceHandle) -> Result<()> {
        self.conn
            .set_input_focus(InputFocus::PARENT, handle, CURRENT_TIME)?;
        self.conn
            .configure_window(handle, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.conn.sync()?;
        Ok(())
    }
}

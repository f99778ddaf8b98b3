//! Live view of one nested window with input forwarding

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use minifb::{Key, MouseButton, MouseMode, Window, WindowOptions};
use tracing::info;
use x11nest::input::key;
use x11nest::{Compositor, WindowId};

const WAIT_FOR_WINDOW: Duration = Duration::from_secs(10);

pub fn run_view(compositor: &mut Compositor, wanted: Option<WindowId>, fps: u32) -> Result<()> {
    let id = wait_for_window(compositor, wanted, fps)?;
    let (width, height) = compositor
        .window_size(id)
        .context("window vanished before it could be shown")?;
    let label = compositor.window_title(id).unwrap_or_default().to_string();
    info!("viewing window {} {:?} ({}x{})", id, label, width, height);

    let mut window = Window::new(
        &format!("x11nest - {} [{}]", label, id),
        width as usize,
        height as usize,
        WindowOptions {
            resize: true,
            scale: minifb::Scale::X1,
            ..Default::default()
        },
    )
    .context("failed to create viewer window")?;
    window.set_target_fps(fps as usize);

    let mut buffer: Vec<u32> = vec![0; (width * height) as usize];
    let mut size = (width, height);
    let mut last_mouse_pos = None;
    let mut last_buttons = [false; 3];
    let mut last_keys: Vec<Key> = vec![];
    let mut last_tick = Instant::now();

    compositor.set_window_focus(id);

    while window.is_open() {
        let now = Instant::now();
        compositor.pump((now - last_tick).as_secs_f64());
        last_tick = now;

        if !compositor.is_initialized() {
            bail!("display session was lost");
        }
        if !compositor.window_ids().contains(&id) {
            info!("window {} closed", id);
            break;
        }

        if let Some(frame) = compositor.window_buffer(id) {
            size = (frame.width, frame.height);
            rgba_to_0rgb(&frame.data, &mut buffer);
        }
        window.update_with_buffer(&buffer, size.0 as usize, size.1 as usize)?;

        // minifb reports window pixels; scale back to the frame when stretched
        if let Some((mx, my)) = window.get_mouse_pos(MouseMode::Discard) {
            let (ww, wh) = window.get_size();
            let x = (mx * size.0 as f32 / ww.max(1) as f32) as i32;
            let y = (my * size.1 as f32 / wh.max(1) as f32) as i32;
            if last_mouse_pos != Some((x, y)) {
                compositor.send_mouse_motion(id, x, y);
                last_mouse_pos = Some((x, y));
            }

            for (i, (button, code)) in [
                (MouseButton::Left, 1u8),
                (MouseButton::Middle, 2),
                (MouseButton::Right, 3),
            ]
            .into_iter()
            .enumerate()
            {
                let down = window.get_mouse_down(button);
                if down != last_buttons[i] {
                    compositor.send_mouse_button(id, code, down, x, y);
                    last_buttons[i] = down;
                }
            }
        }

        let keys = window.get_keys();
        for k in keys.iter().filter(|k| !last_keys.contains(k)) {
            if let Some(code) = key_to_key_code(*k) {
                compositor.send_key_event(id, code, true);
            }
        }
        for k in last_keys.iter().filter(|k| !keys.contains(k)) {
            if let Some(code) = key_to_key_code(*k) {
                compositor.send_key_event(id, code, false);
            }
        }
        last_keys = keys;
    }

    compositor.release_all_keys(id);
    info!("viewer closed");
    Ok(())
}

/// Pump until the requested window (or any window) is tracked
fn wait_for_window(compositor: &mut Compositor, wanted: Option<WindowId>, fps: u32) -> Result<WindowId> {
    let tick = Duration::from_secs(1) / fps.max(1);
    let deadline = Instant::now() + WAIT_FOR_WINDOW;
    loop {
        compositor.pump(tick.as_secs_f64());
        if !compositor.is_initialized() {
            bail!("display session was lost");
        }
        let ids = compositor.window_ids();
        let found = match wanted {
            Some(id) => ids.contains(&id).then_some(id),
            None => ids
                .into_iter()
                .find(|&id| compositor.is_window_mapped(id)),
        };
        if let Some(id) = found {
            return Ok(id);
        }
        if Instant::now() >= deadline {
            match wanted {
                Some(id) => bail!("window {} did not appear", id),
                None => bail!("no window appeared"),
            }
        }
        std::thread::sleep(tick);
    }
}

/// RGBA8 to minifb's 0RGB
fn rgba_to_0rgb(rgba: &[u8], buffer: &mut Vec<u32>) {
    buffer.resize(rgba.len() / 4, 0);
    for (px, chunk) in buffer.iter_mut().zip(rgba.chunks_exact(4)) {
        let r = chunk[0] as u32;
        let g = chunk[1] as u32;
        let b = chunk[2] as u32;
        *px = (r << 16) | (g << 8) | b;
    }
}

fn key_to_key_code(k: Key) -> Option<u32> {
    let code = match k {
        Key::A => 'a',
        Key::B => 'b',
        Key::C => 'c',
        Key::D => 'd',
        Key::E => 'e',
        Key::F => 'f',
        Key::G => 'g',
        Key::H => 'h',
        Key::I => 'i',
        Key::J => 'j',
        Key::K => 'k',
        Key::L => 'l',
        Key::M => 'm',
        Key::N => 'n',
        Key::O => 'o',
        Key::P => 'p',
        Key::Q => 'q',
        Key::R => 'r',
        Key::S => 's',
        Key::T => 't',
        Key::U => 'u',
        Key::V => 'v',
        Key::W => 'w',
        Key::X => 'x',
        Key::Y => 'y',
        Key::Z => 'z',
        Key::Key0 => '0',
        Key::Key1 => '1',
        Key::Key2 => '2',
        Key::Key3 => '3',
        Key::Key4 => '4',
        Key::Key5 => '5',
        Key::Key6 => '6',
        Key::Key7 => '7',
        Key::Key8 => '8',
        Key::Key9 => '9',
        Key::Minus => '-',
        Key::Equal => '=',
        Key::Comma => ',',
        Key::Period => '.',
        Key::Slash => '/',
        Key::Semicolon => ';',
        Key::Apostrophe => '\'',
        Key::LeftBracket => '[',
        Key::RightBracket => ']',
        Key::Backslash => '\\',
        Key::Backquote => '`',
        Key::Space => return Some(key::SPACE),
        Key::Enter => return Some(key::ENTER),
        Key::Escape => return Some(key::ESCAPE),
        Key::Backspace => return Some(key::BACKSPACE),
        Key::Tab => return Some(key::TAB),
        Key::Left => return Some(key::LEFT),
        Key::Right => return Some(key::RIGHT),
        Key::Up => return Some(key::UP),
        Key::Down => return Some(key::DOWN),
        Key::Insert => return Some(key::INSERT),
        Key::Delete => return Some(key::DELETE),
        Key::Home => return Some(key::HOME),
        Key::End => return Some(key::END),
        Key::PageUp => return Some(key::PAGE_UP),
        Key::PageDown => return Some(key::PAGE_DOWN),
        Key::LeftShift | Key::RightShift => return Some(key::SHIFT),
        Key::LeftCtrl | Key::RightCtrl => return Some(key::CTRL),
        Key::LeftAlt | Key::RightAlt => return Some(key::ALT),
        Key::LeftSuper | Key::RightSuper => return Some(key::META),
        Key::F1 => return Some(key::F1),
        Key::F2 => return Some(key::F1 + 1),
        Key::F3 => return Some(key::F1 + 2),
        Key::F4 => return Some(key::F1 + 3),
        Key::F5 => return Some(key::F1 + 4),
        Key::F6 => return Some(key::F1 + 5),
        Key::F7 => return Some(key::F1 + 6),
        Key::F8 => return Some(key::F1 + 7),
        Key::F9 => return Some(key::F1 + 8),
        Key::F10 => return Some(key::F1 + 9),
        Key::F11 => return Some(key::F1 + 10),
        Key::F12 => return Some(key::F12),
        _ => return None,
    };
    Some(code as u32)
}

//! Keyboard boundary: host key events in, a small MMIO window out.
//!
//! Window layout, relative to the device base:
//!
//! | offset        | contents                                  |
//! |---------------|-------------------------------------------|
//! | `0x00`        | status, bit 0 set while a key is queued   |
//! | `0x02`        | next key word; reading it pops the queue  |
//! | `0x04..0x24`  | held-key bitmap, one bit per key          |
//!
//! Key words follow the BIOS `INT 16h` convention: ASCII in the low byte, or zero in the low byte
//! and the scan code in the high byte for extended keys.

use std::any::Any;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use sfemu_mem::MmioDevice;

pub const INPUT_STATUS: u32 = 0x00;
pub const INPUT_KEY: u32 = 0x02;
pub const INPUT_BITMAP: u32 = 0x04;
pub const INPUT_BITMAP_LEN: u32 = 0x20;
pub const INPUT_WINDOW_LEN: u32 = INPUT_BITMAP + INPUT_BITMAP_LEN;

pub const STATUS_KEY_AVAILABLE: u8 = 1 << 0;

/// Unread keys beyond this are dropped, like a full BIOS type-ahead buffer.
pub const KEY_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Backspace,
    Tab,
    Space,
    Up,
    Down,
    Left,
    Right,
    /// Keypad diagonals, which the game uses for eight-way movement.
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    /// Function keys 1 through 10.
    F(u8),
}

const fn extended(scan: u8) -> u16 {
    (scan as u16) << 8
}

fn shifted(c: char) -> char {
    match c {
        'a'..='z' => c.to_ascii_uppercase(),
        '1' => '!',
        '2' => '@',
        '3' => '#',
        '4' => '$',
        '5' => '%',
        '6' => '^',
        '7' => '&',
        '8' => '*',
        '9' => '(',
        '0' => ')',
        '-' => '_',
        '=' => '+',
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        ';' => ':',
        '\'' => '"',
        ',' => '<',
        '.' => '>',
        '/' => '?',
        '`' => '~',
        other => other,
    }
}

/// Key word the program sees for `key`, or `None` for keys with no 8086-era code.
pub fn scan_code(key: Key, shift: bool) -> Option<u16> {
    let code = match key {
        Key::Char(c) => {
            let c = if shift { shifted(c) } else { c };
            if !c.is_ascii() || c.is_ascii_control() {
                return None;
            }
            c as u16
        }
        Key::Enter => 0x0D,
        Key::Escape => 0x1B,
        Key::Backspace => 0x08,
        Key::Tab => 0x09,
        Key::Space => 0x20,
        Key::Home | Key::UpLeft => extended(0x47),
        Key::Up => extended(0x48),
        Key::PageUp | Key::UpRight => extended(0x49),
        Key::Left => extended(0x4B),
        Key::Right => extended(0x4D),
        Key::End | Key::DownLeft => extended(0x4F),
        Key::Down => extended(0x50),
        Key::PageDown | Key::DownRight => extended(0x51),
        Key::Insert => extended(0x52),
        Key::Delete => extended(0x53),
        Key::F(n @ 1..=10) => extended(0x3B + (n - 1)),
        Key::F(_) => return None,
    };
    Some(code)
}

/// Bit position of a key word in the held-key bitmap. Extended keys land in the upper half.
pub fn bitmap_index(code: u16) -> usize {
    let [lo, hi] = code.to_le_bytes();
    if lo != 0 {
        usize::from(lo & 0x7F)
    } else {
        0x80 | usize::from(hi & 0x7F)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDevice {
    queue: VecDeque<u16>,
    held: [u8; INPUT_BITMAP_LEN as usize],
    dropped: u64,
}

impl InputDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key transition. Presses also queue the key word.
    pub fn set_key(&mut self, code: u16, pressed: bool) {
        let bit = bitmap_index(code);
        let mask = 1u8 << (bit % 8);
        if pressed {
            self.held[bit / 8] |= mask;
            self.push_key(code);
        } else {
            self.held[bit / 8] &= !mask;
        }
    }

    pub fn push_key(&mut self, code: u16) {
        if self.queue.len() >= KEY_QUEUE_CAPACITY {
            self.dropped += 1;
            tracing::warn!(code, dropped = self.dropped, "key queue full; dropping key");
            return;
        }
        self.queue.push_back(code);
    }

    pub fn is_held(&self, code: u16) -> bool {
        let bit = bitmap_index(code);
        self.held[bit / 8] & (1 << (bit % 8)) != 0
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.held = [0; INPUT_BITMAP_LEN as usize];
    }

    fn byte_at(&self, offset: u32, key: u16) -> u8 {
        match offset {
            INPUT_STATUS => {
                if self.queue.is_empty() {
                    0
                } else {
                    STATUS_KEY_AVAILABLE
                }
            }
            INPUT_KEY => key as u8,
            0x03 => (key >> 8) as u8,
            o if (INPUT_BITMAP..INPUT_WINDOW_LEN).contains(&o) => {
                self.held[(o - INPUT_BITMAP) as usize]
            }
            _ => 0,
        }
    }
}

impl MmioDevice for InputDevice {
    fn read(&mut self, offset: u32, buf: &mut [u8]) {
        let key = self.queue.front().copied().unwrap_or(0);
        let range = offset..offset + buf.len() as u32;
        for (o, b) in range.clone().zip(buf.iter_mut()) {
            *b = self.byte_at(o, key);
        }
        // One pop per access, however many bytes of the key word it covers.
        if range.contains(&INPUT_KEY) || range.contains(&(INPUT_KEY + 1)) {
            self.queue.pop_front();
        }
    }

    fn write(&mut self, offset: u32, _data: &[u8]) {
        tracing::trace!(offset, "ignoring write to input device");
    }

    fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 2 * self.queue.len() + self.held.len());
        out.push(self.queue.len() as u8);
        for code in &self.queue {
            out.extend_from_slice(&code.to_le_bytes());
        }
        out.extend_from_slice(&self.held);
        out
    }

    fn load_state(&mut self, state: &[u8]) {
        let Some((&count, rest)) = state.split_first() else {
            tracing::warn!("empty input device state; clearing");
            self.clear();
            return;
        };
        let count = usize::from(count).min(KEY_QUEUE_CAPACITY);
        let keys_len = count * 2;
        if rest.len() != keys_len + self.held.len() {
            tracing::warn!(len = state.len(), "malformed input device state; clearing");
            self.clear();
            return;
        }
        self.queue = rest[..keys_len]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        self.held.copy_from_slice(&rest[keys_len..]);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

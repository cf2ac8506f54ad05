use crate::config::FramebufferConfig;

/// The 16 EGA colours as `0x00RRGGBB`.
pub const EGA_PALETTE: [u32; 16] = [
    0x000000, 0x0000AA, 0x00AA00, 0x00AAAA, 0xAA0000, 0xAA00AA, 0xAA5500, 0xAAAAAA, //
    0x555555, 0x5555FF, 0x55FF55, 0x55FFFF, 0xFF5555, 0xFF55FF, 0xFFFF55, 0xFFFFFF,
];

/// Expand a packed 4-bit framebuffer (high nibble is the left pixel) to BGRA8888.
///
/// `pixels` must hold at least `fb.len()` bytes; missing bytes render as colour 0.
pub fn render_bgra(fb: &FramebufferConfig, pixels: &[u8], palette: &[u32; 16]) -> Vec<u8> {
    let count = (fb.width * fb.height) as usize;
    let mut out = Vec::with_capacity(count * 4);
    for i in 0..count {
        let byte = pixels.get(i / 2).copied().unwrap_or(0);
        let index = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        let rgb = palette[usize::from(index)];
        out.extend_from_slice(&[rgb as u8, (rgb >> 8) as u8, (rgb >> 16) as u8, 0xFF]);
    }
    out
}

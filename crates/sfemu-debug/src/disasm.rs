use serde::{Deserialize, Serialize};
use sfemu_cpu::{decode, DecodeError, MAX_INSTRUCTION_LEN};
use sfemu_mem::MemoryBus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasmLine {
    pub addr: u32,
    pub bytes: Vec<u8>,
    pub text: String,
}

/// Decode up to `count` consecutive instructions starting at linear `addr`.
///
/// Reads through [`MemoryBus::peek`], so MMIO devices see nothing and hooks do not fire.
/// Undecodable bytes are listed one at a time as `db`. Stops early at unmapped memory.
pub fn disassemble(mem: &MemoryBus, addr: u32, count: usize) -> Vec<DisasmLine> {
    let mut out = Vec::with_capacity(count);
    let mut cur = addr;
    while out.len() < count {
        let avail = mem.mapped_len(cur, MAX_INSTRUCTION_LEN);
        if avail == 0 {
            break;
        }
        let mut window = [0u8; MAX_INSTRUCTION_LEN];
        if mem.peek(cur, &mut window[..avail]).is_err() {
            break;
        }
        let line = match decode(&window[..avail]) {
            Ok(inst) => {
                let len = usize::from(inst.len);
                DisasmLine {
                    addr: cur,
                    bytes: window[..len].to_vec(),
                    text: inst.to_string(),
                }
            }
            Err(DecodeError::Truncated) if avail < MAX_INSTRUCTION_LEN => break,
            Err(_) => DisasmLine {
                addr: cur,
                bytes: vec![window[0]],
                text: format!("db 0x{:02x}", window[0]),
            },
        };
        cur += line.bytes.len() as u32;
        out.push(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_instructions_without_side_effects() {
        let mut mem = MemoryBus::new();
        mem.map_ram(0, 0x200).unwrap();
        // mov ax, 0x1234; nop; fld st0 (FPU escape, not decodable here)
        mem.load_image(0x100, &[0xB8, 0x34, 0x12, 0x90, 0xD9, 0xC0]).unwrap();

        let lines = disassemble(&mem, 0x100, 3);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].bytes, vec![0xB8, 0x34, 0x12]);
        assert!(lines[0].text.starts_with("mov ax"));
        assert_eq!(lines[1].addr, 0x103);
        assert_eq!(lines[1].text, "nop");
        assert_eq!(lines[2].text, "db 0xd9");
    }

    #[test]
    fn stops_at_the_end_of_mapped_memory() {
        let mut mem = MemoryBus::new();
        mem.map_ram(0, 0x10).unwrap();
        mem.load_image(0x0E, &[0x90, 0xB8]).unwrap();
        let lines = disassemble(&mem, 0x0E, 10);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "nop");
    }
}

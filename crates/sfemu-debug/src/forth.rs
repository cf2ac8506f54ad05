//! Read-only view of the target program's Forth dictionary.
//!
//! A header starts with a count byte (`len = b & 0x1F`, upper bits are flags) followed by the
//! name. Multi-character names are stored with every character XOR `0x7F`, and the last stored
//! character has bit 7 set; single-character names are stored plain. The 16-bit link to the
//! previous header sits in the two bytes before the count byte, and a zero link ends the chain.
//! Links are offsets in the dictionary's segment.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sfemu_cpu::linear;
use sfemu_mem::{MemoryBus, Result};

pub const NAME_LEN_MASK: u8 = 0x1F;
pub const NAME_XOR: u8 = 0x7F;
pub const LAST_CHAR_BIT: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordName {
    pub name: String,
    /// Flag bits of the count byte (`b & !0x1F`), e.g. IMMEDIATE.
    pub flags: u8,
    /// Bytes the name occupies after the count byte.
    pub stored_len: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForthWord {
    /// Segment offset of the count byte.
    pub header: u16,
    pub name: String,
    pub flags: u8,
    /// Offset of the previous header; 0 for the oldest word.
    pub link: u16,
    /// Offset of the first byte after the name.
    pub code_field: u16,
}

/// Decode the name of the header whose count byte is at linear address `addr`.
pub fn decode_word_name(mem: &MemoryBus, addr: u32) -> Result<WordName> {
    let mut count = [0u8; 1];
    mem.peek(addr, &mut count)?;
    let len = count[0] & NAME_LEN_MASK;
    let flags = count[0] & !NAME_LEN_MASK;

    let mut name = String::with_capacity(usize::from(len));
    let mut stored_len = 0u16;
    match len {
        0 => {}
        1 => {
            let mut c = [0u8; 1];
            mem.peek(addr + 1, &mut c)?;
            name.push(char::from(c[0] & 0x7F));
            stored_len = 1;
        }
        _ => {
            for i in 1..=u32::from(len) {
                let mut c = [0u8; 1];
                mem.peek(addr + i, &mut c)?;
                name.push(char::from((c[0] ^ NAME_XOR) & 0x7F));
                stored_len += 1;
                if c[0] & LAST_CHAR_BIT != 0 {
                    break;
                }
            }
        }
    }
    Ok(WordName {
        name,
        flags,
        stored_len,
    })
}

/// Follow the link chain from `head` (a segment offset in `seg`), newest word first.
///
/// Stops at a zero link, after `limit` words, or when a link revisits a header.
pub fn walk_dictionary(
    mem: &MemoryBus,
    seg: u16,
    head: u16,
    limit: usize,
) -> Result<Vec<ForthWord>> {
    let mut words = Vec::new();
    let mut seen = HashSet::new();
    let mut cur = head;
    while cur != 0 && words.len() < limit && seen.insert(cur) {
        let decoded = decode_word_name(mem, linear(seg, cur))?;
        let mut link = [0u8; 2];
        mem.peek(linear(seg, cur.wrapping_sub(2)), &mut link)?;
        let link = u16::from_le_bytes(link);
        words.push(ForthWord {
            header: cur,
            name: decoded.name,
            flags: decoded.flags,
            link,
            code_field: cur.wrapping_add(1).wrapping_add(decoded.stored_len),
        });
        cur = link;
    }
    Ok(words)
}

/// First word named `name` (ASCII case-insensitive), searching from `head`.
pub fn find_word(
    mem: &MemoryBus,
    seg: u16,
    head: u16,
    name: &str,
    limit: usize,
) -> Result<Option<ForthWord>> {
    Ok(walk_dictionary(mem, seg, head, limit)?
        .into_iter()
        .find(|w| w.name.eq_ignore_ascii_case(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Lay out a header the way the target program stores it.
    fn encode_header(name: &str, flags: u8) -> Vec<u8> {
        let bytes = name.as_bytes();
        let mut out = vec![(bytes.len() as u8 & NAME_LEN_MASK) | flags];
        if bytes.len() == 1 {
            out.push(bytes[0] | LAST_CHAR_BIT);
        } else {
            for (i, &b) in bytes.iter().enumerate() {
                let mut c = b ^ NAME_XOR;
                if i + 1 == bytes.len() {
                    c |= LAST_CHAR_BIT;
                }
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn decodes_encoded_names() {
        let mut mem = MemoryBus::new();
        mem.map_ram(0, 0x100).unwrap();
        mem.load_image(0x10, &encode_header("DUP", 0x40)).unwrap();
        mem.load_image(0x20, &encode_header(".", 0)).unwrap();

        let dup = decode_word_name(&mem, 0x10).unwrap();
        assert_eq!(dup.name, "DUP");
        assert_eq!(dup.flags, 0x40);
        assert_eq!(dup.stored_len, 3);
        assert_eq!(decode_word_name(&mem, 0x20).unwrap().name, ".");
    }

    #[test]
    fn walk_follows_links_and_stops_on_cycles() {
        let mut mem = MemoryBus::new();
        mem.map_ram(0x10000, 0x100).unwrap();
        // 0x10: "SWAP" (oldest), 0x30: "OVER" -> 0x10, 0x50: "ROT" -> 0x30
        let words = [(0x10u16, 0u16, "SWAP"), (0x30, 0x10, "OVER"), (0x50, 0x30, "ROT")];
        for (hdr, link, name) in words {
            let at = 0x10000 + u32::from(hdr);
            mem.write_u16(at - 2, link).unwrap();
            mem.load_image(at, &encode_header(name, 0)).unwrap();
        }
        let words = walk_dictionary(&mem, 0x1000, 0x50, 16).unwrap();
        let names: Vec<_> = words.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["ROT", "OVER", "SWAP"]);
        assert_eq!(words[0].code_field, 0x54);
        assert_eq!(words[2].link, 0);

        // Link SWAP back to ROT.
        mem.write_u16(0x10000 + 0x0E, 0x50).unwrap();
        assert_eq!(walk_dictionary(&mem, 0x1000, 0x50, 16).unwrap().len(), 3);
        assert_eq!(walk_dictionary(&mem, 0x1000, 0x50, 2).unwrap().len(), 2);

        let over = find_word(&mem, 0x1000, 0x50, "over", 16).unwrap().unwrap();
        assert_eq!(over.header, 0x30);
    }

    proptest! {
        #[test]
        fn decoding_arbitrary_bytes_never_panics(
            bytes in proptest::collection::vec(any::<u8>(), 1..40),
        ) {
            let mut mem = MemoryBus::new();
            mem.map_ram(0, 0x40).unwrap();
            mem.load_image(0, &bytes).unwrap();
            if let Ok(name) = decode_word_name(&mem, 0) {
                prop_assert!(name.name.len() <= usize::from(bytes[0] & NAME_LEN_MASK));
            }
        }
    }
}

use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};
use crate::io::{ReadLeExt, WriteLeExt};

/// Real mode can only address 1 MiB, so no region or chunk can exceed it.
pub const MAX_REGION_LEN: u32 = 0x10_0000;
pub const MAX_REGION_COUNT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
}

impl Compression {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(SnapshotError::Corrupt("invalid compression kind")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWriteOptions {
    pub compression: Compression,
    pub chunk_size: u32,
}

impl Default for MemoryWriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Lz4,
            chunk_size: 64 * 1024,
        }
    }
}

/// Placement of one writable region in the linear address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegionLayout {
    pub base: u32,
    pub len: u32,
}

impl core::fmt::Display for RegionLayout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:05x}+0x{:x}", self.base, self.len)
    }
}

pub fn encode_memory_section<W: Write>(
    w: &mut W,
    regions: &[RegionLayout],
    opts: MemoryWriteOptions,
    mut read_region: impl FnMut(RegionLayout, u32, &mut [u8]) -> Result<()>,
) -> Result<()> {
    if opts.chunk_size == 0 || opts.chunk_size > MAX_REGION_LEN {
        return Err(SnapshotError::Corrupt("invalid chunk size"));
    }
    if regions.len() > MAX_REGION_COUNT {
        return Err(SnapshotError::Corrupt("too many memory regions"));
    }

    w.write_count_u32(regions.len())?;
    w.write_u8(opts.compression as u8)?;
    w.write_u8(0)?; // reserved
    w.write_u16_le(0)?; // reserved
    w.write_u32_le(opts.chunk_size)?;

    let mut buf = vec![0u8; opts.chunk_size as usize];
    for &region in regions {
        if region.len > MAX_REGION_LEN {
            return Err(SnapshotError::Corrupt("memory region too large"));
        }
        w.write_u32_le(region.base)?;
        w.write_u32_le(region.len)?;

        let mut offset = 0u32;
        while offset < region.len {
            let uncompressed_len = (region.len - offset).min(opts.chunk_size);
            let chunk = &mut buf[..uncompressed_len as usize];
            read_region(region, offset, chunk)?;

            let compressed = compress(opts.compression, chunk);
            w.write_u32_le(uncompressed_len)?;
            w.write_count_u32(compressed.len())?;
            w.write_bytes(&compressed)?;
            offset += uncompressed_len;
        }
    }
    Ok(())
}

/// Decode a memory section written by [`encode_memory_section`].
///
/// The stored region list must match `expected` exactly (after sorting by base); a snapshot taken
/// from a differently laid out machine is rejected before any chunk reaches `write_region`.
pub fn decode_memory_section_into<R: Read>(
    r: &mut R,
    expected: &[RegionLayout],
    mut write_region: impl FnMut(RegionLayout, u32, &[u8]) -> Result<()>,
) -> Result<()> {
    let count = r.read_count_u32(MAX_REGION_COUNT)?;
    let compression = Compression::from_u8(r.read_u8()?)?;
    let _reserved = r.read_u8()?;
    let _reserved = r.read_u16_le()?;
    let chunk_size = r.read_u32_le()?;
    if chunk_size == 0 || chunk_size > MAX_REGION_LEN {
        return Err(SnapshotError::Corrupt("invalid chunk size"));
    }

    let mut expected: Vec<RegionLayout> = expected.to_vec();
    expected.sort();
    if count != expected.len() {
        return Err(SnapshotError::LayoutMismatch(format!(
            "snapshot has {count} writable regions, machine has {}",
            expected.len()
        )));
    }

    for want in expected {
        let base = r.read_u32_le()?;
        let len = r.read_u32_le()?;
        let found = RegionLayout { base, len };
        if found != want {
            return Err(SnapshotError::LayoutMismatch(format!(
                "snapshot region {found} does not match machine region {want}"
            )));
        }

        let mut offset = 0u32;
        while offset < len {
            let expected_uncompressed = (len - offset).min(chunk_size);
            let uncompressed_len = r.read_u32_le()?;
            if uncompressed_len != expected_uncompressed {
                return Err(SnapshotError::Corrupt("chunk uncompressed length mismatch"));
            }
            let compressed_len = r.read_u32_le()?;
            validate_compressed_len(compression, uncompressed_len, compressed_len)?;
            let compressed = r.read_exact_vec(compressed_len as usize)?;
            let decompressed = decompress(compression, &compressed, uncompressed_len as usize)?;
            write_region(found, offset, &decompressed)?;
            offset += uncompressed_len;
        }
    }
    Ok(())
}

fn max_lz4_compressed_len(uncompressed_len: u32) -> u32 {
    // LZ4 worst case: uncompressed + (uncompressed / 255) + 16
    uncompressed_len
        .saturating_add(uncompressed_len / 255)
        .saturating_add(16)
}

fn compress(kind: Compression, input: &[u8]) -> Vec<u8> {
    match kind {
        Compression::None => input.to_vec(),
        Compression::Lz4 => lz4_flex::block::compress(input),
    }
}

fn decompress(kind: Compression, compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    match kind {
        Compression::None => {
            if compressed.len() != expected_len {
                return Err(SnapshotError::Corrupt("uncompressed chunk length mismatch"));
            }
            Ok(compressed.to_vec())
        }
        Compression::Lz4 => {
            let out = lz4_flex::block::decompress(compressed, expected_len)?;
            if out.len() != expected_len {
                return Err(SnapshotError::Corrupt("lz4 chunk length mismatch"));
            }
            Ok(out)
        }
    }
}

fn validate_compressed_len(
    compression: Compression,
    uncompressed_len: u32,
    compressed_len: u32,
) -> Result<()> {
    match compression {
        Compression::None => {
            if compressed_len != uncompressed_len {
                return Err(SnapshotError::Corrupt(
                    "compressed_len must equal uncompressed_len for no compression",
                ));
            }
        }
        Compression::Lz4 => {
            if compressed_len > max_lz4_compressed_len(uncompressed_len) {
                return Err(SnapshotError::Corrupt("lz4 chunk too large"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(regions: &[(RegionLayout, Vec<u8>)], opts: MemoryWriteOptions) -> Vec<u8> {
        let layout: Vec<_> = regions.iter().map(|(l, _)| *l).collect();
        let mut out = Vec::new();
        encode_memory_section(&mut out, &layout, opts, |region, offset, buf| {
            let (_, bytes) = regions.iter().find(|(l, _)| *l == region).unwrap();
            let start = offset as usize;
            buf.copy_from_slice(&bytes[start..start + buf.len()]);
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn regions_round_trip_across_chunk_boundaries() {
        let a = RegionLayout { base: 0, len: 300 };
        let b = RegionLayout {
            base: 0x1000,
            len: 17,
        };
        let data_a: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        let data_b = vec![0xAB; 17];
        for compression in [Compression::None, Compression::Lz4] {
            let bytes = encode(
                &[(a, data_a.clone()), (b, data_b.clone())],
                MemoryWriteOptions {
                    compression,
                    chunk_size: 128,
                },
            );

            let mut out_a = vec![0u8; 300];
            let mut out_b = vec![0u8; 17];
            decode_memory_section_into(&mut Cursor::new(bytes), &[b, a], |region, offset, data| {
                let dst = if region == a { &mut out_a } else { &mut out_b };
                dst[offset as usize..offset as usize + data.len()].copy_from_slice(data);
                Ok(())
            })
            .unwrap();
            assert_eq!(out_a, data_a);
            assert_eq!(out_b, data_b);
        }
    }

    #[test]
    fn different_layout_is_rejected_before_writing() {
        let a = RegionLayout { base: 0, len: 64 };
        let bytes = encode(&[(a, vec![1; 64])], MemoryWriteOptions::default());
        let other = RegionLayout { base: 0, len: 128 };
        let mut writes = 0;
        let err = decode_memory_section_into(&mut Cursor::new(bytes), &[other], |_, _, _| {
            writes += 1;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, SnapshotError::LayoutMismatch(_)));
        assert_eq!(writes, 0);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut out = Vec::new();
        let err = encode_memory_section(
            &mut out,
            &[],
            MemoryWriteOptions {
                compression: Compression::None,
                chunk_size: 0,
            },
            |_, _, _| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
    }
}

//! Versioned, sectioned machine snapshots.
//!
//! A snapshot is a fixed header (magic, format version, endianness tag) followed by
//! self-describing sections: `u32` id, `u16` version, `u16` flags, `u64` payload length. Readers
//! skip sections they do not know, and trailing bytes inside known sections, so newer writers
//! stay readable. Writable memory is stored as LZ4 (or raw) chunks per region; ROM is never
//! stored.

#![forbid(unsafe_code)]

mod error;
mod format;
mod io;
mod memory;
mod types;

pub use crate::error::{Result, SnapshotError};
pub use crate::format::{
    SectionId, SNAPSHOT_ENDIANNESS_LITTLE, SNAPSHOT_MAGIC, SNAPSHOT_VERSION_V1,
};
pub use crate::memory::{Compression, MemoryWriteOptions, RegionLayout, MAX_REGION_LEN};
pub use crate::types::{CpuState, DeviceState, HookRecord, PatchState, SnapshotMeta};

use std::io::{Read, Seek, SeekFrom, Write};

use crate::io::{ReadLeExt, WriteLeExt};
use crate::types::{MAX_DEVICE_BLOB_LEN, MAX_DEVICE_COUNT};

#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    pub memory: MemoryWriteOptions,
}

pub trait SnapshotSource {
    fn snapshot_meta(&mut self) -> SnapshotMeta;
    fn cpu_state(&self) -> CpuState;
    /// Writable regions only.
    fn memory_regions(&self) -> Vec<RegionLayout>;
    fn read_region(&self, region: RegionLayout, offset: u32, buf: &mut [u8]) -> Result<()>;
    fn device_states(&self) -> Vec<DeviceState>;
    fn patch_state(&self) -> PatchState;
}

/// Receives decoded sections in file order.
///
/// Implementations that must not be left half-restored should stage what they receive and only
/// commit in [`SnapshotTarget::post_restore`], which runs once every section decoded cleanly.
pub trait SnapshotTarget {
    fn restore_meta(&mut self, _meta: SnapshotMeta) {}
    fn restore_cpu_state(&mut self, state: CpuState);
    fn memory_regions(&self) -> Vec<RegionLayout>;
    fn write_region(&mut self, region: RegionLayout, offset: u32, data: &[u8]) -> Result<()>;
    fn restore_device_states(&mut self, states: Vec<DeviceState>);
    fn restore_patch_state(&mut self, state: PatchState);

    fn post_restore(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn save_snapshot<W: Write + Seek, S: SnapshotSource>(
    w: &mut W,
    source: &mut S,
    options: SaveOptions,
) -> Result<()> {
    write_file_header(w)?;

    write_section(w, SectionId::META, 1, 0, |w| {
        let meta = source.snapshot_meta();
        meta.encode(w)
    })?;

    write_section(w, SectionId::CPU, 1, 0, |w| source.cpu_state().encode(w))?;

    write_section(w, SectionId::MEMORY, 1, 0, |w| {
        let mut regions = source.memory_regions();
        regions.sort();
        memory::encode_memory_section(w, &regions, options.memory, |region, offset, buf| {
            source.read_region(region, offset, buf)
        })
    })?;

    write_section(w, SectionId::DEVICES, 1, 0, |w| {
        let mut devices = source.device_states();
        if devices.len() > MAX_DEVICE_COUNT {
            return Err(SnapshotError::Corrupt("too many devices"));
        }
        devices.sort_by_key(|device| device.base);
        w.write_count_u32(devices.len())?;
        for device in devices {
            device.encode(w)?;
        }
        Ok(())
    })?;

    write_section(w, SectionId::PATCHES, 1, 0, |w| source.patch_state().encode(w))?;

    let bytes = w.stream_position()?;
    tracing::debug!(bytes, "snapshot written");
    Ok(())
}

/// Decode a snapshot into `target`.
///
/// The header is checked before any section is read, so an unsupported version never reaches
/// the target. CPU and MEMORY sections are mandatory.
pub fn restore_snapshot<R: Read, T: SnapshotTarget>(r: &mut R, target: &mut T) -> Result<()> {
    read_file_header(r)?;

    const MAX_DEVICES_SECTION_LEN: u64 = 64 * 1024 * 1024;

    let mut seen_cpu = false;
    let mut seen_memory = false;

    while let Some(header) = read_section_header(r)? {
        if header.id == SectionId::DEVICES && header.len > MAX_DEVICES_SECTION_LEN {
            return Err(SnapshotError::Corrupt("devices section too large"));
        }

        let mut section_reader = r.take(header.len);
        match header.id {
            id if id == SectionId::META => {
                if header.version == 1 {
                    let meta = SnapshotMeta::decode(&mut section_reader)?;
                    target.restore_meta(meta);
                }
            }
            id if id == SectionId::CPU => {
                if header.version == 1 {
                    let cpu = CpuState::decode(&mut section_reader)?;
                    target.restore_cpu_state(cpu);
                    seen_cpu = true;
                }
            }
            id if id == SectionId::MEMORY => {
                if header.version == 1 {
                    let expected = target.memory_regions();
                    memory::decode_memory_section_into(
                        &mut section_reader,
                        &expected,
                        |region, offset, data| target.write_region(region, offset, data),
                    )?;
                    seen_memory = true;
                }
            }
            id if id == SectionId::DEVICES => {
                if header.version == 1 {
                    let count = section_reader.read_count_u32(MAX_DEVICE_COUNT)?;
                    let mut devices = Vec::with_capacity(count.min(16));
                    for _ in 0..count {
                        devices.push(DeviceState::decode(&mut section_reader, MAX_DEVICE_BLOB_LEN)?);
                    }
                    target.restore_device_states(devices);
                }
            }
            id if id == SectionId::PATCHES => {
                if header.version == 1 {
                    let patches = PatchState::decode(&mut section_reader)?;
                    target.restore_patch_state(patches);
                }
            }
            id => {
                tracing::debug!(section = %id, len = header.len, "skipping unknown snapshot section");
            }
        }

        // Consume any trailing bytes (forward-compatible additions inside known sections).
        std::io::copy(&mut section_reader, &mut std::io::sink())?;
        if section_reader.limit() != 0 {
            return Err(SnapshotError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated section payload",
            )));
        }
    }

    if !seen_cpu {
        return Err(SnapshotError::Corrupt("missing CPU section"));
    }
    if !seen_memory {
        return Err(SnapshotError::Corrupt("missing MEMORY section"));
    }
    target.post_restore()?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct SectionHeader {
    id: SectionId,
    version: u16,
    len: u64,
}

fn write_file_header<W: Write>(w: &mut W) -> Result<()> {
    w.write_bytes(SNAPSHOT_MAGIC)?;
    w.write_u16_le(SNAPSHOT_VERSION_V1)?;
    w.write_u8(SNAPSHOT_ENDIANNESS_LITTLE)?;
    w.write_u8(0)?; // reserved
    w.write_u32_le(0)?; // flags/reserved
    Ok(())
}

fn read_file_header<R: Read>(r: &mut R) -> Result<()> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    let version = r.read_u16_le()?;
    if version != SNAPSHOT_VERSION_V1 {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let endianness = r.read_u8()?;
    if endianness != SNAPSHOT_ENDIANNESS_LITTLE {
        return Err(SnapshotError::InvalidEndianness(endianness));
    }
    let _reserved = r.read_u8()?;
    let _flags = r.read_u32_le()?;
    Ok(())
}

fn write_section<W: Write + Seek>(
    w: &mut W,
    id: SectionId,
    version: u16,
    flags: u16,
    f: impl FnOnce(&mut W) -> Result<()>,
) -> Result<()> {
    let header_pos = w.stream_position()?;
    w.write_u32_le(id.0)?;
    w.write_u16_le(version)?;
    w.write_u16_le(flags)?;
    w.write_u64_le(0)?; // placeholder len

    let payload_start = w.stream_position()?;
    f(w)?;
    let payload_end = w.stream_position()?;

    let len = payload_end
        .checked_sub(payload_start)
        .ok_or(SnapshotError::Corrupt("stream position underflow"))?;

    w.seek(SeekFrom::Start(header_pos + 8))?;
    w.write_u64_le(len)?;
    w.seek(SeekFrom::Start(payload_end))?;
    Ok(())
}

fn read_section_header<R: Read>(r: &mut R) -> Result<Option<SectionHeader>> {
    let mut first = [0u8; 1];
    if r.read(&mut first)? == 0 {
        return Ok(None);
    }
    let mut tag_bytes = [0u8; 4];
    tag_bytes[0] = first[0];
    r.read_exact(&mut tag_bytes[1..])?;
    let id = SectionId(u32::from_le_bytes(tag_bytes));
    let version = r.read_u16_le()?;
    let _flags = r.read_u16_le()?;
    let len = r.read_u64_le()?;
    Ok(Some(SectionHeader { id, version, len }))
}

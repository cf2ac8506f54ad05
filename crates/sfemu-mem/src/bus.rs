use crate::access::{AccessData, Width};
use crate::error::{MemoryError, Result};
use crate::region::{Backing, MmioDevice, Region, RegionInfo, RegionKind};
use crate::ADDRESS_SPACE;

/// What happens to guest writes that land in ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RomWritePolicy {
    /// Drop the ROM bytes, log a warning and keep running.
    #[default]
    Ignore,
    /// Fail the access with [`MemoryError::ReadOnly`]. Useful when chasing stray writes.
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// At least one byte targeted ROM and was dropped under [`RomWritePolicy::Ignore`].
    Ignored,
}

/// Region router for the emulated address space.
///
/// Regions are kept sorted by base address and are guaranteed disjoint. Multi-byte accesses may
/// straddle adjacent regions; every byte is routed to the region that contains it. An access that
/// touches any unmapped byte fails as a whole before any side effect happens.
pub struct MemoryBus {
    regions: Vec<Region>,
    rom_policy: RomWritePolicy,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("regions", &self.regions().collect::<Vec<_>>())
            .field("rom_policy", &self.rom_policy)
            .finish()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            rom_policy: RomWritePolicy::default(),
        }
    }

    pub fn with_rom_policy(rom_policy: RomWritePolicy) -> Self {
        Self {
            regions: Vec::new(),
            rom_policy,
        }
    }

    pub fn rom_policy(&self) -> RomWritePolicy {
        self.rom_policy
    }

    pub fn set_rom_policy(&mut self, policy: RomWritePolicy) {
        self.rom_policy = policy;
    }

    pub fn map_ram(&mut self, base: u32, len: u32) -> Result<()> {
        self.insert(Region {
            base,
            len,
            backing: Backing::Ram(vec![0u8; len as usize]),
        })
    }

    pub fn map_rom(&mut self, base: u32, image: impl Into<Box<[u8]>>) -> Result<()> {
        let image = image.into();
        let len = u32::try_from(image.len()).map_err(|_| MemoryError::OutOfSpace {
            base,
            len: u32::MAX,
        })?;
        self.insert(Region {
            base,
            len,
            backing: Backing::Rom(image),
        })
    }

    pub fn map_mmio(&mut self, base: u32, len: u32, device: Box<dyn MmioDevice>) -> Result<()> {
        self.insert(Region {
            base,
            len,
            backing: Backing::Mmio(device),
        })
    }

    fn insert(&mut self, region: Region) -> Result<()> {
        if region.len == 0 {
            return Err(MemoryError::EmptyRegion { base: region.base });
        }
        match region.base.checked_add(region.len) {
            Some(end) if end <= ADDRESS_SPACE => {}
            _ => {
                return Err(MemoryError::OutOfSpace {
                    base: region.base,
                    len: region.len,
                })
            }
        }

        let idx = self.regions.partition_point(|r| r.base < region.base);
        let overlap = |existing: &Region| MemoryError::Overlap {
            base: region.base,
            len: region.len,
            existing: existing.base,
        };
        if idx > 0 && self.regions[idx - 1].end() > region.base {
            return Err(overlap(&self.regions[idx - 1]));
        }
        if idx < self.regions.len() && self.regions[idx].base < region.end() {
            return Err(overlap(&self.regions[idx]));
        }

        tracing::debug!(
            base = region.base,
            len = region.len,
            kind = ?region.kind(),
            "mapped memory region"
        );
        self.regions.insert(idx, region);
        Ok(())
    }

    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        self.regions.iter().map(Region::info)
    }

    pub fn region_at(&self, addr: u32) -> Option<RegionInfo> {
        self.find(addr).map(|idx| self.regions[idx].info())
    }

    /// Returns true if every byte of `[addr, addr + len)` is mapped.
    pub fn is_mapped(&self, addr: u32, len: usize) -> bool {
        self.validate(addr, len).is_ok()
    }

    /// Like [`MemoryBus::is_mapped`] but reports the error an access would produce.
    pub fn check_mapped(&self, addr: u32, len: usize) -> Result<()> {
        self.validate(addr, len)
    }

    /// Number of consecutive mapped bytes starting at `addr`, capped at `max`.
    pub fn mapped_len(&self, addr: u32, max: usize) -> usize {
        let mut cur = addr;
        let mut done = 0usize;
        while done < max {
            match self.chunk(cur, max - done) {
                Some((_, n)) => {
                    cur += n as u32;
                    done += n;
                }
                None => break,
            }
        }
        done
    }

    fn find(&self, addr: u32) -> Option<usize> {
        let idx = self.regions.partition_point(|r| r.base <= addr);
        if idx == 0 {
            return None;
        }
        (addr < self.regions[idx - 1].end()).then_some(idx - 1)
    }

    /// Region index and the number of bytes of `remaining` that fall inside it.
    fn chunk(&self, addr: u32, remaining: usize) -> Option<(usize, usize)> {
        let idx = self.find(addr)?;
        let avail = (self.regions[idx].end() - addr) as usize;
        Some((idx, avail.min(remaining)))
    }

    fn validate(&self, addr: u32, len: usize) -> Result<()> {
        let oob = MemoryError::OutOfBounds { addr, len };
        if u64::from(addr) + len as u64 > u64::from(ADDRESS_SPACE) {
            return Err(oob);
        }
        let mut cur = addr;
        let mut remaining = len;
        while remaining > 0 {
            let (_, n) = self.chunk(cur, remaining).ok_or_else(|| oob.clone())?;
            cur += n as u32;
            remaining -= n;
        }
        Ok(())
    }

    fn touches_rom(&self, addr: u32, len: usize) -> bool {
        let mut cur = addr;
        let mut remaining = len;
        while remaining > 0 {
            let Some((idx, n)) = self.chunk(cur, remaining) else {
                return false;
            };
            if self.regions[idx].kind() == RegionKind::Rom {
                return true;
            }
            cur += n as u32;
            remaining -= n;
        }
        false
    }

    /// Read `buf.len()` bytes starting at `addr`, triggering MMIO side effects.
    pub fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.validate(addr, buf.len())?;
        let mut cur = addr;
        let mut done = 0usize;
        while done < buf.len() {
            let (idx, n) = self
                .chunk(cur, buf.len() - done)
                .ok_or(MemoryError::OutOfBounds { addr, len: buf.len() })?;
            let region = &mut self.regions[idx];
            let off = (cur - region.base) as usize;
            let dst = &mut buf[done..done + n];
            match &mut region.backing {
                Backing::Rom(bytes) => dst.copy_from_slice(&bytes[off..off + n]),
                Backing::Ram(bytes) => dst.copy_from_slice(&bytes[off..off + n]),
                Backing::Mmio(dev) => dev.read(off as u32, dst),
            }
            cur += n as u32;
            done += n;
        }
        Ok(())
    }

    /// Write `data` starting at `addr`.
    ///
    /// ROM bytes are handled according to [`RomWritePolicy`]; with `Fault` nothing is written.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<WriteOutcome> {
        self.validate(addr, data.len())?;
        let mut outcome = WriteOutcome::Written;
        if self.touches_rom(addr, data.len()) {
            match self.rom_policy {
                RomWritePolicy::Fault => {
                    return Err(MemoryError::ReadOnly {
                        addr,
                        len: data.len(),
                    })
                }
                RomWritePolicy::Ignore => {
                    tracing::warn!(addr, len = data.len(), "ignoring write to ROM");
                    outcome = WriteOutcome::Ignored;
                }
            }
        }

        let mut cur = addr;
        let mut done = 0usize;
        while done < data.len() {
            let (idx, n) = self
                .chunk(cur, data.len() - done)
                .ok_or(MemoryError::OutOfBounds {
                    addr,
                    len: data.len(),
                })?;
            let region = &mut self.regions[idx];
            let off = (cur - region.base) as usize;
            let src = &data[done..done + n];
            match &mut region.backing {
                Backing::Rom(_) => {}
                Backing::Ram(bytes) => bytes[off..off + n].copy_from_slice(src),
                Backing::Mmio(dev) => dev.write(off as u32, src),
            }
            cur += n as u32;
            done += n;
        }
        Ok(outcome)
    }

    /// Side-effect free read. MMIO bytes read back as open bus (`0xFF`).
    pub fn peek(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.validate(addr, buf.len())?;
        let mut cur = addr;
        let mut done = 0usize;
        while done < buf.len() {
            let (idx, n) = self
                .chunk(cur, buf.len() - done)
                .ok_or(MemoryError::OutOfBounds { addr, len: buf.len() })?;
            let region = &self.regions[idx];
            let off = (cur - region.base) as usize;
            let dst = &mut buf[done..done + n];
            match region.storage() {
                Some(bytes) => dst.copy_from_slice(&bytes[off..off + n]),
                None => dst.fill(0xFF),
            }
            cur += n as u32;
            done += n;
        }
        Ok(())
    }

    pub fn read(&mut self, addr: u32, width: Width) -> Result<AccessData> {
        let mut data = AccessData::zeroed(width);
        self.read_bytes(addr, data.as_mut_slice())?;
        Ok(data)
    }

    pub fn write(&mut self, addr: u32, width: Width, bytes: &[u8]) -> Result<WriteOutcome> {
        if bytes.len() != width.bytes() {
            return Err(MemoryError::WidthMismatch {
                expected: width.bytes(),
                found: bytes.len(),
            });
        }
        self.write_bytes(addr, bytes)
    }

    pub fn read_u8(&mut self, addr: u32) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self, addr: u32) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u8(&mut self, addr: u32, val: u8) -> Result<WriteOutcome> {
        self.write_bytes(addr, &[val])
    }

    pub fn write_u16(&mut self, addr: u32, val: u16) -> Result<WriteOutcome> {
        self.write_bytes(addr, &val.to_le_bytes())
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) -> Result<WriteOutcome> {
        self.write_bytes(addr, &val.to_le_bytes())
    }

    /// Copy a program image into memory during machine setup.
    ///
    /// Unlike [`MemoryBus::write_bytes`] this also fills ROM, since loading the image is how ROM
    /// contents get there in the first place.
    pub fn load_image(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.validate(addr, bytes.len())?;
        let mut cur = addr;
        let mut done = 0usize;
        while done < bytes.len() {
            let (idx, n) = self
                .chunk(cur, bytes.len() - done)
                .ok_or(MemoryError::OutOfBounds {
                    addr,
                    len: bytes.len(),
                })?;
            let region = &mut self.regions[idx];
            let off = (cur - region.base) as usize;
            let src = &bytes[done..done + n];
            match &mut region.backing {
                Backing::Rom(dst) => dst[off..off + n].copy_from_slice(src),
                Backing::Ram(dst) => dst[off..off + n].copy_from_slice(src),
                Backing::Mmio(dev) => dev.write(off as u32, src),
            }
            cur += n as u32;
            done += n;
        }
        Ok(())
    }

    /// Read-only view of a range that lies inside a single ROM or RAM region.
    pub fn slice(&self, addr: u32, len: usize) -> Result<&[u8]> {
        self.validate(addr, len)?;
        let idx = self
            .find(addr)
            .ok_or(MemoryError::OutOfBounds { addr, len })?;
        let region = &self.regions[idx];
        let off = (addr - region.base) as usize;
        match region.storage() {
            Some(bytes) if off + len <= bytes.len() => Ok(&bytes[off..off + len]),
            _ => Err(MemoryError::NotContiguous { addr, len }),
        }
    }

    /// RAM regions and their current contents, in address order.
    pub fn writable_regions(&self) -> impl Iterator<Item = (RegionInfo, &[u8])> + '_ {
        self.regions.iter().filter_map(|r| match &r.backing {
            Backing::Ram(bytes) => Some((r.info(), bytes.as_slice())),
            _ => None,
        })
    }

    /// Overwrite the full contents of the RAM region starting at `base`.
    pub fn restore_region(&mut self, base: u32, data: &[u8]) -> Result<()> {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.base == base)
            .ok_or(MemoryError::OutOfBounds {
                addr: base,
                len: data.len(),
            })?;
        match &mut region.backing {
            Backing::Ram(bytes) if bytes.len() == data.len() => {
                bytes.copy_from_slice(data);
                Ok(())
            }
            _ => Err(MemoryError::NotContiguous {
                addr: base,
                len: data.len(),
            }),
        }
    }

    /// Typed access to the device mapped at `base`.
    pub fn device_mut<T: 'static>(&mut self, base: u32) -> Option<&mut T> {
        self.regions
            .iter_mut()
            .find(|r| r.base == base)
            .and_then(|r| match &mut r.backing {
                Backing::Mmio(dev) => dev.as_any_mut().downcast_mut::<T>(),
                _ => None,
            })
    }

    pub fn device<T: 'static>(&self, base: u32) -> Option<&T> {
        self.regions
            .iter()
            .find(|r| r.base == base)
            .and_then(|r| match &r.backing {
                Backing::Mmio(dev) => dev.as_any().downcast_ref::<T>(),
                _ => None,
            })
    }

    /// Mapped devices keyed by their base address, in address order.
    pub fn devices(&self) -> impl Iterator<Item = (u32, &dyn MmioDevice)> + '_ {
        self.regions.iter().filter_map(|r| match &r.backing {
            Backing::Mmio(dev) => Some((r.base, dev.as_ref())),
            _ => None,
        })
    }

    pub fn devices_mut(&mut self) -> impl Iterator<Item = (u32, &mut dyn MmioDevice)> + '_ {
        self.regions.iter_mut().filter_map(|r| {
            let base = r.base;
            match &mut r.backing {
                Backing::Mmio(dev) => Some((base, dev.as_mut() as &mut dyn MmioDevice)),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[derive(Default)]
    struct Latch {
        last: Option<(u32, Vec<u8>)>,
    }

    impl MmioDevice for Latch {
        fn read(&mut self, offset: u32, buf: &mut [u8]) {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = 0xA0u8.wrapping_add(offset as u8).wrapping_add(i as u8);
            }
        }

        fn write(&mut self, offset: u32, data: &[u8]) {
            self.last = Some((offset, data.to_vec()));
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let mut bus = MemoryBus::new();
        bus.map_ram(0x1000, 0x1000).unwrap();
        assert_eq!(
            bus.map_ram(0x1800, 0x1000),
            Err(MemoryError::Overlap {
                base: 0x1800,
                len: 0x1000,
                existing: 0x1000
            })
        );
        assert_eq!(
            bus.map_ram(0x0800, 0x0801),
            Err(MemoryError::Overlap {
                base: 0x0800,
                len: 0x0801,
                existing: 0x1000
            })
        );
        // Touching but not overlapping is fine.
        bus.map_ram(0x0800, 0x0800).unwrap();
        bus.map_ram(0x2000, 0x10).unwrap();
        assert_eq!(bus.regions().count(), 3);
    }

    #[test]
    fn region_must_fit_address_space() {
        let mut bus = MemoryBus::new();
        assert!(matches!(
            bus.map_ram(0xF_FFF0, 0x20),
            Err(MemoryError::OutOfSpace { .. })
        ));
        assert_eq!(
            bus.map_ram(0x100, 0),
            Err(MemoryError::EmptyRegion { base: 0x100 })
        );
    }

    #[test]
    fn unmapped_access_fails_without_partial_write() {
        let mut bus = MemoryBus::new();
        bus.map_ram(0x0, 0x10).unwrap();
        let err = bus.write_bytes(0xE, &[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err, MemoryError::OutOfBounds { addr: 0xE, len: 4 });
        assert_eq!(bus.read_u16(0xE).unwrap(), 0);
    }

    #[test]
    fn access_straddles_adjacent_regions() {
        let mut bus = MemoryBus::new();
        bus.map_ram(0x0, 0x10).unwrap();
        bus.map_ram(0x10, 0x10).unwrap();
        bus.write_u32(0xE, 0xDEAD_BEEF).unwrap();
        assert_eq!(bus.read_u32(0xE).unwrap(), 0xDEAD_BEEF);
        assert_eq!(bus.read_u8(0x10).unwrap(), 0xAD);
    }

    #[test]
    fn mapped_len_stops_at_first_gap() {
        let mut bus = MemoryBus::new();
        bus.map_ram(0x0, 0x10).unwrap();
        bus.map_rom(0x10, vec![0; 4]).unwrap();
        assert_eq!(bus.mapped_len(0xC, 16), 8);
        assert_eq!(bus.mapped_len(0x2, 6), 6);
        assert_eq!(bus.mapped_len(0x40, 6), 0);
    }

    #[test]
    fn rom_policy_ignore_keeps_rom_and_writes_ram() {
        let mut bus = MemoryBus::new();
        bus.map_rom(0x0, vec![0xAA; 4]).unwrap();
        bus.map_ram(0x4, 4).unwrap();

        let outcome = bus.write_bytes(0x2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(outcome, WriteOutcome::Ignored);
        assert_eq!(bus.read_u16(0x2).unwrap(), 0xAAAA);
        assert_eq!(bus.read_u16(0x4).unwrap(), 0x0403);
    }

    #[test]
    fn rom_policy_fault_rejects_whole_write() {
        let mut bus = MemoryBus::with_rom_policy(RomWritePolicy::Fault);
        bus.map_rom(0x0, vec![0xAA; 4]).unwrap();
        bus.map_ram(0x4, 4).unwrap();

        let err = bus.write_bytes(0x2, &[1, 2, 3, 4]).unwrap_err();
        assert_eq!(err, MemoryError::ReadOnly { addr: 0x2, len: 4 });
        assert_eq!(bus.read_u16(0x4).unwrap(), 0);
    }

    #[test]
    fn mmio_routes_offsets_and_peek_has_no_side_effects() {
        let mut bus = MemoryBus::new();
        bus.map_ram(0x0, 0x80).unwrap();
        bus.map_mmio(0x80, 0x10, Box::<Latch>::default()).unwrap();

        assert_eq!(bus.read_u8(0x82).unwrap(), 0xA2);
        bus.write_u16(0x84, 0x1122).unwrap();
        let latch = bus.device_mut::<Latch>(0x80).unwrap();
        assert_eq!(latch.last, Some((4, vec![0x22, 0x11])));

        let mut buf = [0u8; 2];
        bus.peek(0x7F, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0xFF]);
    }

    #[test]
    fn slice_requires_single_storage_region() {
        let mut bus = MemoryBus::new();
        bus.map_ram(0x0, 0x10).unwrap();
        bus.map_ram(0x10, 0x10).unwrap();
        bus.load_image(0x4, &[9, 8, 7]).unwrap();
        assert_eq!(bus.slice(0x4, 3).unwrap(), &[9, 8, 7]);
        assert!(matches!(
            bus.slice(0xE, 4),
            Err(MemoryError::NotContiguous { .. })
        ));
    }

    #[test]
    fn restore_region_requires_exact_layout() {
        let mut bus = MemoryBus::new();
        bus.map_ram(0x100, 4).unwrap();
        bus.restore_region(0x100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(bus.read_u32(0x100).unwrap(), 0x0403_0201);
        assert!(bus.restore_region(0x100, &[1, 2]).is_err());
        assert!(bus.restore_region(0x200, &[1, 2, 3, 4]).is_err());
    }
}

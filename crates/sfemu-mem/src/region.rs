use std::any::Any;

/// A memory-mapped device window.
///
/// Offsets are relative to the start of the mapped window. Reads take `&mut self` because device
/// registers commonly have read side effects (popping a FIFO, acknowledging a latch).
pub trait MmioDevice {
    fn read(&mut self, offset: u32, buf: &mut [u8]);
    fn write(&mut self, offset: u32, data: &[u8]);

    /// Serialize device state for machine snapshots. Stateless devices keep the default.
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn load_state(&mut self, _state: &[u8]) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Rom,
    Ram,
    Mmio,
}

/// Public, storage-free description of a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub base: u32,
    pub len: u32,
    pub kind: RegionKind,
}

impl RegionInfo {
    #[inline]
    pub fn end(&self) -> u32 {
        self.base + self.len
    }

    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end()
    }
}

pub(crate) enum Backing {
    Rom(Box<[u8]>),
    Ram(Vec<u8>),
    Mmio(Box<dyn MmioDevice>),
}

pub(crate) struct Region {
    pub(crate) base: u32,
    pub(crate) len: u32,
    pub(crate) backing: Backing,
}

impl Region {
    pub(crate) fn kind(&self) -> RegionKind {
        match self.backing {
            Backing::Rom(_) => RegionKind::Rom,
            Backing::Ram(_) => RegionKind::Ram,
            Backing::Mmio(_) => RegionKind::Mmio,
        }
    }

    pub(crate) fn info(&self) -> RegionInfo {
        RegionInfo {
            base: self.base,
            len: self.len,
            kind: self.kind(),
        }
    }

    #[inline]
    pub(crate) fn end(&self) -> u32 {
        self.base + self.len
    }

    pub(crate) fn storage(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Rom(bytes) => Some(bytes),
            Backing::Ram(bytes) => Some(bytes),
            Backing::Mmio(_) => None,
        }
    }
}

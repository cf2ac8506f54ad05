use sfemu_cpu::{BusFault, CpuBus, Fetch, Registers};
use sfemu_mem::MemoryBus;

use crate::engine::PatchEngine;
use crate::error::PatchError;

/// CPU bus that routes every fetch and data access through the hook dispatcher.
pub struct PatchedBus<'a> {
    pub mem: &'a mut MemoryBus,
    pub patches: &'a mut PatchEngine,
}

impl<'a> PatchedBus<'a> {
    pub fn new(mem: &'a mut MemoryBus, patches: &'a mut PatchEngine) -> Self {
        Self { mem, patches }
    }
}

impl From<PatchError> for BusFault {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::Memory(e) => BusFault::Memory(e),
            PatchError::Halted { addr } => BusFault::Halt { addr },
            other => BusFault::Hook(other.to_string()),
        }
    }
}

impl CpuBus for PatchedBus<'_> {
    fn fetch(&mut self, regs: &mut Registers, linear: u32, buf: &mut [u8]) -> Result<Fetch, BusFault> {
        Ok(self.patches.fetch(self.mem, regs, linear, buf)?)
    }

    fn read(&mut self, regs: &Registers, linear: u32, buf: &mut [u8]) -> Result<(), BusFault> {
        Ok(self.patches.read(self.mem, regs, linear, buf)?)
    }

    fn write(&mut self, regs: &Registers, linear: u32, data: &[u8]) -> Result<(), BusFault> {
        Ok(self.patches.write(self.mem, regs, linear, data)?)
    }
}

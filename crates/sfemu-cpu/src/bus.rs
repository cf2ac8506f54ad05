use sfemu_mem::{MemoryBus, MemoryError};
use thiserror::Error;

use crate::decode::OpSize;
use crate::registers::Registers;

/// Why a bus access did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusFault {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// A hook asked the CPU to stop at the current instruction.
    #[error("halt requested at 0x{addr:05x}")]
    Halt { addr: u32 },

    #[error("hook dispatch failed: {0}")]
    Hook(String),
}

/// Result of an instruction fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// The first `n` bytes of the buffer hold instruction bytes (possibly substituted by a hook).
    Bytes(usize),
    /// A hook performed the instruction's work itself. The buffer still holds the original bytes
    /// (`n` of them) so the CPU can step over the instruction.
    Replaced(usize),
    /// A hook halted the CPU before the instruction ran.
    Halt,
}

/// Everything the CPU core can observe or affect outside its register file.
///
/// Implementations decide how accesses are routed; the plain [`MemoryBus`] implementation is
/// hook-free, while the patch engine provides one that dispatches hooks around every access.
pub trait CpuBus {
    /// Fill `buf` with instruction bytes starting at `linear`.
    ///
    /// `regs` is mutable so fetch-time hooks can redirect execution.
    fn fetch(&mut self, regs: &mut Registers, linear: u32, buf: &mut [u8]) -> Result<Fetch, BusFault>;

    fn read(&mut self, regs: &Registers, linear: u32, buf: &mut [u8]) -> Result<(), BusFault>;

    fn write(&mut self, regs: &Registers, linear: u32, data: &[u8]) -> Result<(), BusFault>;

    /// Nothing is attached to the I/O space by default, so reads float high.
    fn port_in(&mut self, _port: u16, size: OpSize) -> Result<u16, BusFault> {
        Ok(match size {
            OpSize::Byte => 0xFF,
            OpSize::Word => 0xFFFF,
        })
    }

    fn port_out(&mut self, port: u16, size: OpSize, value: u16) -> Result<(), BusFault> {
        tracing::trace!(port, ?size, value, "unclaimed port write");
        Ok(())
    }
}

impl CpuBus for MemoryBus {
    fn fetch(&mut self, _regs: &mut Registers, linear: u32, buf: &mut [u8]) -> Result<Fetch, BusFault> {
        let n = self.mapped_len(linear, buf.len());
        if n == 0 {
            return Err(MemoryError::OutOfBounds {
                addr: linear,
                len: 1,
            }
            .into());
        }
        self.read_bytes(linear, &mut buf[..n])?;
        Ok(Fetch::Bytes(n))
    }

    fn read(&mut self, _regs: &Registers, linear: u32, buf: &mut [u8]) -> Result<(), BusFault> {
        Ok(self.read_bytes(linear, buf)?)
    }

    fn write(&mut self, _regs: &Registers, linear: u32, data: &[u8]) -> Result<(), BusFault> {
        self.write_bytes(linear, data)?;
        Ok(())
    }
}

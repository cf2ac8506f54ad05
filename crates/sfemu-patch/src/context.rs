use sfemu_cpu::Registers;
use sfemu_mem::MemoryBus;

use crate::engine::PatchEngine;
use crate::error::HookError;
use crate::hook::{HookAction, HookId, Trigger};

/// Register file as seen by a hook.
pub enum RegsView<'a> {
    Mutable(&'a mut Registers),
    Shared(&'a Registers),
}

impl RegsView<'_> {
    pub fn get(&self) -> &Registers {
        match self {
            RegsView::Mutable(r) => &**r,
            RegsView::Shared(r) => *r,
        }
    }

    pub(crate) fn reborrow(&mut self) -> RegsView<'_> {
        match self {
            RegsView::Mutable(r) => RegsView::Mutable(&mut **r),
            RegsView::Shared(r) => RegsView::Shared(*r),
        }
    }

    pub(crate) fn snapshot(&self) -> Option<Registers> {
        match self {
            RegsView::Mutable(r) => Some(**r),
            RegsView::Shared(_) => None,
        }
    }

    pub(crate) fn restore(&mut self, saved: Option<Registers>) {
        if let (RegsView::Mutable(r), Some(saved)) = (self, saved) {
            **r = saved;
        }
    }
}

/// What a hook callback can see and touch while it runs.
///
/// Data triggers expose the accessed bytes; fetch triggers expose the instruction window.
/// Register-change triggers carry no data. Nested memory accesses go through the same engine, so
/// they dispatch hooks of their own.
///
/// Observe hooks get a read-only context: their reads use [`MemoryBus::peek`], and writes or
/// registry changes fail with [`HookError::ObserveOnly`].
pub struct HookContext<'a> {
    pub(crate) id: HookId,
    pub(crate) action: HookAction,
    pub(crate) trigger: Trigger,
    pub(crate) access_addr: u32,
    pub(crate) data: &'a mut [u8],
    pub(crate) regs: RegsView<'a>,
    pub(crate) engine: &'a mut PatchEngine,
    pub(crate) mem: &'a mut MemoryBus,
}

impl HookContext<'_> {
    pub fn hook_id(&self) -> HookId {
        self.id
    }

    pub fn action(&self) -> HookAction {
        self.action
    }

    fn ensure_mutable(&self, what: &'static str) -> Result<(), HookError> {
        if self.action == HookAction::Observe {
            return Err(HookError::ObserveOnly(what));
        }
        Ok(())
    }

    /// The trigger the hook was registered for.
    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// First linear address of the access (or the instruction address for fetch and
    /// register-change triggers). May be below `trigger().addr` for multi-byte accesses.
    pub fn access_addr(&self) -> u32 {
        self.access_addr
    }

    pub fn data(&self) -> &[u8] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Little-endian value of the access data, at most four bytes.
    pub fn value(&self) -> u32 {
        self.data
            .iter()
            .take(4)
            .enumerate()
            .fold(0, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
    }

    pub fn set_value(&mut self, value: u32) {
        for (i, byte) in self.data.iter_mut().take(4).enumerate() {
            *byte = (value >> (8 * i)) as u8;
        }
    }

    pub fn registers(&self) -> &Registers {
        self.regs.get()
    }

    /// `None` for data triggers, whose registers belong to an instruction still executing.
    pub fn registers_mut(&mut self) -> Option<&mut Registers> {
        match &mut self.regs {
            RegsView::Mutable(r) => Some(&mut **r),
            RegsView::Shared(_) => None,
        }
    }

    /// Side-effect-free view of memory; does not dispatch hooks.
    pub fn memory(&self) -> &MemoryBus {
        &*self.mem
    }

    pub fn peek(&self, addr: u32, buf: &mut [u8]) -> Result<(), HookError> {
        Ok(self.mem.peek(addr, buf)?)
    }

    /// Read through the read hooks. Observe hooks read the backing storage with `peek` instead,
    /// so MMIO device state and read hooks are left alone.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), HookError> {
        if self.action == HookAction::Observe {
            return self.peek(addr, buf);
        }
        let regs = *self.regs.get();
        Ok(self.engine.read(self.mem, &regs, addr, buf)?)
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), HookError> {
        self.ensure_mutable("write memory")?;
        let regs = *self.regs.get();
        Ok(self.engine.write(self.mem, &regs, addr, data)?)
    }

    pub fn read_u8(&mut self, addr: u32) -> Result<u8, HookError> {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self, addr: u32) -> Result<u16, HookError> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self, addr: u32) -> Result<u32, HookError> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), HookError> {
        self.write(addr, &[value])
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> Result<(), HookError> {
        self.write(addr, &value.to_le_bytes())
    }

    /// Enable or disable another hook (or this one) from inside a callback.
    pub fn set_hook_enabled(&mut self, id: HookId, enabled: bool) -> Result<(), HookError> {
        self.ensure_mutable("change the hook registry")?;
        Ok(self.engine.set_enabled(id, enabled)?)
    }
}

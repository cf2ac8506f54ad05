//! Machine state to and from `sfemu-snapshot` byte streams.
//!
//! Saving reads the live machine directly. Restoring decodes into a [`Staged`] copy first and
//! only touches the machine once the whole stream has decoded and the hook registry accepted its
//! part, so a bad snapshot leaves the machine as it was.

use std::io::Cursor;

use sfemu_cpu::{Flags, Registers};
use sfemu_patch::{HookAction, HookDescriptor, HookId, RegistryState, Trigger, TriggerKind};
use sfemu_snapshot::{
    restore_snapshot, save_snapshot, CpuState, DeviceState, HookRecord, PatchState, RegionLayout,
    SaveOptions, SnapshotError, SnapshotMeta, SnapshotSource, SnapshotTarget,
};

use crate::error::{MachineError, Result};
use crate::machine::Machine;

fn cpu_state(regs: &Registers, halted: bool) -> CpuState {
    CpuState {
        ax: regs.ax,
        bx: regs.bx,
        cx: regs.cx,
        dx: regs.dx,
        si: regs.si,
        di: regs.di,
        bp: regs.bp,
        sp: regs.sp,
        cs: regs.cs,
        ds: regs.ds,
        es: regs.es,
        ss: regs.ss,
        ip: regs.ip,
        flags: regs.flags.to_word(),
        cycles: regs.cycles,
        instructions: regs.instructions,
        halted,
    }
}

fn registers(state: &CpuState) -> Registers {
    Registers {
        ax: state.ax,
        bx: state.bx,
        cx: state.cx,
        dx: state.dx,
        si: state.si,
        di: state.di,
        bp: state.bp,
        sp: state.sp,
        cs: state.cs,
        ds: state.ds,
        es: state.es,
        ss: state.ss,
        ip: state.ip,
        flags: Flags::from_word(state.flags),
        cycles: state.cycles,
        instructions: state.instructions,
    }
}

fn hook_record(desc: &HookDescriptor) -> HookRecord {
    HookRecord {
        index: desc.id.index(),
        generation: desc.id.generation(),
        kind: desc.trigger.kind as u8,
        addr: desc.trigger.addr,
        span: desc.span,
        priority: desc.priority,
        action: desc.action.to_u8(),
        exclusive: desc.exclusive,
        enabled: desc.enabled,
        seq: desc.seq,
        label: desc.label.clone(),
    }
}

fn hook_descriptor(record: &HookRecord) -> Result<HookDescriptor> {
    let kind = TriggerKind::from_u8(record.kind)
        .ok_or(SnapshotError::Corrupt("unknown hook trigger kind"))?;
    let action =
        HookAction::from_u8(record.action).ok_or(SnapshotError::Corrupt("unknown hook action"))?;
    Ok(HookDescriptor {
        id: HookId::from_parts(record.index, record.generation),
        trigger: Trigger {
            kind,
            addr: record.addr,
        },
        span: record.span,
        priority: record.priority,
        action,
        exclusive: record.exclusive,
        enabled: record.enabled,
        label: record.label.clone(),
        seq: record.seq,
    })
}

fn registry_state(state: &PatchState) -> Result<RegistryState> {
    Ok(RegistryState {
        hooks: state
            .hooks
            .iter()
            .map(hook_descriptor)
            .collect::<Result<_>>()?,
        generations: state.generations.clone(),
        free: state.free.clone(),
        next_seq: state.next_seq,
    })
}

fn writable_layout(machine: &Machine) -> Vec<RegionLayout> {
    machine
        .mem
        .writable_regions()
        .map(|(info, _)| RegionLayout {
            base: info.base,
            len: info.len,
        })
        .collect()
}

impl SnapshotSource for Machine {
    fn snapshot_meta(&mut self) -> SnapshotMeta {
        let snapshot_id = self.next_snapshot_id;
        self.next_snapshot_id += 1;
        SnapshotMeta {
            snapshot_id,
            label: None,
        }
    }

    fn cpu_state(&self) -> CpuState {
        cpu_state(self.cpu.regs(), self.cpu.is_halted())
    }

    fn memory_regions(&self) -> Vec<RegionLayout> {
        writable_layout(self)
    }

    fn read_region(
        &self,
        region: RegionLayout,
        offset: u32,
        buf: &mut [u8],
    ) -> sfemu_snapshot::Result<()> {
        let bytes = self
            .mem
            .slice(region.base + offset, buf.len())
            .map_err(|_| SnapshotError::Corrupt("memory region changed while saving"))?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    fn device_states(&self) -> Vec<DeviceState> {
        self.mem
            .devices()
            .map(|(base, dev)| DeviceState {
                base,
                data: dev.save_state(),
            })
            .collect()
    }

    fn patch_state(&self) -> PatchState {
        let registry = self.patches.descriptors();
        PatchState {
            hooks: registry.hooks.iter().map(hook_record).collect(),
            generations: registry.generations,
            free: registry.free,
            next_seq: registry.next_seq,
        }
    }
}

/// Decoded snapshot contents waiting to be committed.
struct Staged {
    layout: Vec<RegionLayout>,
    regions: Vec<(RegionLayout, Vec<u8>)>,
    cpu: Option<CpuState>,
    devices: Vec<DeviceState>,
    patches: Option<PatchState>,
}

impl Staged {
    fn new(layout: Vec<RegionLayout>) -> Self {
        let regions = layout
            .iter()
            .map(|&region| (region, vec![0u8; region.len as usize]))
            .collect();
        Self {
            layout,
            regions,
            cpu: None,
            devices: Vec::new(),
            patches: None,
        }
    }
}

impl SnapshotTarget for Staged {
    fn restore_cpu_state(&mut self, state: CpuState) {
        self.cpu = Some(state);
    }

    fn memory_regions(&self) -> Vec<RegionLayout> {
        self.layout.clone()
    }

    fn write_region(
        &mut self,
        region: RegionLayout,
        offset: u32,
        data: &[u8],
    ) -> sfemu_snapshot::Result<()> {
        let (_, bytes) = self
            .regions
            .iter_mut()
            .find(|(r, _)| *r == region)
            .ok_or_else(|| {
                SnapshotError::LayoutMismatch(format!("unexpected region {region}"))
            })?;
        let start = offset as usize;
        let dst = bytes
            .get_mut(start..start + data.len())
            .ok_or(SnapshotError::Corrupt("memory chunk past end of region"))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn restore_device_states(&mut self, states: Vec<DeviceState>) {
        self.devices = states;
    }

    fn restore_patch_state(&mut self, state: PatchState) {
        self.patches = Some(state);
    }

    fn post_restore(&mut self) -> sfemu_snapshot::Result<()> {
        if self.cpu.is_none() {
            return Err(SnapshotError::Corrupt("missing cpu state"));
        }
        Ok(())
    }
}

impl Machine {
    /// Serialize the complete machine state. Only possible between instructions.
    pub fn snapshot(&mut self) -> Result<Vec<u8>> {
        self.snapshot_with(SaveOptions::default())
    }

    pub fn snapshot_with(&mut self, options: SaveOptions) -> Result<Vec<u8>> {
        if !self.cpu.at_boundary() {
            return Err(MachineError::MidInstruction);
        }
        let mut cursor = Cursor::new(Vec::new());
        save_snapshot(&mut cursor, self, options)?;
        let bytes = cursor.into_inner();
        tracing::info!(len = bytes.len(), "machine snapshot taken");
        Ok(bytes)
    }

    /// Replace the machine state with a snapshot taken from a machine with the same memory map
    /// and the same hooks registered in the same order.
    ///
    /// On error the machine is unchanged.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let mut staged = Staged::new(writable_layout(self));
        restore_snapshot(&mut Cursor::new(bytes), &mut staged)?;

        let cpu = staged
            .cpu
            .ok_or(SnapshotError::Corrupt("missing cpu state"))?;
        if let Some(patches) = &staged.patches {
            self.patches.restore_descriptors(&registry_state(patches)?)?;
        }

        for (region, data) in &staged.regions {
            self.mem.restore_region(region.base, data)?;
        }
        for device in &staged.devices {
            match self.mem.devices_mut().find(|(base, _)| *base == device.base) {
                Some((_, dev)) => dev.load_state(&device.data),
                None => tracing::warn!(base = device.base, "no device for saved state; skipping"),
            }
        }
        self.cpu.reset(registers(&cpu));
        self.cpu.set_halted(cpu.halted);
        self.discard_transient_output();

        tracing::info!(ip = cpu.ip, cs = cpu.cs, "machine restored");
        Ok(())
    }
}

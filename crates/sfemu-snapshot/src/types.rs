use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};
use crate::io::{ReadLeExt, WriteLeExt};

const MAX_LABEL_LEN: usize = 4096;
pub(crate) const MAX_DEVICE_BLOB_LEN: usize = 16 * 1024 * 1024;
pub(crate) const MAX_DEVICE_COUNT: usize = 256;
const MAX_HOOK_COUNT: usize = 1 << 20;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub snapshot_id: u64,
    pub label: Option<String>,
}

impl SnapshotMeta {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64_le(self.snapshot_id)?;
        match &self.label {
            Some(label) => {
                w.write_u8(1)?;
                w.write_string_u32(label)?;
            }
            None => w.write_u8(0)?,
        }
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let snapshot_id = r.read_u64_le()?;
        let label = if r.read_bool()? {
            Some(r.read_string_u32(MAX_LABEL_LEN)?)
        } else {
            None
        };
        Ok(Self { snapshot_id, label })
    }
}

/// Architectural CPU state. Only captured at instruction boundaries, so there is no
/// in-flight instruction to store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuState {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub si: u16,
    pub di: u16,
    pub bp: u16,
    pub sp: u16,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub ss: u16,
    pub ip: u16,
    pub flags: u16,
    pub cycles: u64,
    pub instructions: u64,
    pub halted: bool,
}

impl CpuState {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        for v in [
            self.ax, self.bx, self.cx, self.dx, self.si, self.di, self.bp, self.sp, self.cs,
            self.ds, self.es, self.ss, self.ip, self.flags,
        ] {
            w.write_u16_le(v)?;
        }
        w.write_u64_le(self.cycles)?;
        w.write_u64_le(self.instructions)?;
        w.write_u8(u8::from(self.halted))?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut words = [0u16; 14];
        for word in &mut words {
            *word = r.read_u16_le()?;
        }
        let [ax, bx, cx, dx, si, di, bp, sp, cs, ds, es, ss, ip, flags] = words;
        Ok(Self {
            ax,
            bx,
            cx,
            dx,
            si,
            di,
            bp,
            sp,
            cs,
            ds,
            es,
            ss,
            ip,
            flags,
            cycles: r.read_u64_le()?,
            instructions: r.read_u64_le()?,
            halted: r.read_bool()?,
        })
    }
}

/// Opaque state of one memory-mapped device, keyed by the base of the region it is mapped at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub base: u32,
    pub data: Vec<u8>,
}

impl DeviceState {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32_le(self.base)?;
        w.write_len_prefixed_bytes_u32(&self.data)
    }

    pub fn decode<R: Read>(r: &mut R, max_len: usize) -> Result<Self> {
        let base = r.read_u32_le()?;
        let data = r.read_len_prefixed_bytes_u32(max_len)?;
        Ok(Self { base, data })
    }
}

/// One registered hook as stored in a snapshot. Callbacks are host code and are not serialized;
/// the host re-registers them and the restored record re-applies the mutable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookRecord {
    pub index: u32,
    pub generation: u32,
    pub kind: u8,
    pub addr: u32,
    pub span: u32,
    pub priority: i32,
    pub action: u8,
    pub exclusive: bool,
    pub enabled: bool,
    pub seq: u64,
    pub label: String,
}

impl HookRecord {
    fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32_le(self.index)?;
        w.write_u32_le(self.generation)?;
        w.write_u8(self.kind)?;
        w.write_u32_le(self.addr)?;
        w.write_u32_le(self.span)?;
        w.write_u32_le(self.priority as u32)?;
        w.write_u8(self.action)?;
        w.write_u8(u8::from(self.exclusive))?;
        w.write_u8(u8::from(self.enabled))?;
        w.write_u64_le(self.seq)?;
        w.write_string_u32(&self.label)
    }

    fn decode<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            index: r.read_u32_le()?,
            generation: r.read_u32_le()?,
            kind: r.read_u8()?,
            addr: r.read_u32_le()?,
            span: r.read_u32_le()?,
            priority: r.read_u32_le()? as i32,
            action: r.read_u8()?,
            exclusive: r.read_bool()?,
            enabled: r.read_bool()?,
            seq: r.read_u64_le()?,
            label: r.read_string_u32(MAX_LABEL_LEN)?,
        })
    }
}

/// Hook registry: the live hooks plus the id allocator, so ids handed out after a restore match
/// the ids the original run would have produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchState {
    pub hooks: Vec<HookRecord>,
    pub generations: Vec<u32>,
    pub free: Vec<u32>,
    pub next_seq: u64,
}

impl PatchState {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_count_u32(self.generations.len())?;
        for &g in &self.generations {
            w.write_u32_le(g)?;
        }
        w.write_count_u32(self.free.len())?;
        for &i in &self.free {
            w.write_u32_le(i)?;
        }
        w.write_u64_le(self.next_seq)?;
        w.write_count_u32(self.hooks.len())?;
        for hook in &self.hooks {
            hook.encode(w)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let slots = r.read_count_u32(MAX_HOOK_COUNT)?;
        let mut generations = Vec::with_capacity(slots.min(1024));
        for _ in 0..slots {
            generations.push(r.read_u32_le()?);
        }
        let free_count = r.read_count_u32(slots)?;
        let mut free = Vec::with_capacity(free_count.min(1024));
        for _ in 0..free_count {
            let index = r.read_u32_le()?;
            if index as usize >= slots {
                return Err(SnapshotError::Corrupt("free hook slot out of range"));
            }
            free.push(index);
        }
        let next_seq = r.read_u64_le()?;
        let count = r.read_count_u32(slots)?;
        let mut hooks = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let hook = HookRecord::decode(r)?;
            if hook.index as usize >= slots {
                return Err(SnapshotError::Corrupt("hook slot out of range"));
            }
            hooks.push(hook);
        }
        Ok(Self {
            hooks,
            generations,
            free,
            next_seq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cpu_state_layout_is_stable() {
        let state = CpuState {
            ax: 0x1234,
            ip: 0x0100,
            flags: 0x0202,
            cycles: 99,
            instructions: 7,
            halted: true,
            ..CpuState::default()
        };
        let mut bytes = Vec::new();
        state.encode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 14 * 2 + 8 + 8 + 1);
        assert_eq!(&bytes[..2], &[0x34, 0x12]);
        assert_eq!(CpuState::decode(&mut Cursor::new(bytes)).unwrap(), state);
    }

    #[test]
    fn patch_state_rejects_hooks_outside_the_arena() {
        let state = PatchState {
            hooks: vec![HookRecord {
                index: 3,
                ..HookRecord::default()
            }],
            generations: vec![0],
            free: Vec::new(),
            next_seq: 1,
        };
        let mut bytes = Vec::new();
        state.encode(&mut bytes).unwrap();
        let err = PatchState::decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
    }

    #[test]
    fn negative_priorities_survive() {
        let state = PatchState {
            hooks: vec![HookRecord {
                index: 0,
                priority: -5,
                label: "halt".into(),
                enabled: true,
                ..HookRecord::default()
            }],
            generations: vec![2],
            free: Vec::new(),
            next_seq: 4,
        };
        let mut bytes = Vec::new();
        state.encode(&mut bytes).unwrap();
        assert_eq!(PatchState::decode(&mut Cursor::new(bytes)).unwrap(), state);
    }
}

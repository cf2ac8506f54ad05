use sfemu_mem::MemoryError;
use thiserror::Error;

use crate::alu::{
    alu, inc_dec_with_flags, logic_with_flags, set_szp, shift_with_flags, sub_with_flags,
};
use crate::bus::{BusFault, CpuBus, Fetch};
use crate::decode::{
    decode, DecodeError, EaBase, Instruction, LoopKind, MemRef, MulOp, Op, OpSize, Operand, Port, Rep,
    ShiftCount, StrOp, MAX_INSTRUCTION_LEN,
};
use crate::registers::{linear, Flags, Registers, SegReg};

/// Faults reported through [`StepOutcome`]. None of these abort the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuFault {
    #[error("undefined opcode 0x{opcode:02x} at 0x{linear:05x}")]
    Decode { linear: u32, opcode: u8 },

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("hook dispatch failed: {0}")]
    Hook(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuConfig {
    /// Raise INT 1 after each instruction that starts with TF set.
    pub honor_trap_flag: bool,
    /// Emit a `trace` event for every executed instruction.
    pub trace_instructions: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            honor_trap_flag: true,
            trace_instructions: false,
        }
    }
}

/// What one call to [`Cpu::step`] or [`Cpu::step_micro`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Linear address of the instruction that was (or would have been) executed.
    pub addr: u32,
    pub cycles: u64,
    pub halted: bool,
    pub fault: Option<CpuFault>,
    /// A fetch hook replaced the instruction.
    pub replaced: bool,
    /// The instruction ran to completion. Only `false` for an unfinished `REP` micro-step or a
    /// step that halted or faulted.
    pub completed: bool,
}

impl StepOutcome {
    fn new(addr: u32) -> Self {
        Self {
            addr,
            cycles: 0,
            halted: false,
            fault: None,
            replaced: false,
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Halt,
    /// A repeated string instruction has iterations left.
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    inst: Instruction,
    addr: u32,
    trap: bool,
}

/// 8086 interpreter.
///
/// All state lives in [`Registers`] and the halt latch, apart from the continuation of a
/// partially executed `REP` string instruction which [`Cpu::at_boundary`] exposes.
#[derive(Debug, Clone)]
pub struct Cpu {
    regs: Registers,
    config: CpuConfig,
    halted: bool,
    pending: Option<Pending>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(CpuConfig::default())
    }
}

impl Cpu {
    pub fn new(config: CpuConfig) -> Self {
        Self {
            regs: Registers::default(),
            config,
            halted: false,
            pending: None,
        }
    }

    pub fn with_registers(config: CpuConfig, regs: Registers) -> Self {
        Self {
            regs,
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn regs(&self) -> &Registers {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// Replace the whole register file, dropping any pending continuation and the halt latch.
    pub fn reset(&mut self, regs: Registers) {
        self.regs = regs;
        self.halted = false;
        self.pending = None;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    /// True when no instruction is partially executed.
    pub fn at_boundary(&self) -> bool {
        self.pending.is_none()
    }

    pub fn pending_instruction(&self) -> Option<&Instruction> {
        self.pending.as_ref().map(|p| &p.inst)
    }

    /// Execute one whole instruction.
    pub fn step<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> StepOutcome {
        let mut out = self.step_micro(bus);
        while !out.completed && !out.halted && out.fault.is_none() {
            let next = self.step_micro(bus);
            out.cycles += next.cycles;
            out.completed = next.completed;
            out.halted = next.halted;
            out.fault = next.fault;
        }
        out
    }

    /// Execute one instruction, or a single iteration of a repeated string instruction.
    pub fn step_micro<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> StepOutcome {
        if let Some(pending) = self.pending {
            return self.resume_string(bus, pending);
        }

        let addr = self.regs.pc();
        let mut out = StepOutcome::new(addr);
        if self.halted {
            out.halted = true;
            return out;
        }

        let start = self.regs;
        let mut window = [0u8; MAX_INSTRUCTION_LEN];
        let fetched = match bus.fetch(&mut self.regs, addr, &mut window) {
            Ok(f) => f,
            Err(fault) => return self.abort(out, start, fault),
        };

        let n = match fetched {
            Fetch::Halt => {
                tracing::debug!(addr, "fetch hook halted the cpu");
                self.halted = true;
                out.halted = true;
                return out;
            }
            Fetch::Replaced(n) => {
                if self.regs.cs == start.cs && self.regs.ip == start.ip {
                    match decode(&window[..n]) {
                        Ok(inst) => self.regs.ip = self.regs.ip.wrapping_add(u16::from(inst.len)),
                        Err(err) => tracing::warn!(addr, ?err, "replaced instruction does not decode"),
                    }
                }
                self.regs.instructions += 1;
                out.replaced = true;
                out.completed = true;
                return out;
            }
            Fetch::Bytes(_) if self.regs.cs != start.cs || self.regs.ip != start.ip => {
                // A fetch hook moved CS:IP; the fetched instruction is abandoned.
                tracing::debug!(
                    addr,
                    cs = self.regs.cs,
                    ip = self.regs.ip,
                    "fetch hook redirected execution"
                );
                self.regs.instructions += 1;
                out.replaced = true;
                out.completed = true;
                return out;
            }
            Fetch::Bytes(n) => n,
        };

        let inst = match decode(&window[..n]) {
            Ok(inst) => inst,
            Err(DecodeError::Truncated) if n < window.len() => {
                let fault = MemoryError::OutOfBounds {
                    addr: addr + n as u32,
                    len: 1,
                };
                return self.abort(out, start, fault.into());
            }
            Err(DecodeError::Truncated) => {
                return self.decode_fault(out, start, window[0]);
            }
            Err(DecodeError::Invalid { opcode }) => {
                return self.decode_fault(out, start, opcode);
            }
        };

        if self.config.trace_instructions {
            tracing::trace!(addr, cs = start.cs, ip = start.ip, "{inst}");
        }

        let trap = self.config.honor_trap_flag && self.regs.flag(Flags::TF);
        self.regs.ip = self.regs.ip.wrapping_add(u16::from(inst.len));

        let mut exec = Exec {
            regs: &mut self.regs,
            bus: &mut *bus,
            inst: &inst,
            extra: 0,
        };
        let result = exec.run();
        let extra = exec.extra;
        out.cycles = u64::from(inst.cycles) + extra;
        self.finish(out, start, Pending { inst, addr, trap }, result, bus)
    }

    fn resume_string<B: CpuBus + ?Sized>(&mut self, bus: &mut B, pending: Pending) -> StepOutcome {
        let mut out = StepOutcome::new(pending.addr);
        let start = self.regs;
        self.regs.ip = self.regs.ip.wrapping_add(u16::from(pending.inst.len));

        let mut exec = Exec {
            regs: &mut self.regs,
            bus: &mut *bus,
            inst: &pending.inst,
            extra: 0,
        };
        let result = exec.string();
        out.cycles = exec.extra;
        self.finish(out, start, pending, result, bus)
    }

    fn finish<B: CpuBus + ?Sized>(
        &mut self,
        mut out: StepOutcome,
        start: Registers,
        pending: Pending,
        result: Result<Flow, BusFault>,
        bus: &mut B,
    ) -> StepOutcome {
        match result {
            Ok(Flow::Repeat) => {
                self.regs.ip = start.ip;
                self.regs.cycles += out.cycles;
                self.pending = Some(pending);
                out
            }
            Ok(flow) => {
                self.pending = None;
                self.regs.cycles += out.cycles;
                self.regs.instructions += 1;
                out.completed = true;
                if flow == Flow::Halt {
                    self.halted = true;
                    out.halted = true;
                    return out;
                }
                if pending.trap {
                    let mut exec = Exec {
                        regs: &mut self.regs,
                        bus: &mut *bus,
                        inst: &pending.inst,
                        extra: 0,
                    };
                    if let Err(fault) = exec.interrupt(1) {
                        return self.abort(out, start, fault);
                    }
                }
                out
            }
            Err(fault) => self.abort(out, start, fault),
        }
    }

    /// Roll the register file back to the start of the faulting step and report.
    fn abort(&mut self, mut out: StepOutcome, start: Registers, fault: BusFault) -> StepOutcome {
        self.regs = start;
        self.pending = None;
        out.completed = false;
        out.cycles = 0;
        match fault {
            BusFault::Halt { addr } => {
                tracing::debug!(addr, "hook halted the cpu mid-instruction");
                self.halted = true;
                out.halted = true;
            }
            BusFault::Memory(err) => {
                tracing::warn!(addr = out.addr, %err, "memory fault");
                out.fault = Some(CpuFault::Memory(err));
            }
            BusFault::Hook(msg) => {
                tracing::warn!(addr = out.addr, %msg, "hook fault");
                out.fault = Some(CpuFault::Hook(msg));
            }
        }
        out
    }

    fn decode_fault(&mut self, mut out: StepOutcome, start: Registers, opcode: u8) -> StepOutcome {
        self.regs = start;
        tracing::warn!(addr = out.addr, opcode, "decode fault");
        out.fault = Some(CpuFault::Decode {
            linear: out.addr,
            opcode,
        });
        out
    }
}

struct Exec<'a, B: ?Sized> {
    regs: &'a mut Registers,
    bus: &'a mut B,
    inst: &'a Instruction,
    extra: u64,
}

impl<B: CpuBus + ?Sized> Exec<'_, B> {
    fn segment_of(&self, m: &MemRef) -> u16 {
        let seg = self.inst.prefixes.segment.unwrap_or(m.default_segment());
        self.regs.seg(seg)
    }

    fn effective(&self, m: &MemRef) -> u16 {
        let r = &*self.regs;
        let base = match m.base {
            EaBase::BxSi => r.bx.wrapping_add(r.si),
            EaBase::BxDi => r.bx.wrapping_add(r.di),
            EaBase::BpSi => r.bp.wrapping_add(r.si),
            EaBase::BpDi => r.bp.wrapping_add(r.di),
            EaBase::Si => r.si,
            EaBase::Di => r.di,
            EaBase::Bp => r.bp,
            EaBase::Bx => r.bx,
            EaBase::Direct => 0,
        };
        base.wrapping_add(m.disp)
    }

    fn read_mem(&mut self, seg: u16, off: u16, size: OpSize) -> Result<u16, BusFault> {
        let lin = linear(seg, off);
        match size {
            OpSize::Byte => {
                let mut b = [0u8; 1];
                self.bus.read(&*self.regs, lin, &mut b)?;
                Ok(u16::from(b[0]))
            }
            // Word accesses at offset 0xFFFF wrap within the segment.
            OpSize::Word if off == 0xFFFF || lin == 0xF_FFFF => {
                let lo = self.read_mem(seg, off, OpSize::Byte)?;
                let hi = self.read_mem(seg, off.wrapping_add(1), OpSize::Byte)?;
                Ok(lo | (hi << 8))
            }
            OpSize::Word => {
                let mut b = [0u8; 2];
                self.bus.read(&*self.regs, lin, &mut b)?;
                Ok(u16::from_le_bytes(b))
            }
        }
    }

    fn write_mem(&mut self, seg: u16, off: u16, size: OpSize, value: u16) -> Result<(), BusFault> {
        let lin = linear(seg, off);
        match size {
            OpSize::Byte => self.bus.write(&*self.regs, lin, &[value as u8]),
            OpSize::Word if off == 0xFFFF || lin == 0xF_FFFF => {
                self.write_mem(seg, off, OpSize::Byte, value & 0xFF)?;
                self.write_mem(seg, off.wrapping_add(1), OpSize::Byte, value >> 8)
            }
            OpSize::Word => self.bus.write(&*self.regs, lin, &value.to_le_bytes()),
        }
    }

    fn read_op(&mut self, op: &Operand, size: OpSize) -> Result<u16, BusFault> {
        Ok(match op {
            Operand::Reg8(r) => u16::from(self.regs.reg8(*r)),
            Operand::Reg16(r) => self.regs.reg16(*r),
            Operand::Seg(s) => self.regs.seg(*s),
            Operand::Imm(v) => *v,
            Operand::Mem(m) => {
                let seg = self.segment_of(m);
                let off = self.effective(m);
                return self.read_mem(seg, off, size);
            }
        })
    }

    fn write_op(&mut self, op: &Operand, size: OpSize, value: u16) -> Result<(), BusFault> {
        match op {
            Operand::Reg8(r) => self.regs.set_reg8(*r, value as u8),
            Operand::Reg16(r) => self.regs.set_reg16(*r, value),
            Operand::Seg(s) => self.regs.set_seg(*s, value),
            // The decoder never produces an immediate destination.
            Operand::Imm(_) => {}
            Operand::Mem(m) => {
                let seg = self.segment_of(m);
                let off = self.effective(m);
                return self.write_mem(seg, off, size, value);
            }
        }
        Ok(())
    }

    fn push(&mut self, value: u16) -> Result<(), BusFault> {
        let sp = self.regs.sp.wrapping_sub(2);
        self.regs.sp = sp;
        let ss = self.regs.ss;
        self.write_mem(ss, sp, OpSize::Word, value)
    }

    fn pop(&mut self) -> Result<u16, BusFault> {
        let value = self.read_mem(self.regs.ss, self.regs.sp, OpSize::Word)?;
        self.regs.sp = self.regs.sp.wrapping_add(2);
        Ok(value)
    }

    fn read_far(&mut self, m: &MemRef) -> Result<(u16, u16), BusFault> {
        let seg = self.segment_of(m);
        let off = self.effective(m);
        let target_off = self.read_mem(seg, off, OpSize::Word)?;
        let target_seg = self.read_mem(seg, off.wrapping_add(2), OpSize::Word)?;
        Ok((target_seg, target_off))
    }

    fn jump_rel(&mut self, rel: i16) {
        self.regs.ip = self.regs.ip.wrapping_add(rel as u16);
    }

    /// Vector through the interrupt table at linear 0, pushing FLAGS, CS and IP.
    fn interrupt(&mut self, vector: u8) -> Result<(), BusFault> {
        let flags = self.regs.flags.to_word();
        self.push(flags)?;
        self.regs.flags.remove(Flags::IF | Flags::TF);
        let cs = self.regs.cs;
        self.push(cs)?;
        let ip = self.regs.ip;
        self.push(ip)?;
        let entry = u16::from(vector) * 4;
        let new_ip = self.read_mem(0, entry, OpSize::Word)?;
        let new_cs = self.read_mem(0, entry + 2, OpSize::Word)?;
        self.regs.ip = new_ip;
        self.regs.cs = new_cs;
        Ok(())
    }

    fn acc(&self, size: OpSize) -> u16 {
        match size {
            OpSize::Byte => u16::from(self.regs.al()),
            OpSize::Word => self.regs.ax,
        }
    }

    fn set_acc(&mut self, size: OpSize, value: u16) {
        match size {
            OpSize::Byte => self.regs.set_al(value as u8),
            OpSize::Word => self.regs.ax = value,
        }
    }

    fn run(&mut self) -> Result<Flow, BusFault> {
        let inst = *self.inst;
        match inst.op {
            Op::Alu { op, size, dst, src } => {
                let d = self.read_op(&dst, size)?;
                let s = self.read_op(&src, size)?;
                let r = alu(&mut self.regs.flags, op, d.into(), s.into(), size);
                if op.writes_result() {
                    self.write_op(&dst, size, r as u16)?;
                }
            }
            Op::Test { size, dst, src } => {
                let d = self.read_op(&dst, size)?;
                let s = self.read_op(&src, size)?;
                logic_with_flags(&mut self.regs.flags, u32::from(d & s), size);
            }
            Op::Mov { size, dst, src } => {
                let v = self.read_op(&src, size)?;
                self.write_op(&dst, size, v)?;
            }
            Op::Xchg { size, a, b } => {
                let va = self.read_op(&a, size)?;
                let vb = self.read_op(&b, size)?;
                self.write_op(&b, size, va)?;
                self.write_op(&a, size, vb)?;
            }
            Op::Inc { size, dst } | Op::Dec { size, dst } => {
                let dec = matches!(inst.op, Op::Dec { .. });
                let d = self.read_op(&dst, size)?;
                let r = inc_dec_with_flags(&mut self.regs.flags, d.into(), dec, size);
                self.write_op(&dst, size, r as u16)?;
            }
            Op::Not { size, dst } => {
                let d = self.read_op(&dst, size)?;
                self.write_op(&dst, size, !d)?;
            }
            Op::Neg { size, dst } => {
                let d = self.read_op(&dst, size)?;
                let r = sub_with_flags(&mut self.regs.flags, 0, d.into(), false, size);
                self.write_op(&dst, size, r as u16)?;
            }
            Op::MulDiv { op, size, src } => {
                let s = self.read_op(&src, size)?;
                if !self.mul_div(op, size, s) {
                    self.interrupt(0)?;
                }
            }
            Op::Shift {
                op,
                size,
                dst,
                count,
            } => {
                let n = match count {
                    ShiftCount::One => 1,
                    ShiftCount::Cl => {
                        let n = self.regs.reg8(1);
                        self.extra += 4 * u64::from(n);
                        n
                    }
                };
                let d = self.read_op(&dst, size)?;
                let r = shift_with_flags(&mut self.regs.flags, op, d.into(), n, size);
                self.write_op(&dst, size, r as u16)?;
            }
            Op::Push(op) => {
                // The 8086 pushes the already-decremented SP.
                let v = match op {
                    Operand::Reg16(4) => self.regs.sp.wrapping_sub(2),
                    _ => self.read_op(&op, OpSize::Word)?,
                };
                self.push(v)?;
            }
            Op::Pop(op) => {
                let v = self.pop()?;
                self.write_op(&op, OpSize::Word, v)?;
            }
            Op::Lea { reg, mem } => {
                let off = self.effective(&mem);
                self.regs.set_reg16(reg, off);
            }
            Op::Lds { reg, mem } | Op::Les { reg, mem } => {
                let (seg, off) = self.read_far(&mem)?;
                self.regs.set_reg16(reg, off);
                let target = if matches!(inst.op, Op::Lds { .. }) {
                    SegReg::Ds
                } else {
                    SegReg::Es
                };
                self.regs.set_seg(target, seg);
            }
            Op::Cbw => self.regs.ax = self.regs.al() as i8 as i16 as u16,
            Op::Cwd => self.regs.dx = if self.regs.ax & 0x8000 != 0 { 0xFFFF } else { 0 },
            Op::Lahf => {
                let low = self.regs.flags.to_word() as u8;
                self.regs.set_ah(low);
            }
            Op::Sahf => {
                const MASK: u16 = 0x00D5;
                let word = (self.regs.flags.bits() & !MASK) | (u16::from(self.regs.ah()) & MASK);
                self.regs.flags = Flags::from_word(word);
            }
            Op::Pushf => {
                let v = self.regs.flags.to_word();
                self.push(v)?;
            }
            Op::Popf => {
                let v = self.pop()?;
                self.regs.flags = Flags::from_word(v);
            }
            Op::Jcc { cond, rel } => {
                if cond.eval(self.regs.flags) {
                    self.jump_rel(i16::from(rel));
                    self.extra += 12;
                }
            }
            Op::Jmp { rel, .. } => self.jump_rel(rel),
            Op::JmpFar { seg, off } => {
                self.regs.cs = seg;
                self.regs.ip = off;
            }
            Op::JmpIndirect(op) => self.regs.ip = self.read_op(&op, OpSize::Word)?,
            Op::JmpFarIndirect(mem) => {
                let (seg, off) = self.read_far(&mem)?;
                self.regs.cs = seg;
                self.regs.ip = off;
            }
            Op::Call { rel } => {
                let ip = self.regs.ip;
                self.push(ip)?;
                self.jump_rel(rel);
            }
            Op::CallFar { seg, off } => {
                let (cs, ip) = (self.regs.cs, self.regs.ip);
                self.push(cs)?;
                self.push(ip)?;
                self.regs.cs = seg;
                self.regs.ip = off;
            }
            Op::CallIndirect(op) => {
                let target = self.read_op(&op, OpSize::Word)?;
                let ip = self.regs.ip;
                self.push(ip)?;
                self.regs.ip = target;
            }
            Op::CallFarIndirect(mem) => {
                let (seg, off) = self.read_far(&mem)?;
                let (cs, ip) = (self.regs.cs, self.regs.ip);
                self.push(cs)?;
                self.push(ip)?;
                self.regs.cs = seg;
                self.regs.ip = off;
            }
            Op::Ret { pop } => {
                self.regs.ip = self.pop()?;
                self.regs.sp = self.regs.sp.wrapping_add(pop);
            }
            Op::Retf { pop } => {
                self.regs.ip = self.pop()?;
                self.regs.cs = self.pop()?;
                self.regs.sp = self.regs.sp.wrapping_add(pop);
            }
            Op::Loop { kind, rel } => {
                let zf = self.regs.flag(Flags::ZF);
                let (taken, bonus) = match kind {
                    LoopKind::Jcxz => (self.regs.cx == 0, 12),
                    _ => {
                        self.regs.cx = self.regs.cx.wrapping_sub(1);
                        let nonzero = self.regs.cx != 0;
                        match kind {
                            LoopKind::Loopz => (nonzero && zf, 12),
                            LoopKind::Loopnz => (nonzero && !zf, 14),
                            _ => (nonzero, 12),
                        }
                    }
                };
                if taken {
                    self.jump_rel(i16::from(rel));
                    self.extra += bonus;
                }
            }
            Op::Str { .. } => return self.string(),
            Op::Int(n) => self.interrupt(n)?,
            Op::Int3 => self.interrupt(3)?,
            Op::Into => {
                if self.regs.flag(Flags::OF) {
                    self.extra += 49;
                    self.interrupt(4)?;
                }
            }
            Op::Iret => {
                self.regs.ip = self.pop()?;
                self.regs.cs = self.pop()?;
                let flags = self.pop()?;
                self.regs.flags = Flags::from_word(flags);
            }
            Op::In { size, port } => {
                let port = self.port(port);
                let v = self.bus.port_in(port, size)?;
                self.set_acc(size, v);
            }
            Op::Out { size, port } => {
                let port = self.port(port);
                let v = self.acc(size);
                self.bus.port_out(port, size, v)?;
            }
            Op::Daa => self.daa(),
            Op::Das => self.das(),
            Op::Aaa | Op::Aas => {
                let (al, ah) = (self.regs.al(), self.regs.ah());
                let adjust = (al & 0x0F) > 9 || self.regs.flag(Flags::AF);
                // AL and AH adjust separately; a carry out of AL never reaches AH.
                if adjust {
                    if matches!(inst.op, Op::Aaa) {
                        self.regs.set_al(al.wrapping_add(6));
                        self.regs.set_ah(ah.wrapping_add(1));
                    } else {
                        self.regs.set_al(al.wrapping_sub(6));
                        self.regs.set_ah(ah.wrapping_sub(1));
                    }
                }
                self.regs.flags.set(Flags::AF, adjust);
                self.regs.flags.set(Flags::CF, adjust);
                self.regs.ax &= 0xFF0F;
            }
            Op::Aam(base) => {
                if base == 0 {
                    self.interrupt(0)?;
                } else {
                    let al = self.regs.al();
                    self.regs.set_ah(al / base);
                    let rem = al % base;
                    self.regs.set_al(rem);
                    set_szp(&mut self.regs.flags, u32::from(rem), OpSize::Byte);
                }
            }
            Op::Aad(base) => {
                let al = self.regs.al().wrapping_add(self.regs.ah().wrapping_mul(base));
                self.regs.ax = u16::from(al);
                set_szp(&mut self.regs.flags, u32::from(al), OpSize::Byte);
            }
            Op::Xlat => {
                let seg = self.regs.seg(self.inst.prefixes.segment.unwrap_or(SegReg::Ds));
                let off = self.regs.bx.wrapping_add(u16::from(self.regs.al()));
                let v = self.read_mem(seg, off, OpSize::Byte)?;
                self.regs.set_al(v as u8);
            }
            Op::Clc => self.regs.set_flag(Flags::CF, false),
            Op::Stc => self.regs.set_flag(Flags::CF, true),
            Op::Cmc => self.regs.flags.toggle(Flags::CF),
            Op::Cld => self.regs.set_flag(Flags::DF, false),
            Op::Std => self.regs.set_flag(Flags::DF, true),
            Op::Cli => self.regs.set_flag(Flags::IF, false),
            Op::Sti => self.regs.set_flag(Flags::IF, true),
            Op::Hlt => return Ok(Flow::Halt),
            Op::Nop | Op::Wait => {}
        }
        Ok(Flow::Next)
    }

    fn port(&self, port: Port) -> u16 {
        match port {
            Port::Imm(p) => u16::from(p),
            Port::Dx => self.regs.dx,
        }
    }

    /// Returns `false` on a divide error.
    fn mul_div(&mut self, op: MulOp, size: OpSize, src: u16) -> bool {
        let r = &mut *self.regs;
        match (op, size) {
            (MulOp::Mul, OpSize::Byte) => {
                let v = u16::from(r.al()) * (src & 0xFF);
                r.ax = v;
                let hi = v > 0xFF;
                r.flags.set(Flags::CF | Flags::OF, hi);
            }
            (MulOp::Mul, OpSize::Word) => {
                let v = u32::from(r.ax) * u32::from(src);
                r.ax = v as u16;
                r.dx = (v >> 16) as u16;
                r.flags.set(Flags::CF | Flags::OF, r.dx != 0);
            }
            (MulOp::Imul, OpSize::Byte) => {
                let v = i16::from(r.al() as i8) * i16::from(src as u8 as i8);
                r.ax = v as u16;
                r.flags.set(Flags::CF | Flags::OF, v != i16::from(v as i8));
            }
            (MulOp::Imul, OpSize::Word) => {
                let v = i32::from(r.ax as i16) * i32::from(src as i16);
                r.ax = v as u16;
                r.dx = (v >> 16) as u16;
                r.flags.set(Flags::CF | Flags::OF, v != i32::from(v as i16));
            }
            (MulOp::Div, OpSize::Byte) => {
                let d = src & 0xFF;
                if d == 0 {
                    return false;
                }
                let q = r.ax / d;
                if q > 0xFF {
                    return false;
                }
                let rem = r.ax % d;
                r.ax = (rem << 8) | q;
            }
            (MulOp::Div, OpSize::Word) => {
                let d = u32::from(src);
                if d == 0 {
                    return false;
                }
                let n = (u32::from(r.dx) << 16) | u32::from(r.ax);
                let q = n / d;
                if q > 0xFFFF {
                    return false;
                }
                r.ax = q as u16;
                r.dx = (n % d) as u16;
            }
            (MulOp::Idiv, OpSize::Byte) => {
                let d = i32::from(src as u8 as i8);
                if d == 0 {
                    return false;
                }
                let n = i32::from(r.ax as i16);
                let q = n / d;
                // The 8086 rejects -128 as a quotient.
                if !(-127..=127).contains(&q) {
                    return false;
                }
                let rem = n % d;
                r.ax = ((rem as u8 as u16) << 8) | (q as u8 as u16);
            }
            (MulOp::Idiv, OpSize::Word) => {
                let d = i64::from(src as i16);
                if d == 0 {
                    return false;
                }
                let n = i64::from(((u32::from(r.dx) << 16) | u32::from(r.ax)) as i32);
                let q = n / d;
                if !(-32767..=32767).contains(&q) {
                    return false;
                }
                r.ax = q as u16;
                r.dx = (n % d) as u16;
            }
        }
        true
    }

    fn daa(&mut self) {
        let r = &mut *self.regs;
        let old_al = r.al();
        let old_cf = r.flag(Flags::CF);
        let mut al = old_al;
        if (al & 0x0F) > 9 || r.flag(Flags::AF) {
            al = al.wrapping_add(6);
            r.flags.set(Flags::CF, old_cf || old_al > 0xF9);
            r.flags.insert(Flags::AF);
        } else {
            r.flags.remove(Flags::AF);
        }
        if old_al > 0x99 || old_cf {
            al = al.wrapping_add(0x60);
            r.flags.insert(Flags::CF);
        } else {
            r.flags.remove(Flags::CF);
        }
        r.set_al(al);
        set_szp(&mut r.flags, u32::from(al), OpSize::Byte);
    }

    fn das(&mut self) {
        let r = &mut *self.regs;
        let old_al = r.al();
        let old_cf = r.flag(Flags::CF);
        let mut al = old_al;
        r.flags.remove(Flags::CF);
        if (al & 0x0F) > 9 || r.flag(Flags::AF) {
            al = al.wrapping_sub(6);
            r.flags.set(Flags::CF, old_cf || old_al < 6);
            r.flags.insert(Flags::AF);
        } else {
            r.flags.remove(Flags::AF);
        }
        if old_al > 0x99 || old_cf {
            al = al.wrapping_sub(0x60);
            r.flags.insert(Flags::CF);
        }
        r.set_al(al);
        set_szp(&mut r.flags, u32::from(al), OpSize::Byte);
    }

    /// One iteration of a string instruction; the whole instruction when not repeated.
    fn string(&mut self) -> Result<Flow, BusFault> {
        let Op::Str { op, size } = self.inst.op else {
            return Ok(Flow::Next);
        };
        let rep = self.inst.prefixes.rep;
        if rep.is_some() && self.regs.cx == 0 {
            return Ok(Flow::Next);
        }

        let step = size.bytes() as u16;
        let delta = if self.regs.flag(Flags::DF) {
            step.wrapping_neg()
        } else {
            step
        };
        let src_seg = self.regs.seg(self.inst.prefixes.segment.unwrap_or(SegReg::Ds));
        let es = self.regs.es;

        match op {
            StrOp::Movs => {
                let v = self.read_mem(src_seg, self.regs.si, size)?;
                self.write_mem(es, self.regs.di, size, v)?;
                self.regs.si = self.regs.si.wrapping_add(delta);
                self.regs.di = self.regs.di.wrapping_add(delta);
            }
            StrOp::Cmps => {
                let a = self.read_mem(src_seg, self.regs.si, size)?;
                let b = self.read_mem(es, self.regs.di, size)?;
                sub_with_flags(&mut self.regs.flags, a.into(), b.into(), false, size);
                self.regs.si = self.regs.si.wrapping_add(delta);
                self.regs.di = self.regs.di.wrapping_add(delta);
            }
            StrOp::Stos => {
                let v = self.acc(size);
                self.write_mem(es, self.regs.di, size, v)?;
                self.regs.di = self.regs.di.wrapping_add(delta);
            }
            StrOp::Lods => {
                let v = self.read_mem(src_seg, self.regs.si, size)?;
                self.set_acc(size, v);
                self.regs.si = self.regs.si.wrapping_add(delta);
            }
            StrOp::Scas => {
                let a = self.acc(size);
                let b = self.read_mem(es, self.regs.di, size)?;
                sub_with_flags(&mut self.regs.flags, a.into(), b.into(), false, size);
                self.regs.di = self.regs.di.wrapping_add(delta);
            }
        }

        let Some(rep) = rep else {
            return Ok(Flow::Next);
        };
        self.extra += u64::from(op.rep_cycles());
        self.regs.cx = self.regs.cx.wrapping_sub(1);
        let zf = self.regs.flag(Flags::ZF);
        let stop = self.regs.cx == 0
            || (op.compares()
                && match rep {
                    Rep::Rep => !zf,
                    Rep::Repne => zf,
                });
        Ok(if stop { Flow::Next } else { Flow::Repeat })
    }
}

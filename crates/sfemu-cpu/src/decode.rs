//! Pure 8086 instruction decoder.
//!
//! [`decode`] turns a window of instruction bytes into an [`Instruction`] without touching any
//! machine state. Execution lives in [`crate::exec`]; disassembly in [`crate::disasm`].

use crate::alu::{AluOp, ShiftOp};
use crate::registers::{Flags, SegReg};

/// Longest byte window the CPU hands the decoder. Real instructions are at most 6 bytes plus
/// prefixes; anything that runs past this is treated as a decode fault.
pub const MAX_INSTRUCTION_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The window ended before the instruction did.
    Truncated,
    /// Undefined encoding or an instruction outside the 8086 base set (including FPU escapes).
    Invalid { opcode: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpSize {
    Byte,
    Word,
}

impl OpSize {
    #[inline]
    fn from_w(opcode: u8) -> Self {
        if opcode & 1 == 0 {
            OpSize::Byte
        } else {
            OpSize::Word
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            OpSize::Byte => 1,
            OpSize::Word => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rep {
    /// `F3`: REP for MOVS/STOS/LODS, REPE for CMPS/SCAS.
    Rep,
    /// `F2`: REPNE.
    Repne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Prefixes {
    pub segment: Option<SegReg>,
    pub rep: Option<Rep>,
    pub lock: bool,
}

/// Base register combination of a ModR/M memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EaBase {
    BxSi,
    BxDi,
    BpSi,
    BpDi,
    Si,
    Di,
    Bp,
    Bx,
    /// `[disp16]` with no base register.
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRef {
    pub base: EaBase,
    pub disp: u16,
    pub has_disp: bool,
}

impl MemRef {
    pub fn direct(addr: u16) -> Self {
        Self {
            base: EaBase::Direct,
            disp: addr,
            has_disp: true,
        }
    }

    /// Segment used when no override prefix is present.
    pub fn default_segment(&self) -> SegReg {
        match self.base {
            EaBase::BpSi | EaBase::BpDi | EaBase::Bp => SegReg::Ss,
            _ => SegReg::Ds,
        }
    }

    /// Effective-address calculation cost in clocks.
    pub fn ea_cycles(&self) -> u16 {
        let base = match self.base {
            EaBase::Direct => return 6,
            EaBase::Si | EaBase::Di | EaBase::Bp | EaBase::Bx => 5,
            EaBase::BpDi | EaBase::BxSi => 7,
            EaBase::BpSi | EaBase::BxDi => 8,
        };
        if self.has_disp {
            base + 4
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg8(u8),
    Reg16(u8),
    Seg(SegReg),
    Mem(MemRef),
    Imm(u16),
}

impl Operand {
    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Mem(_))
    }

    fn reg(size: OpSize, index: u8) -> Self {
        match size {
            OpSize::Byte => Operand::Reg8(index),
            OpSize::Word => Operand::Reg16(index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    O,
    No,
    B,
    Ae,
    E,
    Ne,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

impl Cond {
    pub fn from_index(index: u8) -> Self {
        const ALL: [Cond; 16] = [
            Cond::O,
            Cond::No,
            Cond::B,
            Cond::Ae,
            Cond::E,
            Cond::Ne,
            Cond::Be,
            Cond::A,
            Cond::S,
            Cond::Ns,
            Cond::P,
            Cond::Np,
            Cond::L,
            Cond::Ge,
            Cond::Le,
            Cond::G,
        ];
        ALL[usize::from(index & 0xF)]
    }

    pub fn eval(self, flags: Flags) -> bool {
        let cf = flags.contains(Flags::CF);
        let zf = flags.contains(Flags::ZF);
        let sf = flags.contains(Flags::SF);
        let of = flags.contains(Flags::OF);
        let pf = flags.contains(Flags::PF);
        match self {
            Cond::O => of,
            Cond::No => !of,
            Cond::B => cf,
            Cond::Ae => !cf,
            Cond::E => zf,
            Cond::Ne => !zf,
            Cond::Be => cf || zf,
            Cond::A => !cf && !zf,
            Cond::S => sf,
            Cond::Ns => !sf,
            Cond::P => pf,
            Cond::Np => !pf,
            Cond::L => sf != of,
            Cond::Ge => sf == of,
            Cond::Le => zf || sf != of,
            Cond::G => !zf && sf == of,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Cond::O => "o",
            Cond::No => "no",
            Cond::B => "b",
            Cond::Ae => "ae",
            Cond::E => "z",
            Cond::Ne => "nz",
            Cond::Be => "be",
            Cond::A => "a",
            Cond::S => "s",
            Cond::Ns => "ns",
            Cond::P => "p",
            Cond::Np => "np",
            Cond::L => "l",
            Cond::Ge => "ge",
            Cond::Le => "le",
            Cond::G => "g",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Loopnz,
    Loopz,
    Loop,
    Jcxz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrOp {
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
}

impl StrOp {
    /// Clocks per repeated iteration.
    pub fn rep_cycles(self) -> u16 {
        match self {
            StrOp::Movs => 17,
            StrOp::Cmps => 22,
            StrOp::Stos => 10,
            StrOp::Lods => 13,
            StrOp::Scas => 15,
        }
    }

    /// CMPS and SCAS honour the ZF condition of REPE/REPNE.
    pub fn compares(self) -> bool {
        matches!(self, StrOp::Cmps | StrOp::Scas)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftCount {
    One,
    Cl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Imm(u8),
    Dx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulOp {
    Mul,
    Imul,
    Div,
    Idiv,
}

/// Decoded operation. One variant per instruction class, exhaustively matched by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Alu { op: AluOp, size: OpSize, dst: Operand, src: Operand },
    Test { size: OpSize, dst: Operand, src: Operand },
    Mov { size: OpSize, dst: Operand, src: Operand },
    Xchg { size: OpSize, a: Operand, b: Operand },
    Inc { size: OpSize, dst: Operand },
    Dec { size: OpSize, dst: Operand },
    Not { size: OpSize, dst: Operand },
    Neg { size: OpSize, dst: Operand },
    MulDiv { op: MulOp, size: OpSize, src: Operand },
    Shift { op: ShiftOp, size: OpSize, dst: Operand, count: ShiftCount },
    Push(Operand),
    Pop(Operand),
    Lea { reg: u8, mem: MemRef },
    Lds { reg: u8, mem: MemRef },
    Les { reg: u8, mem: MemRef },
    Cbw,
    Cwd,
    Lahf,
    Sahf,
    Pushf,
    Popf,
    Jcc { cond: Cond, rel: i8 },
    Jmp { rel: i16, short: bool },
    JmpFar { seg: u16, off: u16 },
    JmpIndirect(Operand),
    JmpFarIndirect(MemRef),
    Call { rel: i16 },
    CallFar { seg: u16, off: u16 },
    CallIndirect(Operand),
    CallFarIndirect(MemRef),
    Ret { pop: u16 },
    Retf { pop: u16 },
    Loop { kind: LoopKind, rel: i8 },
    Str { op: StrOp, size: OpSize },
    Int(u8),
    Int3,
    Into,
    Iret,
    In { size: OpSize, port: Port },
    Out { size: OpSize, port: Port },
    Daa,
    Das,
    Aaa,
    Aas,
    Aam(u8),
    Aad(u8),
    Xlat,
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
    Cli,
    Sti,
    Hlt,
    Nop,
    Wait,
}

/// A fully decoded instruction. Produced per fetch and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub prefixes: Prefixes,
    /// First byte after the prefixes.
    pub opcode: u8,
    pub op: Op,
    pub len: u8,
    /// Base cost in clocks including effective-address and prefix cost. Taken branches, repeated
    /// string iterations and variable shifts add to this at execution time.
    pub cycles: u16,
}

impl Instruction {
    /// Target offset of a relative branch, given the offset of this instruction.
    pub fn branch_target(&self, ip: u16) -> Option<u16> {
        let next = ip.wrapping_add(u16::from(self.len));
        match self.op {
            Op::Jcc { rel, .. } | Op::Loop { rel, .. } => Some(next.wrapping_add(rel as i16 as u16)),
            Op::Jmp { rel, .. } | Op::Call { rel } => Some(next.wrapping_add(rel as u16)),
            _ => None,
        }
    }

    pub fn is_repeated_string(&self) -> bool {
        matches!(self.op, Op::Str { .. }) && self.prefixes.rep.is_some()
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.bytes.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let lo = self.u8()?;
        let hi = self.u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.u8()? as i8)
    }

    fn imm(&mut self, size: OpSize) -> Result<u16, DecodeError> {
        match size {
            OpSize::Byte => Ok(u16::from(self.u8()?)),
            OpSize::Word => self.u16(),
        }
    }

    fn modrm(&mut self) -> Result<ModRm, DecodeError> {
        let b = self.u8()?;
        let md = b >> 6;
        let reg = (b >> 3) & 7;
        let rm = b & 7;
        if md == 3 {
            return Ok(ModRm {
                reg,
                rm: Rm::Reg(rm),
            });
        }

        let base = match rm {
            0 => EaBase::BxSi,
            1 => EaBase::BxDi,
            2 => EaBase::BpSi,
            3 => EaBase::BpDi,
            4 => EaBase::Si,
            5 => EaBase::Di,
            6 if md == 0 => EaBase::Direct,
            6 => EaBase::Bp,
            _ => EaBase::Bx,
        };
        let (disp, has_disp) = match (md, base) {
            (0, EaBase::Direct) => (self.u16()?, true),
            (0, _) => (0, false),
            (1, _) => (self.i8()? as i16 as u16, true),
            _ => (self.u16()?, true),
        };
        Ok(ModRm {
            reg,
            rm: Rm::Mem(MemRef {
                base,
                disp,
                has_disp,
            }),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Rm {
    Reg(u8),
    Mem(MemRef),
}

#[derive(Debug, Clone, Copy)]
struct ModRm {
    reg: u8,
    rm: Rm,
}

impl ModRm {
    fn operand(&self, size: OpSize) -> Operand {
        match self.rm {
            Rm::Reg(r) => Operand::reg(size, r),
            Rm::Mem(m) => Operand::Mem(m),
        }
    }

    fn mem(&self) -> Option<MemRef> {
        match self.rm {
            Rm::Mem(m) => Some(m),
            Rm::Reg(_) => None,
        }
    }

    /// `reg_cost` for a register operand, `mem_cost` plus EA cost for a memory operand.
    fn cost(&self, reg_cost: u16, mem_cost: u16) -> u16 {
        match self.rm {
            Rm::Reg(_) => reg_cost,
            Rm::Mem(m) => mem_cost + m.ea_cycles(),
        }
    }
}

/// Decode one instruction from the start of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Instruction, DecodeError> {
    let mut c = Cursor { bytes, pos: 0 };
    let mut prefixes = Prefixes::default();
    let mut prefix_cycles = 0u16;

    let opcode = loop {
        let b = c.u8()?;
        match b {
            0x26 | 0x2E | 0x36 | 0x3E => prefixes.segment = Some(SegReg::from_index(b >> 3)),
            0xF0 => prefixes.lock = true,
            0xF2 => prefixes.rep = Some(Rep::Repne),
            0xF3 => prefixes.rep = Some(Rep::Rep),
            _ => break b,
        }
        prefix_cycles += 2;
    };

    let invalid = DecodeError::Invalid { opcode };

    let (op, cycles) = match opcode {
        0x00..=0x3F if opcode & 7 < 6 => {
            let aop = AluOp::from_index(opcode >> 3);
            let size = OpSize::from_w(opcode);
            match opcode & 7 {
                0 | 1 => {
                    let m = c.modrm()?;
                    let mem_cost = if aop == AluOp::Cmp { 9 } else { 16 };
                    let op = Op::Alu {
                        op: aop,
                        size,
                        dst: m.operand(size),
                        src: Operand::reg(size, m.reg),
                    };
                    (op, m.cost(3, mem_cost))
                }
                2 | 3 => {
                    let m = c.modrm()?;
                    let op = Op::Alu {
                        op: aop,
                        size,
                        dst: Operand::reg(size, m.reg),
                        src: m.operand(size),
                    };
                    (op, m.cost(3, 9))
                }
                _ => {
                    let size = if opcode & 7 == 4 {
                        OpSize::Byte
                    } else {
                        OpSize::Word
                    };
                    let imm = c.imm(size)?;
                    let op = Op::Alu {
                        op: aop,
                        size,
                        dst: Operand::reg(size, 0),
                        src: Operand::Imm(imm),
                    };
                    (op, 4)
                }
            }
        }
        0x06 | 0x0E | 0x16 | 0x1E => (Op::Push(Operand::Seg(SegReg::from_index(opcode >> 3))), 10),
        0x07 | 0x17 | 0x1F => (Op::Pop(Operand::Seg(SegReg::from_index(opcode >> 3))), 8),
        0x27 => (Op::Daa, 4),
        0x2F => (Op::Das, 4),
        0x37 => (Op::Aaa, 8),
        0x3F => (Op::Aas, 8),
        0x40..=0x47 => (
            Op::Inc {
                size: OpSize::Word,
                dst: Operand::Reg16(opcode & 7),
            },
            2,
        ),
        0x48..=0x4F => (
            Op::Dec {
                size: OpSize::Word,
                dst: Operand::Reg16(opcode & 7),
            },
            2,
        ),
        0x50..=0x57 => (Op::Push(Operand::Reg16(opcode & 7)), 11),
        0x58..=0x5F => (Op::Pop(Operand::Reg16(opcode & 7)), 8),
        0x70..=0x7F => (
            Op::Jcc {
                cond: Cond::from_index(opcode),
                rel: c.i8()?,
            },
            4,
        ),
        0x80..=0x83 => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            let aop = AluOp::from_index(m.reg);
            let imm = match opcode {
                0x81 => c.u16()?,
                0x83 => c.i8()? as i16 as u16,
                _ => u16::from(c.u8()?),
            };
            let mem_cost = if aop == AluOp::Cmp { 10 } else { 17 };
            let op = Op::Alu {
                op: aop,
                size,
                dst: m.operand(size),
                src: Operand::Imm(imm),
            };
            (op, m.cost(4, mem_cost))
        }
        0x84 | 0x85 => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            let op = Op::Test {
                size,
                dst: m.operand(size),
                src: Operand::reg(size, m.reg),
            };
            (op, m.cost(3, 9))
        }
        0x86 | 0x87 => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            let op = Op::Xchg {
                size,
                a: Operand::reg(size, m.reg),
                b: m.operand(size),
            };
            (op, m.cost(4, 17))
        }
        0x88 | 0x89 => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            let op = Op::Mov {
                size,
                dst: m.operand(size),
                src: Operand::reg(size, m.reg),
            };
            (op, m.cost(2, 9))
        }
        0x8A | 0x8B => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            let op = Op::Mov {
                size,
                dst: Operand::reg(size, m.reg),
                src: m.operand(size),
            };
            (op, m.cost(2, 8))
        }
        0x8C => {
            let m = c.modrm()?;
            let op = Op::Mov {
                size: OpSize::Word,
                dst: m.operand(OpSize::Word),
                src: Operand::Seg(SegReg::from_index(m.reg)),
            };
            (op, m.cost(2, 9))
        }
        0x8D => {
            let m = c.modrm()?;
            let mem = m.mem().ok_or(invalid)?;
            (Op::Lea { reg: m.reg, mem }, 2 + mem.ea_cycles())
        }
        0x8E => {
            let m = c.modrm()?;
            let op = Op::Mov {
                size: OpSize::Word,
                dst: Operand::Seg(SegReg::from_index(m.reg)),
                src: m.operand(OpSize::Word),
            };
            (op, m.cost(2, 8))
        }
        0x8F => {
            let m = c.modrm()?;
            if m.reg != 0 {
                return Err(invalid);
            }
            (Op::Pop(m.operand(OpSize::Word)), m.cost(8, 17))
        }
        0x90 => (Op::Nop, 3),
        0x91..=0x97 => (
            Op::Xchg {
                size: OpSize::Word,
                a: Operand::Reg16(0),
                b: Operand::Reg16(opcode & 7),
            },
            3,
        ),
        0x98 => (Op::Cbw, 2),
        0x99 => (Op::Cwd, 5),
        0x9A => {
            let off = c.u16()?;
            let seg = c.u16()?;
            (Op::CallFar { seg, off }, 28)
        }
        0x9B => (Op::Wait, 3),
        0x9C => (Op::Pushf, 10),
        0x9D => (Op::Popf, 8),
        0x9E => (Op::Sahf, 4),
        0x9F => (Op::Lahf, 4),
        0xA0..=0xA3 => {
            let size = OpSize::from_w(opcode);
            let mem = Operand::Mem(MemRef::direct(c.u16()?));
            let acc = Operand::reg(size, 0);
            let (dst, src) = if opcode < 0xA2 { (acc, mem) } else { (mem, acc) };
            (Op::Mov { size, dst, src }, 10)
        }
        0xA4..=0xA7 | 0xAA..=0xAF => {
            let size = OpSize::from_w(opcode);
            let sop = match opcode & 0xFE {
                0xA4 => StrOp::Movs,
                0xA6 => StrOp::Cmps,
                0xAA => StrOp::Stos,
                0xAC => StrOp::Lods,
                _ => StrOp::Scas,
            };
            let cost = if prefixes.rep.is_some() {
                9
            } else {
                match sop {
                    StrOp::Movs => 18,
                    StrOp::Cmps => 22,
                    StrOp::Stos => 11,
                    StrOp::Lods => 12,
                    StrOp::Scas => 15,
                }
            };
            (Op::Str { op: sop, size }, cost)
        }
        0xA8 | 0xA9 => {
            let size = OpSize::from_w(opcode);
            let op = Op::Test {
                size,
                dst: Operand::reg(size, 0),
                src: Operand::Imm(c.imm(size)?),
            };
            (op, 4)
        }
        0xB0..=0xBF => {
            let size = if opcode < 0xB8 {
                OpSize::Byte
            } else {
                OpSize::Word
            };
            let op = Op::Mov {
                size,
                dst: Operand::reg(size, opcode & 7),
                src: Operand::Imm(c.imm(size)?),
            };
            (op, 4)
        }
        0xC2 => (Op::Ret { pop: c.u16()? }, 12),
        0xC3 => (Op::Ret { pop: 0 }, 8),
        0xC4 | 0xC5 => {
            let m = c.modrm()?;
            let mem = m.mem().ok_or(invalid)?;
            let op = if opcode == 0xC4 {
                Op::Les { reg: m.reg, mem }
            } else {
                Op::Lds { reg: m.reg, mem }
            };
            (op, 16 + mem.ea_cycles())
        }
        0xC6 | 0xC7 => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            if m.reg != 0 {
                return Err(invalid);
            }
            let op = Op::Mov {
                size,
                dst: m.operand(size),
                src: Operand::Imm(c.imm(size)?),
            };
            (op, m.cost(4, 10))
        }
        0xCA => (Op::Retf { pop: c.u16()? }, 17),
        0xCB => (Op::Retf { pop: 0 }, 18),
        0xCC => (Op::Int3, 52),
        0xCD => (Op::Int(c.u8()?), 51),
        0xCE => (Op::Into, 4),
        0xCF => (Op::Iret, 24),
        0xD0..=0xD3 => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            let sop = ShiftOp::from_index(m.reg).ok_or(invalid)?;
            let count = if opcode < 0xD2 {
                ShiftCount::One
            } else {
                ShiftCount::Cl
            };
            let cost = match count {
                ShiftCount::One => m.cost(2, 15),
                ShiftCount::Cl => m.cost(8, 20),
            };
            let op = Op::Shift {
                op: sop,
                size,
                dst: m.operand(size),
                count,
            };
            (op, cost)
        }
        0xD4 => (Op::Aam(c.u8()?), 83),
        0xD5 => (Op::Aad(c.u8()?), 60),
        0xD7 => (Op::Xlat, 11),
        0xE0..=0xE3 => {
            let kind = match opcode {
                0xE0 => LoopKind::Loopnz,
                0xE1 => LoopKind::Loopz,
                0xE2 => LoopKind::Loop,
                _ => LoopKind::Jcxz,
            };
            let cost = match kind {
                LoopKind::Loopz | LoopKind::Jcxz => 6,
                _ => 5,
            };
            (Op::Loop { kind, rel: c.i8()? }, cost)
        }
        0xE4..=0xE7 => {
            let size = OpSize::from_w(opcode);
            let port = Port::Imm(c.u8()?);
            let op = if opcode < 0xE6 {
                Op::In { size, port }
            } else {
                Op::Out { size, port }
            };
            (op, 10)
        }
        0xE8 => (Op::Call { rel: c.u16()? as i16 }, 19),
        0xE9 => (
            Op::Jmp {
                rel: c.u16()? as i16,
                short: false,
            },
            15,
        ),
        0xEA => {
            let off = c.u16()?;
            let seg = c.u16()?;
            (Op::JmpFar { seg, off }, 15)
        }
        0xEB => (
            Op::Jmp {
                rel: i16::from(c.i8()?),
                short: true,
            },
            15,
        ),
        0xEC..=0xEF => {
            let size = OpSize::from_w(opcode);
            let op = if opcode < 0xEE {
                Op::In {
                    size,
                    port: Port::Dx,
                }
            } else {
                Op::Out {
                    size,
                    port: Port::Dx,
                }
            };
            (op, 8)
        }
        0xF4 => (Op::Hlt, 2),
        0xF5 => (Op::Cmc, 2),
        0xF6 | 0xF7 => {
            let size = OpSize::from_w(opcode);
            let m = c.modrm()?;
            let dst = m.operand(size);
            let word = size == OpSize::Word;
            match m.reg {
                0 | 1 => {
                    let imm = c.imm(size)?;
                    let op = Op::Test {
                        size,
                        dst,
                        src: Operand::Imm(imm),
                    };
                    (op, m.cost(5, 11))
                }
                2 => (Op::Not { size, dst }, m.cost(3, 16)),
                3 => (Op::Neg { size, dst }, m.cost(3, 16)),
                r => {
                    let (mop, reg_cost) = match (r, word) {
                        (4, false) => (MulOp::Mul, 70),
                        (4, true) => (MulOp::Mul, 118),
                        (5, false) => (MulOp::Imul, 80),
                        (5, true) => (MulOp::Imul, 128),
                        (6, false) => (MulOp::Div, 80),
                        (6, true) => (MulOp::Div, 144),
                        (_, false) => (MulOp::Idiv, 101),
                        (_, true) => (MulOp::Idiv, 165),
                    };
                    let op = Op::MulDiv {
                        op: mop,
                        size,
                        src: dst,
                    };
                    (op, m.cost(reg_cost, reg_cost + 6))
                }
            }
        }
        0xF8 => (Op::Clc, 2),
        0xF9 => (Op::Stc, 2),
        0xFA => (Op::Cli, 2),
        0xFB => (Op::Sti, 2),
        0xFC => (Op::Cld, 2),
        0xFD => (Op::Std, 2),
        0xFE => {
            let m = c.modrm()?;
            let dst = m.operand(OpSize::Byte);
            let size = OpSize::Byte;
            match m.reg {
                0 => (Op::Inc { size, dst }, m.cost(3, 15)),
                1 => (Op::Dec { size, dst }, m.cost(3, 15)),
                _ => return Err(invalid),
            }
        }
        0xFF => {
            let m = c.modrm()?;
            let dst = m.operand(OpSize::Word);
            let size = OpSize::Word;
            match m.reg {
                0 => (Op::Inc { size, dst }, m.cost(3, 15)),
                1 => (Op::Dec { size, dst }, m.cost(3, 15)),
                2 => (Op::CallIndirect(dst), m.cost(16, 21)),
                3 => {
                    let mem = m.mem().ok_or(invalid)?;
                    (Op::CallFarIndirect(mem), 37 + mem.ea_cycles())
                }
                4 => (Op::JmpIndirect(dst), m.cost(11, 18)),
                5 => {
                    let mem = m.mem().ok_or(invalid)?;
                    (Op::JmpFarIndirect(mem), 24 + mem.ea_cycles())
                }
                6 => (Op::Push(dst), m.cost(11, 16)),
                _ => return Err(invalid),
            }
        }
        _ => return Err(invalid),
    };

    Ok(Instruction {
        prefixes,
        opcode,
        op,
        len: c.pos as u8,
        cycles: cycles + prefix_cycles,
    })
}

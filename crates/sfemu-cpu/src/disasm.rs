use std::fmt;

use crate::decode::{
    EaBase, Instruction, LoopKind, MemRef, MulOp, Op, OpSize, Operand, Port, Rep, ShiftCount,
    StrOp,
};
use crate::registers::{SegReg, REG16_NAMES, REG8_NAMES};

struct Fmt<'a> {
    op: &'a Operand,
    size: OpSize,
    seg: Option<SegReg>,
    /// Memory operands need an explicit size when nothing else pins it down.
    sized: bool,
}

impl fmt::Display for Fmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operand::Reg8(r) => f.write_str(REG8_NAMES[usize::from(*r & 7)]),
            Operand::Reg16(r) => f.write_str(REG16_NAMES[usize::from(*r & 7)]),
            Operand::Seg(s) => f.write_str(s.name()),
            Operand::Imm(v) => write!(f, "0x{v:x}"),
            Operand::Mem(m) => {
                if self.sized {
                    f.write_str(match self.size {
                        OpSize::Byte => "byte ",
                        OpSize::Word => "word ",
                    })?;
                }
                write_mem(f, m, self.seg)
            }
        }
    }
}

fn operand(op: &Operand, size: OpSize, sized: bool, seg: Option<SegReg>) -> Fmt<'_> {
    Fmt {
        op,
        size,
        seg,
        sized,
    }
}

fn write_mem(f: &mut fmt::Formatter<'_>, m: &MemRef, seg: Option<SegReg>) -> fmt::Result {
    f.write_str("[")?;
    if let Some(seg) = seg {
        write!(f, "{}:", seg.name())?;
    }
    let base = match m.base {
        EaBase::BxSi => "bx+si",
        EaBase::BxDi => "bx+di",
        EaBase::BpSi => "bp+si",
        EaBase::BpDi => "bp+di",
        EaBase::Si => "si",
        EaBase::Di => "di",
        EaBase::Bp => "bp",
        EaBase::Bx => "bx",
        EaBase::Direct => return write!(f, "0x{:x}]", m.disp),
    };
    f.write_str(base)?;
    if m.has_disp {
        let disp = m.disp as i16;
        if disp < 0 {
            write!(f, "-0x{:x}", disp.unsigned_abs())?;
        } else {
            write!(f, "+0x{disp:x}")?;
        }
    }
    f.write_str("]")
}

fn rel(f: &mut fmt::Formatter<'_>, mnemonic: &str, rel: i16) -> fmt::Result {
    if rel < 0 {
        write!(f, "{mnemonic} $-0x{:x}", rel.unsigned_abs())
    } else {
        write!(f, "{mnemonic} $+0x{rel:x}")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seg = self.prefixes.segment;

        if self.prefixes.lock {
            f.write_str("lock ")?;
        }
        if let (Some(rep), Op::Str { op, .. }) = (self.prefixes.rep, &self.op) {
            f.write_str(match (rep, op.compares()) {
                (Rep::Rep, true) => "repe ",
                (Rep::Rep, false) => "rep ",
                (Rep::Repne, _) => "repne ",
            })?;
        }

        // Immediate or missing register operand means the memory operand must carry its size.
        let needs_size = |a: &Operand, b: &Operand| {
            !matches!(a, Operand::Reg8(_) | Operand::Reg16(_) | Operand::Seg(_))
                && !matches!(b, Operand::Reg8(_) | Operand::Reg16(_) | Operand::Seg(_))
        };

        match &self.op {
            Op::Alu { op, size, dst, src } => {
                let s = needs_size(dst, src);
                write!(f, "{} {}, {}", op.mnemonic(), operand(dst, *size, s, seg), operand(src, *size, s, seg))
            }
            Op::Test { size, dst, src } => {
                let s = needs_size(dst, src);
                write!(f, "test {}, {}", operand(dst, *size, s, seg), operand(src, *size, s, seg))
            }
            Op::Mov { size, dst, src } => {
                let s = needs_size(dst, src);
                write!(f, "mov {}, {}", operand(dst, *size, s, seg), operand(src, *size, s, seg))
            }
            Op::Xchg { size, a, b } => write!(f, "xchg {}, {}", operand(a, *size, false, seg), operand(b, *size, false, seg)),
            Op::Inc { size, dst } => write!(f, "inc {}", operand(dst, *size, true, seg)),
            Op::Dec { size, dst } => write!(f, "dec {}", operand(dst, *size, true, seg)),
            Op::Not { size, dst } => write!(f, "not {}", operand(dst, *size, true, seg)),
            Op::Neg { size, dst } => write!(f, "neg {}", operand(dst, *size, true, seg)),
            Op::MulDiv { op, size, src } => {
                let m = match op {
                    MulOp::Mul => "mul",
                    MulOp::Imul => "imul",
                    MulOp::Div => "div",
                    MulOp::Idiv => "idiv",
                };
                write!(f, "{m} {}", operand(src, *size, true, seg))
            }
            Op::Shift {
                op,
                size,
                dst,
                count,
            } => {
                let count = match count {
                    ShiftCount::One => "1",
                    ShiftCount::Cl => "cl",
                };
                write!(f, "{} {}, {count}", op.mnemonic(), operand(dst, *size, true, seg))
            }
            Op::Push(op) => write!(f, "push {}", operand(op, OpSize::Word, true, seg)),
            Op::Pop(op) => write!(f, "pop {}", operand(op, OpSize::Word, true, seg)),
            Op::Lea { reg, mem } => {
                write!(f, "lea {}, ", REG16_NAMES[usize::from(*reg & 7)])?;
                write_mem(f, mem, seg)
            }
            Op::Lds { reg, mem } => {
                write!(f, "lds {}, ", REG16_NAMES[usize::from(*reg & 7)])?;
                write_mem(f, mem, seg)
            }
            Op::Les { reg, mem } => {
                write!(f, "les {}, ", REG16_NAMES[usize::from(*reg & 7)])?;
                write_mem(f, mem, seg)
            }
            Op::Cbw => f.write_str("cbw"),
            Op::Cwd => f.write_str("cwd"),
            Op::Lahf => f.write_str("lahf"),
            Op::Sahf => f.write_str("sahf"),
            Op::Pushf => f.write_str("pushf"),
            Op::Popf => f.write_str("popf"),
            Op::Jcc { cond, rel: r } => {
                let m = format!("j{}", cond.suffix());
                rel(f, &m, i16::from(*r) + i16::from(self.len))
            }
            Op::Jmp { rel: r, short } => {
                let m = if *short { "jmp short" } else { "jmp" };
                rel(f, m, r.wrapping_add(i16::from(self.len)))
            }
            Op::Call { rel: r } => rel(f, "call", r.wrapping_add(i16::from(self.len))),
            Op::JmpFar { seg, off } => write!(f, "jmp 0x{seg:04x}:0x{off:04x}"),
            Op::CallFar { seg, off } => write!(f, "call 0x{seg:04x}:0x{off:04x}"),
            Op::JmpIndirect(op) => write!(f, "jmp {}", operand(op, OpSize::Word, true, seg)),
            Op::CallIndirect(op) => write!(f, "call {}", operand(op, OpSize::Word, true, seg)),
            Op::JmpFarIndirect(mem) => {
                f.write_str("jmp far ")?;
                write_mem(f, mem, seg)
            }
            Op::CallFarIndirect(mem) => {
                f.write_str("call far ")?;
                write_mem(f, mem, seg)
            }
            Op::Ret { pop: 0 } => f.write_str("ret"),
            Op::Ret { pop } => write!(f, "ret 0x{pop:x}"),
            Op::Retf { pop: 0 } => f.write_str("retf"),
            Op::Retf { pop } => write!(f, "retf 0x{pop:x}"),
            Op::Loop { kind, rel: r } => {
                let m = match kind {
                    LoopKind::Loopnz => "loopnz",
                    LoopKind::Loopz => "loopz",
                    LoopKind::Loop => "loop",
                    LoopKind::Jcxz => "jcxz",
                };
                rel(f, m, i16::from(*r) + i16::from(self.len))
            }
            Op::Str { op, size } => {
                let base = match op {
                    StrOp::Movs => "movs",
                    StrOp::Cmps => "cmps",
                    StrOp::Stos => "stos",
                    StrOp::Lods => "lods",
                    StrOp::Scas => "scas",
                };
                let suffix = match size {
                    OpSize::Byte => "b",
                    OpSize::Word => "w",
                };
                write!(f, "{base}{suffix}")
            }
            Op::Int(n) => write!(f, "int 0x{n:x}"),
            Op::Int3 => f.write_str("int3"),
            Op::Into => f.write_str("into"),
            Op::Iret => f.write_str("iret"),
            Op::In { size, port } => {
                let acc = if *size == OpSize::Byte { "al" } else { "ax" };
                match port {
                    Port::Imm(p) => write!(f, "in {acc}, 0x{p:x}"),
                    Port::Dx => write!(f, "in {acc}, dx"),
                }
            }
            Op::Out { size, port } => {
                let acc = if *size == OpSize::Byte { "al" } else { "ax" };
                match port {
                    Port::Imm(p) => write!(f, "out 0x{p:x}, {acc}"),
                    Port::Dx => write!(f, "out dx, {acc}"),
                }
            }
            Op::Daa => f.write_str("daa"),
            Op::Das => f.write_str("das"),
            Op::Aaa => f.write_str("aaa"),
            Op::Aas => f.write_str("aas"),
            Op::Aam(10) => f.write_str("aam"),
            Op::Aam(n) => write!(f, "aam 0x{n:x}"),
            Op::Aad(10) => f.write_str("aad"),
            Op::Aad(n) => write!(f, "aad 0x{n:x}"),
            Op::Xlat => f.write_str("xlatb"),
            Op::Clc => f.write_str("clc"),
            Op::Stc => f.write_str("stc"),
            Op::Cmc => f.write_str("cmc"),
            Op::Cld => f.write_str("cld"),
            Op::Std => f.write_str("std"),
            Op::Cli => f.write_str("cli"),
            Op::Sti => f.write_str("sti"),
            Op::Hlt => f.write_str("hlt"),
            Op::Nop => f.write_str("nop"),
            Op::Wait => f.write_str("wait"),
        }
    }
}

//! Intel 8086 real-mode interpreter.
//!
//! The core is a pure state machine over [`Registers`] and a [`CpuBus`]: [`Cpu::step`] fetches,
//! decodes and executes one instruction and reports a [`StepOutcome`]. Decoding is a separate pure
//! function ([`decode`]) producing an [`Instruction`] whose `Display` impl is the disassembly.

#![forbid(unsafe_code)]

mod alu;
mod bus;
mod decode;
mod disasm;
mod exec;
mod registers;

pub use alu::{AluOp, ShiftOp};
pub use bus::{BusFault, CpuBus, Fetch};
pub use decode::{
    decode, Cond, DecodeError, EaBase, Instruction, LoopKind, MemRef, MulOp, Op, OpSize, Operand,
    Port, Prefixes, Rep, ShiftCount, StrOp, MAX_INSTRUCTION_LEN,
};
pub use exec::{Cpu, CpuConfig, CpuFault, StepOutcome};
pub use registers::{linear, Flags, Registers, SegReg};

//! Minimal introspection: breakpoints and run control, a bounded event trace, a side-effect-free
//! disassembler and a Forth dictionary reader for the target program.

#![forbid(unsafe_code)]

mod debugger;
mod disasm;
pub mod forth;
mod trace;

pub use debugger::{Debugger, ExecDecision, PauseReason, RunState};
pub use disasm::{disassemble, DisasmLine};
pub use forth::{decode_word_name, find_word, walk_dictionary, ForthWord, WordName};
pub use trace::{TraceBuffer, TraceEvent, TraceFilter};

//! Binary bytecode format: opcode ids, segment layout, and the loader.

mod loader;
mod opcode;

pub use loader::{FunctionEntry, HeaderInfo, Instr, LoopGuard, Program, Reentry, Segment};
pub use opcode::Opcode;

//! Bytecode engine for the GS2 event-scripting language.
//!
//! The crate loads precompiled script bytecode ([`bytecode::Program`]) and
//! executes it on a stack machine ([`machine::Machine`]) against shared
//! variable scopes and host-registered commands. Hosts embed the engine by
//! building a [`script::ScriptEnv`], registering commands and named objects
//! on it, and constructing [`script::Script`] instances from bytecode.

pub mod buffer;
pub mod bytecode;
pub mod error;
pub mod format;
pub mod machine;
pub mod scope;
pub mod script;
pub mod util;
pub mod val;

pub use buffer::ByteString;
pub use bytecode::{Instr, Opcode, Program};
pub use error::ScriptError;
pub use machine::Machine;
pub use scope::Scope;
pub use script::{LoopPolicy, Script, ScriptEnv, ScriptKind};
pub use val::{Command, Val};

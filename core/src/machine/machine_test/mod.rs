//! Interpreter tests over hand-assembled programs.

mod arith;
mod control_flow;

use std::sync::{Arc, Once};

use crate::bytecode::Opcode;
use crate::script::{Script, ScriptEnv, ScriptKind};

/// Opt-in op tracing for debugging tests: RUST_LOG=trace cargo test.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Tiny bytecode assembler: emits the function, string and bytecode
/// segments of a program image.
pub(crate) struct Asm {
    strings: Vec<String>,
    functions: Vec<(String, i32)>,
    code: Vec<u8>,
    emitted: usize,
}

impl Asm {
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            functions: Vec::new(),
            code: Vec::new(),
            emitted: 0,
        }
    }

    /// Index of the next instruction, usable as a jump target or function
    /// offset.
    pub fn here(&self) -> usize {
        self.emitted
    }

    /// Declares a function starting at the next instruction.
    pub fn func(&mut self, name: &str) -> &mut Self {
        self.functions.push((name.to_string(), self.emitted as i32));
        self
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.code.push(op.id());
        self.emitted += 1;
        self
    }

    /// Instruction with a numeric operand, encoded as a textual double.
    pub fn num(&mut self, op: Opcode, value: f64) -> &mut Self {
        self.op(op);
        self.code.push(0xF6);
        self.code.extend_from_slice(value.to_string().as_bytes());
        self.code.push(0);
        self
    }

    /// Instruction with a string-table operand.
    pub fn name(&mut self, op: Opcode, name: &str) -> &mut Self {
        let index = match self.strings.iter().position(|s| s == name) {
            Some(i) => i,
            None => {
                self.strings.push(name.to_string());
                self.strings.len() - 1
            }
        };
        self.op(op);
        self.code.push(0xF0);
        self.code.push(index as u8);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        fn segment(tag: i32, body: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&(body.len() as i32).to_be_bytes());
            out.extend_from_slice(body);
            out
        }

        let mut functions = Vec::new();
        for (name, offset) in &self.functions {
            functions.extend_from_slice(&offset.to_be_bytes());
            functions.extend_from_slice(name.as_bytes());
            functions.push(0);
        }
        let mut strings = Vec::new();
        for s in &self.strings {
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
        }

        let mut image = Vec::new();
        image.extend_from_slice(&segment(2, &functions));
        image.extend_from_slice(&segment(3, &strings));
        image.extend_from_slice(&segment(4, &self.code));
        image
    }
}

pub(crate) fn load(env: &Arc<ScriptEnv>, asm: &Asm) -> Arc<Script> {
    init_tracing();
    Script::from_bytes(env, "test", &asm.build(), None, ScriptKind::default())
}

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use tracing::{debug, trace};

use super::Opcode;
use crate::buffer::ByteString;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

/// Segment tags of the compiled container format, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Gs1EventFlags = 1,
    FunctionNames = 2,
    Strings = 3,
    Bytecode = 4,
}

impl Segment {
    fn from_tag(tag: i32) -> Option<Segment> {
        match tag {
            1 => Some(Segment::Gs1EventFlags),
            2 => Some(Segment::FunctionNames),
            3 => Some(Segment::Strings),
            4 => Some(Segment::Bytecode),
            _ => None,
        }
    }
}

/// Metadata carried by the optional transfer-packet header in front of the
/// segment stream.
#[derive(Debug, Clone, Default)]
pub struct HeaderInfo {
    pub target: String,
    pub name: String,
    pub save_to_file: bool,
}

/// Outcome of one loop-guard check at a backward dispatch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reentry {
    /// First arrival from this predecessor; counting starts fresh.
    First,
    /// Repeat arrival within the limit.
    Counted(u32),
    /// Repeat arrival past the limit; execution must abort.
    Exceeded,
}

/// Per-instruction runaway-loop bookkeeping.
///
/// `seen` remembers which successor index last flowed through this
/// instruction; as long as the same edge keeps firing, `count` grows. The
/// guard is shared state on the instruction itself, so it must be reset
/// before every external dispatch.
#[derive(Debug)]
pub struct LoopGuard {
    seen: AtomicI64,
    count: AtomicU32,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopGuard {
    pub fn new() -> Self {
        Self {
            seen: AtomicI64::new(-1),
            count: AtomicU32::new(0),
        }
    }

    /// Records one pass with `next` as the upcoming instruction index. The
    /// `limit`-th repeat is still allowed; the one after it is not.
    pub fn note(&self, next: usize, limit: u32) -> Reentry {
        let next = next as i64;
        if self.seen.load(Ordering::Relaxed) == next {
            let count = self.count.load(Ordering::Relaxed);
            if count >= limit {
                return Reentry::Exceeded;
            }
            self.count.store(count + 1, Ordering::Relaxed);
            Reentry::Counted(count + 1)
        } else {
            self.seen.store(next, Ordering::Relaxed);
            self.count.store(0, Ordering::Relaxed);
            Reentry::First
        }
    }

    pub fn reset(&self) {
        self.seen.store(-1, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

/// One decoded instruction: the opcode plus whichever operand the prefix
/// bytes attached to it. Instructions without an operand keep `value` at 0
/// and `name` empty.
#[derive(Debug, Default)]
pub struct Instr {
    pub op: Opcode,
    pub value: f64,
    pub name: Option<ByteString>,
    pub guard: LoopGuard,
}

impl Instr {
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            value: 0.0,
            name: None,
            guard: LoopGuard::new(),
        }
    }

    pub fn with_value(op: Opcode, value: f64) -> Self {
        Self {
            value,
            ..Self::new(op)
        }
    }

    pub fn with_name(op: Opcode, name: impl Into<ByteString>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(op)
        }
    }
}

/// A function exported by a program: where it starts in the instruction
/// stream, and whether other programs may call it.
#[derive(Debug, Clone, Copy)]
pub struct FunctionEntry {
    pub offset: usize,
    pub public: bool,
}

/// A fully decoded program: the flat instruction list plus its function
/// table and string pool.
#[derive(Debug, Default)]
pub struct Program {
    pub instrs: Vec<Instr>,
    pub functions: FastHashMap<String, FunctionEntry>,
    pub fn_order: Vec<String>,
    pub strings: Vec<ByteString>,
    pub gs1_flags: i32,
    pub header: Option<HeaderInfo>,
}

impl Program {
    pub fn empty() -> Self {
        Self {
            instrs: Vec::new(),
            functions: fast_hash_map_new(),
            fn_order: Vec::new(),
            strings: Vec::new(),
            gs1_flags: 0,
            header: None,
        }
    }

    /// Decodes a compiled program.
    ///
    /// The decoder is total: malformed input yields a shorter (possibly
    /// empty) program, never an error. Reads past the end of a segment
    /// produce zero bytes, matching how compilers in the wild pad their
    /// output. An unrecognized segment tag ends decoding at that point so
    /// trailers appended by transfer protocols are ignored.
    pub fn parse(bytes: &[u8]) -> Program {
        let mut buf = ByteString::from(bytes);
        let mut program = Program::empty();

        program.header = read_header(&mut buf);

        while buf.bytes_left() > 0 {
            if buf.bytes_left() == 1 {
                // A single trailing newline is a valid terminator.
                if buf.read_u8() == b'\n' {
                    break;
                }
            }

            let tag = buf.read_i32();
            let Some(segment) = Segment::from_tag(tag) else {
                debug!(tag, "unknown segment, stopping");
                break;
            };

            let length = buf.read_i32().max(0) as usize;
            let mut section = buf.read_bytes(length);
            trace!(?segment, length, "segment");

            match segment {
                Segment::Gs1EventFlags => {
                    if section.len() > 3 {
                        program.gs1_flags = section.read_i32();
                    }
                }
                Segment::FunctionNames => {
                    while section.bytes_left() > 0 {
                        let offset = section.read_i32().max(0) as usize;
                        let mut name = section.read_cstr();
                        let public = name.starts_with("public.");
                        if public {
                            name.remove_start("public.".len());
                        }
                        let key = name.to_lowercase().to_string();
                        trace!(offset, %name, public, "function");
                        if !program.functions.contains_key(&key) {
                            program.fn_order.push(key.clone());
                        }
                        program.functions.insert(key, FunctionEntry { offset, public });
                    }
                }
                Segment::Strings => {
                    while section.bytes_left() > 0 {
                        program.strings.push(section.read_cstr());
                    }
                }
                Segment::Bytecode => {
                    decode_instrs(&mut section, &program.strings, &mut program.instrs);
                }
            }
        }

        debug!(
            instrs = program.instrs.len(),
            functions = program.functions.len(),
            strings = program.strings.len(),
            "program decoded"
        );
        program
    }

    pub fn function(&self, name: &str) -> Option<FunctionEntry> {
        self.functions.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Clears every loop guard. Must run before each external dispatch so
    /// counts never leak across events.
    pub fn reset_guards(&self) {
        for instr in &self.instrs {
            instr.guard.reset();
        }
    }
}

/// Consumes the transfer-packet header if one is present.
///
/// A leading 0xAC byte marks the header unambiguously. Without it, the
/// stream is peeked as a segment tag: a recognized tag means there is no
/// header, anything else is treated as a headered stream anyway. Either way
/// the read cursor lands on the first segment.
fn read_header(buf: &mut ByteString) -> Option<HeaderInfo> {
    if buf.bytes_left() < 1 {
        return None;
    }
    if buf.read_u8() != 0xAC {
        buf.set_read(0);
        if Segment::from_tag(buf.read_i32()).is_some() {
            buf.set_read(0);
            return None;
        }
        buf.set_read(0);
    }

    let length = buf.read_i16() as u16 as usize;
    let info = buf.read_bytes(length);
    let text = info.as_str_lossy();
    let mut fields = text.split(',');

    let target = fields.next().unwrap_or("").to_string();
    let name = fields.next().unwrap_or("").to_string();
    let save_to_file = fields.next().and_then(|s| s.parse::<i32>().ok()) == Some(1);

    debug!(%target, %name, save_to_file, "packet header");
    Some(HeaderInfo {
        target,
        name,
        save_to_file,
    })
}

/// Walks the bytecode segment byte by byte. Prefix bytes 0xF0-0xF6 carry an
/// operand for the most recently emitted instruction; any other byte starts
/// a new instruction.
fn decode_instrs(section: &mut ByteString, strings: &[ByteString], out: &mut Vec<Instr>) {
    while section.bytes_left() > 0 {
        let byte = section.read_u8();
        match byte {
            0xF0..=0xF2 => {
                let index = match byte {
                    0xF0 => section.read_u8() as usize,
                    0xF1 => section.read_i16() as u16 as usize,
                    _ => section.read_i32().max(0) as usize,
                };
                let name = strings.get(index).cloned().unwrap_or_default();
                if let Some(instr) = out.last_mut() {
                    instr.name = Some(name);
                }
            }
            0xF3..=0xF5 => {
                let value = match byte {
                    0xF3 => section.read_u8() as i8 as f64,
                    0xF4 => section.read_i16() as f64,
                    _ => section.read_i32() as f64,
                };
                if let Some(instr) = out.last_mut() {
                    instr.value = value;
                }
            }
            0xF6 => {
                let text = section.read_cstr();
                // Some compilers emit a doubled sign on negated literals.
                let text = text.as_str_lossy().replace("--", "");
                let value = text.parse().unwrap_or(0.0);
                if let Some(instr) = out.last_mut() {
                    instr.value = value;
                }
            }
            _ => out.push(Instr::new(Opcode::from_id(byte))),
        }
    }
}

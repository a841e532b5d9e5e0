//! Tagged runtime values.

use std::fmt;
use std::sync::Arc;

use crate::buffer::ByteString;
use crate::machine::Machine;
use crate::scope::Scope;
use crate::script::Script;

/// Host command callback: invoked with the running interpreter and the
/// ordered, already-resolved argument list. Errors are caught at the call
/// boundary and degraded to `Num(0)`; they never unwind the dispatch loop.
pub type Command = Arc<dyn Fn(&mut Machine, &[Val]) -> anyhow::Result<Val> + Send + Sync>;

/// A single stack or scope value.
///
/// Numeric payloads are always `f64` regardless of how wide the literal was
/// encoded; text payloads are always a [`ByteString`] once materialized.
/// `VarRef` is a still-unresolved name; resolving it through the scopes is a
/// separate, explicit step ([`Machine::resolve`]).
#[derive(Clone)]
pub enum Val {
    Num(f64),
    Str(ByteString),
    Bool(bool),
    List(Vec<Val>),
    VarRef(String),
    Object(Scope),
    Cmd(Command),
    Script(Arc<Script>),
    /// Callable produced by member access on a `Script` value for a function
    /// the target program declared public.
    BoundFn(Arc<Script>, String),
    /// Marker delimiting an argument or literal-array region on the stack.
    /// Every marker pushed is later matched by an array-end (or call) pop.
    ArrayStart,
}

impl Val {
    pub fn zero() -> Val {
        Val::Num(0.0)
    }

    /// Script truthiness: `true`, or a number equal to 1. Everything else is
    /// falsey, including other non-zero numbers.
    pub fn truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Num(n) => *n == 1.0,
            _ => false,
        }
    }

    /// Permissive numeric coercion: parse-or-zero for text, 0/1 for bools,
    /// zero for anything non-numeric.
    pub fn as_num(&self) -> f64 {
        match self {
            Val::Num(n) => *n,
            Val::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Val::Str(s) => s.as_str_lossy().trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Type id as reported by the object-type opcode:
    /// number 0, string 1, object 2, array 3.
    pub fn type_id(&self) -> f64 {
        match self {
            Val::Str(_) | Val::VarRef(_) => 1.0,
            Val::Object(_) | Val::Script(_) => 2.0,
            Val::List(_) => 3.0,
            _ => 0.0,
        }
    }

    pub fn is_array_start(&self) -> bool {
        matches!(self, Val::ArrayStart)
    }

    /// Structural equality as observed by the comparison opcodes: content for
    /// numbers, text and bools; element-wise for equal-length lists; identity
    /// for objects and programs.
    pub fn content_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Num(n), Val::Bool(b)) | (Val::Bool(b), Val::Num(n)) => {
                *n == if *b { 1.0 } else { 0.0 }
            }
            (Val::List(a), Val::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.content_eq(y))
            }
            (Val::VarRef(a), Val::VarRef(b)) => a.eq_ignore_ascii_case(b),
            (Val::Object(a), Val::Object(b)) => a.ptr_eq(b),
            (Val::Script(a), Val::Script(b)) => Arc::ptr_eq(a, b),
            (Val::ArrayStart, Val::ArrayStart) => true,
            _ => false,
        }
    }
}

// PartialEq mirrors content_eq so tests can assert on values directly.
impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        self.content_eq(other)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Integral numbers print without a decimal point.
            Val::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Val::Num(n) => write!(f, "{n}"),
            Val::Str(s) => write!(f, "{s}"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::VarRef(name) => write!(f, "{name}"),
            Val::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            Val::Object(_) => write!(f, "<object>"),
            Val::Cmd(_) => write!(f, "<command>"),
            Val::Script(s) => write!(f, "<script {}>", s.name()),
            Val::BoundFn(_, name) => write!(f, "<function {name}>"),
            Val::ArrayStart => write!(f, "<array-start>"),
        }
    }
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Num(n) => write!(f, "Num({n})"),
            Val::Str(s) => write!(f, "Str({s:?})"),
            Val::Bool(b) => write!(f, "Bool({b})"),
            Val::List(items) => f.debug_tuple("List").field(items).finish(),
            Val::VarRef(name) => write!(f, "VarRef({name:?})"),
            Val::Object(_) => write!(f, "Object(..)"),
            Val::Cmd(_) => write!(f, "Cmd(..)"),
            Val::Script(s) => write!(f, "Script({})", s.name()),
            Val::BoundFn(_, name) => write!(f, "BoundFn({name:?})"),
            Val::ArrayStart => write!(f, "ArrayStart"),
        }
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Num(n)
    }
}

impl From<i32> for Val {
    fn from(n: i32) -> Self {
        Val::Num(n as f64)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(ByteString::from(s))
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(ByteString::from(s))
    }
}

impl From<ByteString> for Val {
    fn from(s: ByteString) -> Self {
        Val::Str(s)
    }
}

impl From<Vec<Val>> for Val {
    fn from(items: Vec<Val>) -> Self {
        Val::List(items)
    }
}

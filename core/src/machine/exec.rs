//! The dispatch loop: one function frame per call, executed instruction by
//! instruction over the shared program.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::{Duration, sleep};
use tracing::{debug, trace};

use super::Machine;
use crate::bytecode::{Opcode, Reentry};
use crate::error::ScriptError;
use crate::format;
use crate::scope::Scope;
use crate::script::Script;
use crate::val::{Command, Val};

fn pop(stack: &mut Vec<Val>) -> Val {
    stack.pop().unwrap_or_else(Val::zero)
}

impl Machine {
    /// Runs `function` to completion and yields its return value.
    ///
    /// Script functions calling script functions re-enter here, so the
    /// future is boxed. A missing function name is not an error; it returns
    /// zero like every other unresolved thing.
    pub fn run<'a>(
        &'a mut self,
        script: &'a Arc<Script>,
        function: &'a str,
        args: Vec<Val>,
    ) -> BoxFuture<'a, Result<Val, ScriptError>> {
        Box::pin(self.run_inner(script, function, args))
    }

    async fn run_inner(
        &mut self,
        script: &Arc<Script>,
        function: &str,
        args: Vec<Val>,
    ) -> Result<Val, ScriptError> {
        let program = script.program();
        let Some(entry) = program.function(function) else {
            return Ok(Val::zero());
        };

        let (limit, exempt) = {
            let policy = self.env().loop_policy();
            (policy.limit, policy.is_exempt(function))
        };

        // The very first frame after a load starts at zero so top-level
        // initialization code runs; a trailing jump whose target equals the
        // program length hands control to the requested function.
        let mut desired_start = entry.offset;
        let mut index = if self.first_run { 0 } else { entry.offset };
        self.first_run = false;

        let mut stack: Vec<Val> = Vec::new();
        let mut with_stack: Vec<Scope> = Vec::new();
        let mut last_copied: Option<Val> = None;
        let mut args: VecDeque<Val> = args.into();

        trace!(%function, start = index, "frame start");

        while index < program.instrs.len() {
            let cur = index;
            index = cur + 1;
            let instr = &program.instrs[cur];
            trace!(op = ?instr.op, index = cur, "op");

            match instr.op {
                Opcode::SetIndex => {
                    let target = instr.value as usize;
                    if target == program.len() {
                        index = desired_start;
                        desired_start = target;
                    } else {
                        index = target;
                    }
                }
                Opcode::SetIndexTrue => {
                    if self.resolve(pop(&mut stack)).truthy() {
                        index = instr.value as usize;
                    }
                }
                Opcode::Or | Opcode::If | Opcode::And => {
                    if !self.resolve(pop(&mut stack)).truthy() {
                        index = instr.value as usize;
                    }
                }
                Opcode::Call => {
                    let callee = pop(&mut stack);
                    let mut call_args = Vec::new();
                    while let Some(top) = stack.pop() {
                        if top.is_array_start() {
                            break;
                        }
                        call_args.push(self.resolve(top));
                    }
                    call_args.reverse();
                    let with_top = with_stack.last().cloned();
                    let ret = self
                        .dispatch_call(script, callee, call_args, with_top)
                        .await?;
                    stack.push(ret);
                }
                Opcode::Ret => return Ok(pop(&mut stack)),
                Opcode::Sleep => {
                    let secs = self.resolve_num(pop(&mut stack)).max(0.0);
                    match Duration::try_from_secs_f64(secs) {
                        Ok(delay) => sleep(delay).await,
                        Err(_) => debug!(secs, "sleep duration out of range, skipping"),
                    }
                }
                Opcode::CmdCall => {
                    if let Reentry::Exceeded = instr.guard.note(index, limit) {
                        if !exempt {
                            return Err(ScriptError::LoopLimit {
                                index: cur,
                                function: function.to_string(),
                            });
                        }
                    }
                }

                Opcode::TypeNumber => stack.push(Val::Num(instr.value)),
                Opcode::TypeString => {
                    stack.push(Val::Str(instr.name.clone().unwrap_or_default()));
                }
                Opcode::TypeVar => {
                    let name = instr
                        .name
                        .as_ref()
                        .map(|n| n.as_str_lossy().into_owned())
                        .unwrap_or_default();
                    stack.push(Val::VarRef(name));
                }
                Opcode::TypeArray => stack.push(Val::ArrayStart),
                Opcode::TypeTrue => stack.push(Val::Bool(true)),
                Opcode::TypeFalse => stack.push(Val::Bool(false)),
                Opcode::TypeNull => stack.push(Val::zero()),
                Opcode::Pi => stack.push(Val::Num(std::f64::consts::PI)),

                Opcode::CopyLastOp => {
                    let top = stack.last().cloned().unwrap_or_else(Val::zero);
                    last_copied = Some(top.clone());
                    stack.push(top);
                }
                Opcode::SwapLastOps => {
                    let a = pop(&mut stack);
                    let b = pop(&mut stack);
                    stack.push(a);
                    stack.push(b);
                }

                Opcode::ConvToFloat => {
                    let n = self.resolve_num(pop(&mut stack));
                    stack.push(Val::Num(n));
                }
                Opcode::ConvToString => {
                    let text = self.resolve(pop(&mut stack)).to_string();
                    stack.push(Val::from(text));
                }
                Opcode::ConvToObject => {
                    let top = pop(&mut stack);
                    match top {
                        Val::Str(s) => {
                            let name = s.as_str_lossy().into_owned();
                            stack.push(self.to_object(&name, with_stack.last()));
                        }
                        Val::VarRef(name) => {
                            stack.push(self.to_object(&name, with_stack.last()));
                        }
                        other => stack.push(other),
                    }
                }

                Opcode::MemberAccess => {
                    let member = match pop(&mut stack) {
                        Val::VarRef(name) => name,
                        other => other.to_string(),
                    };
                    let target = self.resolve(pop(&mut stack));
                    stack.push(self.member(target, &member));
                }

                Opcode::ArrayEnd => {
                    let mut items = Vec::new();
                    while let Some(top) = stack.pop() {
                        if top.is_array_start() {
                            break;
                        }
                        items.push(self.resolve(top));
                    }
                    items.reverse();
                    stack.push(Val::List(items));
                }

                Opcode::NewObject => {
                    let class = self.resolve(pop(&mut stack)).to_string();
                    let param = self.resolve(pop(&mut stack));
                    match self.env().factory(&class) {
                        Some(factory) => stack.push(Val::Object(factory(&[param]))),
                        None => {
                            debug!(%class, "no factory for class");
                            stack.push(Val::zero());
                        }
                    }
                }

                Opcode::Assign => {
                    let value = self.resolve(pop(&mut stack));
                    let dest = if stack.is_empty() {
                        last_copied.take()
                    } else {
                        stack.pop()
                    };
                    if let Some(Val::VarRef(name)) = dest {
                        self.assign_var(&name, value, with_stack.last());
                    }
                }
                Opcode::FuncParamsEnd => {
                    while let Some(top) = stack.pop() {
                        if let Val::VarRef(name) = top {
                            let value = args.pop_front().unwrap_or_else(Val::zero);
                            self.temp().set(&name, value);
                        }
                    }
                }
                Opcode::Inc | Opcode::Dec => {
                    let step = if instr.op == Opcode::Inc { 1.0 } else { -1.0 };
                    let dest = pop(&mut stack);
                    let updated = self.resolve_num(dest.clone()) + step;
                    if let Val::VarRef(name) = &dest {
                        self.assign_var(name, Val::Num(updated), with_stack.last());
                    }
                    stack.push(Val::Num(updated));
                }

                Opcode::Add => self.bin_num(&mut stack, |b, a| b + a),
                Opcode::Sub => self.bin_num(&mut stack, |b, a| b - a),
                Opcode::Mul => self.bin_num(&mut stack, |b, a| b * a),
                Opcode::Div => self.bin_num(&mut stack, |b, a| b / a),
                Opcode::Mod => self.bin_num(&mut stack, |b, a| b % a),
                Opcode::Pow => self.bin_num(&mut stack, f64::powf),
                Opcode::Bwo => self.bin_num(&mut stack, |b, a| ((b as i64) | (a as i64)) as f64),
                Opcode::Bwa => self.bin_num(&mut stack, |b, a| ((b as i64) & (a as i64)) as f64),
                Opcode::Min => self.bin_num(&mut stack, f64::min),
                Opcode::Max => self.bin_num(&mut stack, f64::max),

                Opcode::Not => {
                    let truthy = self.resolve(pop(&mut stack)).truthy();
                    stack.push(Val::Bool(!truthy));
                }
                Opcode::UnarySub => {
                    let n = self.resolve_num(pop(&mut stack));
                    stack.push(Val::Num(-n));
                }

                Opcode::Eq | Opcode::Neq => {
                    let a = self.resolve(pop(&mut stack));
                    let b = self.resolve(pop(&mut stack));
                    let eq = b.content_eq(&a);
                    stack.push(Val::Bool(if instr.op == Opcode::Eq { eq } else { !eq }));
                }
                Opcode::Lt => self.bin_cmp(&mut stack, |b, a| b < a),
                Opcode::Gt => self.bin_cmp(&mut stack, |b, a| b > a),
                Opcode::Lte => self.bin_cmp(&mut stack, |b, a| b <= a),
                Opcode::Gte => self.bin_cmp(&mut stack, |b, a| b >= a),

                Opcode::Format => {
                    let fmt = self.resolve(pop(&mut stack)).to_string();
                    let fmt_args: Vec<Val> =
                        stack.drain(..).map(|v| self.resolve(v)).collect();
                    stack.push(Val::from(format::format(&fmt, &fmt_args)));
                }

                Opcode::Int => self.un_num(&mut stack, f64::trunc),
                Opcode::Abs => self.un_num(&mut stack, f64::abs),
                Opcode::Sin => self.un_num(&mut stack, f64::sin),
                Opcode::Cos => self.un_num(&mut stack, f64::cos),
                Opcode::Arctan => self.un_num(&mut stack, f64::atan),
                Opcode::Exp => self.un_num(&mut stack, f64::exp),
                Opcode::Log => self.un_num(&mut stack, f64::ln),
                Opcode::Random => {
                    let hi = self.resolve_num(pop(&mut stack));
                    let lo = self.resolve_num(pop(&mut stack));
                    let n = if hi > lo {
                        rand::thread_rng().gen_range(lo..hi)
                    } else {
                        lo
                    };
                    stack.push(Val::Num(n));
                }
                Opcode::Char => {
                    let code = self.resolve_num(pop(&mut stack));
                    let text = char::from_u32(code as u32)
                        .map(String::from)
                        .unwrap_or_default();
                    stack.push(Val::from(text));
                }
                Opcode::ObjType => {
                    let id = self.resolve(pop(&mut stack)).type_id();
                    stack.push(Val::Num(id));
                }

                Opcode::ObjTrim => {
                    let s = self.pop_text(&mut stack);
                    stack.push(Val::from(s.trim().to_string()));
                }
                Opcode::ObjLength => {
                    let s = self.pop_text(&mut stack);
                    stack.push(Val::Num(s.chars().count() as f64));
                }
                Opcode::ObjPos => {
                    let subject = self.pop_text(&mut stack);
                    let needle = self.pop_text(&mut stack);
                    let pos = subject
                        .find(&needle)
                        .map(|b| subject[..b].chars().count() as f64)
                        .unwrap_or(-1.0);
                    stack.push(Val::Num(pos));
                }
                Opcode::Join => {
                    let a = self.pop_text(&mut stack);
                    let b = self.pop_text(&mut stack);
                    stack.push(Val::from(format!("{b}{a}")));
                }
                Opcode::ObjCharAt => {
                    let subject = self.pop_text(&mut stack);
                    let at = self.resolve_num(pop(&mut stack));
                    let text = if at >= 0.0 {
                        subject
                            .chars()
                            .nth(at as usize)
                            .map(String::from)
                            .unwrap_or_default()
                    } else {
                        String::new()
                    };
                    stack.push(Val::from(text));
                }
                Opcode::ObjSubstr => {
                    let subject = self.pop_text(&mut stack);
                    let start = self.resolve_num(pop(&mut stack)).max(0.0) as usize;
                    let len = self.resolve_num(pop(&mut stack)).max(0.0) as usize;
                    let text: String = subject.chars().skip(start).take(len).collect();
                    stack.push(Val::from(text));
                }
                Opcode::ObjStarts => {
                    // Byte-wise comparison; slicing the text at a char
                    // boundary is not guaranteed here.
                    let subject = self.pop_text(&mut stack);
                    let prefix = self.pop_text(&mut stack);
                    let starts = subject.len() >= prefix.len()
                        && subject.as_bytes()[..prefix.len()]
                            .eq_ignore_ascii_case(prefix.as_bytes());
                    stack.push(Val::Bool(starts));
                }
                Opcode::ObjEnds => {
                    let subject = self.pop_text(&mut stack);
                    let suffix = self.pop_text(&mut stack);
                    let ends = subject.len() >= suffix.len()
                        && subject.as_bytes()[subject.len() - suffix.len()..]
                            .eq_ignore_ascii_case(suffix.as_bytes());
                    stack.push(Val::Bool(ends));
                }
                Opcode::ObjTokenize => {
                    let subject = self.pop_text(&mut stack);
                    let tokens = subject
                        .split_whitespace()
                        .map(|t| Val::from(t.to_string()))
                        .collect();
                    stack.push(Val::List(tokens));
                }

                Opcode::ObjSize => {
                    let size = match self.resolve(pop(&mut stack)) {
                        Val::List(items) => items.len() as f64,
                        Val::Object(scope) => scope.len() as f64,
                        _ => 0.0,
                    };
                    stack.push(Val::Num(size));
                }
                Opcode::Array => {
                    let at = self.resolve_num(pop(&mut stack));
                    let value = match self.resolve(pop(&mut stack)) {
                        Val::List(items) if at >= 0.0 => {
                            items.get(at as usize).cloned().unwrap_or_else(Val::zero)
                        }
                        Val::Object(scope) => scope.get_or_zero(&(at as i64).to_string()),
                        _ => Val::zero(),
                    };
                    stack.push(value);
                }
                Opcode::ArrayAssign => {
                    let value = self.resolve(pop(&mut stack));
                    let at = self.resolve_num(pop(&mut stack)) as i64;
                    match self.resolve(pop(&mut stack)) {
                        Val::Object(scope) => scope.set(&at.to_string(), value),
                        other => debug!(dest = %other, "indexed assign on non-object"),
                    }
                }

                Opcode::With => {
                    let scope = match self.resolve(pop(&mut stack)) {
                        Val::Object(scope) => scope,
                        _ => Scope::new(),
                    };
                    with_stack.push(scope);
                }
                Opcode::WithEnd => {
                    with_stack.pop();
                }

                Opcode::Foreach => {
                    let at = self.resolve_num(pop(&mut stack)).max(0.0) as usize;
                    let items = match self.resolve(pop(&mut stack)) {
                        Val::List(items) => items,
                        _ => Vec::new(),
                    };
                    if at < items.len() {
                        if let Some(Val::VarRef(name)) = stack.last() {
                            let name = name.clone();
                            self.temp().set(&name, items[at].clone());
                        }
                        stack.push(Val::List(items));
                        stack.push(Val::Num(at as f64 + 1.0));
                    } else {
                        stack.pop();
                        index = instr.value as usize;
                    }
                }

                Opcode::This | Opcode::ThisO => {
                    let scope = self
                        .ref_object()
                        .cloned()
                        .unwrap_or_else(|| self.env().globals.clone());
                    stack.push(Val::Object(scope));
                }
                Opcode::Player | Opcode::PlayerO => {
                    stack.push(self.named_object("player"));
                }
                Opcode::Level => {
                    stack.push(self.named_object("level"));
                }
                Opcode::Temp => {
                    self.mark_temp();
                }

                // Accepted for compatibility; no runtime effect.
                Opcode::None
                | Opcode::Jmp
                | Opcode::IndexDec
                | Opcode::InlineNew
                | Opcode::MakeVar
                | Opcode::SetArray
                | Opcode::ArrayNew
                | Opcode::InlineConditional
                | Opcode::ArrayMultiDim
                | Opcode::ArrayMultiDimAssign
                | Opcode::ArrayNewMultiDim
                | Opcode::ObjSubarray
                | Opcode::ObjAddString
                | Opcode::ObjDeleteString
                | Opcode::ObjRemoveString
                | Opcode::ObjReplaceString
                | Opcode::ObjInsertString
                | Opcode::ObjClear
                | Opcode::ObjIndices
                | Opcode::ObjLink
                | Opcode::Translate
                | Opcode::ObjPositions
                | Opcode::GetAngle
                | Opcode::GetDir
                | Opcode::VecX
                | Opcode::VecY
                | Opcode::InRange
                | Opcode::InObj
                | Opcode::ObjIndex
                | Opcode::Params => {}
            }
        }

        Ok(Val::zero())
    }

    async fn dispatch_call(
        &mut self,
        script: &Arc<Script>,
        callee: Val,
        args: Vec<Val>,
        with_top: Option<Scope>,
    ) -> Result<Val, ScriptError> {
        match callee {
            Val::Cmd(cmd) => Ok(self.invoke(&cmd, &args)),
            Val::BoundFn(target, name) => {
                if Arc::ptr_eq(&target, script) {
                    self.run(script, &name, args).await
                } else {
                    target.call_public(&name, args).await
                }
            }
            Val::VarRef(name) => self.call_named(script, &name, args, with_top).await,
            Val::Str(name) => {
                let name = name.as_str_lossy().into_owned();
                self.call_named(script, &name, args, with_top).await
            }
            _ => Ok(Val::zero()),
        }
    }

    async fn call_named(
        &mut self,
        script: &Arc<Script>,
        name: &str,
        args: Vec<Val>,
        with_top: Option<Scope>,
    ) -> Result<Val, ScriptError> {
        let key = name.to_ascii_lowercase();
        if let Some(scope) = &with_top {
            if let Some(Val::Cmd(cmd)) = scope.get(&key) {
                return Ok(self.invoke(&cmd, &args));
            }
        }
        if script.program().function(&key).is_some() {
            return self.run(script, &key, args).await;
        }
        if let Some(cmd) = script.lookup_command(&key) {
            return Ok(self.invoke(&cmd, &args));
        }
        debug!(function = %key, "unresolved call");
        Ok(Val::zero())
    }

    /// Host command failures are logged and degrade to zero; they never
    /// unwind a running frame.
    fn invoke(&mut self, cmd: &Command, args: &[Val]) -> Val {
        match cmd(self, args) {
            Ok(value) => value,
            Err(err) => {
                debug!(%err, "command failed");
                Val::zero()
            }
        }
    }

    fn member(&self, target: Val, member: &str) -> Val {
        match target {
            Val::Object(scope) => scope.get_or_zero(member),
            Val::Script(target) => {
                let public = target
                    .program()
                    .function(member)
                    .is_some_and(|f| f.public);
                if public {
                    Val::BoundFn(target, member.to_ascii_lowercase())
                } else {
                    Val::zero()
                }
            }
            _ => Val::zero(),
        }
    }

    fn to_object(&self, name: &str, with_top: Option<&Scope>) -> Val {
        if let Some(scope) = with_top {
            if scope.contains(name) {
                return scope.get_or_zero(name);
            }
        }
        self.resolve(Val::VarRef(name.to_string()))
    }

    fn named_object(&self, name: &str) -> Val {
        match self.env().object(name) {
            Some(scope) => Val::Object(scope),
            None => Val::zero(),
        }
    }

    fn pop_text(&self, stack: &mut Vec<Val>) -> String {
        self.resolve(pop(stack)).to_string()
    }

    fn bin_num(&self, stack: &mut Vec<Val>, f: impl Fn(f64, f64) -> f64) {
        let a = self.resolve_num(pop(stack));
        let b = self.resolve_num(pop(stack));
        stack.push(Val::Num(f(b, a)));
    }

    fn bin_cmp(&self, stack: &mut Vec<Val>, f: impl Fn(f64, f64) -> bool) {
        let a = self.resolve_num(pop(stack));
        let b = self.resolve_num(pop(stack));
        stack.push(Val::Bool(f(b, a)));
    }

    fn un_num(&self, stack: &mut Vec<Val>, f: impl Fn(f64) -> f64) {
        let n = self.resolve_num(pop(stack));
        stack.push(Val::Num(f(n)));
    }
}

//! The stack interpreter.
//!
//! A [`Machine`] is the per-program execution state: the temp variable scope
//! and the dispatch flags. The value stack, the `with` stack and the
//! instruction cursor live on the call frame inside [`Machine::run`], so
//! recursive script-to-script calls on the same machine are naturally
//! re-entrant.

mod exec;

#[cfg(test)]
mod machine_test;

use std::sync::Arc;

use crate::scope::Scope;
use crate::script::ScriptEnv;
use crate::val::Val;

pub struct Machine {
    env: Arc<ScriptEnv>,
    ref_object: Option<Scope>,
    temp: Scope,
    first_run: bool,
    use_temp: bool,
}

impl Machine {
    pub fn new(env: Arc<ScriptEnv>, ref_object: Option<Scope>) -> Self {
        Self {
            env,
            ref_object,
            temp: Scope::new(),
            first_run: true,
            use_temp: false,
        }
    }

    pub fn env(&self) -> &Arc<ScriptEnv> {
        &self.env
    }

    /// The per-dispatch variable scope.
    pub fn temp(&self) -> &Scope {
        &self.temp
    }

    pub fn ref_object(&self) -> Option<&Scope> {
        self.ref_object.as_ref()
    }

    /// Resolves a variable reference through the scopes: temp first, then the
    /// owning object, then globals, then the named-object table. Anything
    /// that is not a reference, and any reference that matches nothing,
    /// passes through unchanged.
    pub fn resolve(&self, value: Val) -> Val {
        let Val::VarRef(name) = value else {
            return value;
        };
        if let Some(v) = self.temp.get(&name) {
            return v;
        }
        if let Some(obj) = &self.ref_object {
            if let Some(v) = obj.get(&name) {
                return v;
            }
        }
        if let Some(v) = self.env.globals.get(&name) {
            return v;
        }
        if let Some(obj) = self.env.object(&name) {
            return Val::Object(obj);
        }
        Val::VarRef(name)
    }

    pub fn resolve_num(&self, value: Val) -> f64 {
        self.resolve(value).as_num()
    }

    /// Writes a variable. A name that already resolves somewhere is written
    /// in place through that slot, wherever it lives, so set hooks fire. Only
    /// an unresolved name is routed: the top of the `with` stack first, the
    /// temp scope when a temp prefix is pending, globals otherwise.
    pub(crate) fn assign_var(&mut self, name: &str, value: Val, with_top: Option<&Scope>) {
        // The temp prefix never outlives one assignment.
        let use_temp = std::mem::take(&mut self.use_temp);

        if self.temp.contains(name) {
            self.temp.set(name, value);
            return;
        }
        if let Some(obj) = &self.ref_object {
            if obj.contains(name) {
                obj.set(name, value);
                return;
            }
        }
        if self.env.globals.contains(name) {
            self.env.globals.set(name, value);
            return;
        }
        if let Some(scope) = with_top {
            scope.set(name, value);
            return;
        }
        if use_temp {
            self.temp.set(name, value);
            return;
        }
        self.env.globals.set(name, value);
    }

    /// Arms the temp prefix: the next assignment to a brand-new name lands
    /// in the temp scope instead of globals.
    pub(crate) fn mark_temp(&mut self) {
        self.use_temp = true;
    }

    /// Starts a fresh external dispatch: temp variables and the pending temp
    /// prefix never survive across events.
    pub(crate) fn begin_dispatch(&mut self) {
        self.temp.clear();
        self.use_temp = false;
    }

    /// Full reset after the program bytes were replaced.
    pub(crate) fn reset(&mut self) {
        self.first_run = true;
        self.temp.clear();
        self.use_temp = false;
    }
}

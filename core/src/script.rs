//! Script lifecycle and the host environment.
//!
//! A [`ScriptEnv`] is shared by every script of a host: global variables,
//! named objects, registered commands and the runaway-loop policy. A
//! [`Script`] owns one decoded program plus its machine; dispatches on the
//! same script are serialized through an async mutex so events queue up
//! instead of interleaving.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::buffer::ByteString;
use crate::bytecode::Program;
use crate::error::ScriptError;
use crate::machine::Machine;
use crate::scope::Scope;
use crate::val::{Command, Val};

/// Builds a fresh object scope from constructor arguments.
pub type ObjectFactory = Arc<dyn Fn(&[Val]) -> Scope + Send + Sync>;

/// What kind of host entity a script is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptKind {
    #[default]
    Weapon,
    Npc,
    Gui,
}

/// Runaway-loop protection settings.
///
/// The limit counts repeated passes over a single back edge within one
/// dispatch; the `limit`-th repeat still runs, the next one aborts. Events
/// named in `exempt_events` are never aborted.
#[derive(Debug, Clone)]
pub struct LoopPolicy {
    pub limit: u32,
    pub exempt_events: Vec<String>,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            limit: 10_000,
            exempt_events: vec!["ontimeout".to_string()],
        }
    }
}

impl LoopPolicy {
    pub fn is_exempt(&self, function: &str) -> bool {
        self.exempt_events
            .iter()
            .any(|e| e.eq_ignore_ascii_case(function))
    }
}

/// Shared state of a script host.
pub struct ScriptEnv {
    pub globals: Scope,
    objects: DashMap<String, Scope>,
    commands: DashMap<String, Command>,
    factories: DashMap<String, ObjectFactory>,
    loop_policy: RwLock<LoopPolicy>,
}

impl ScriptEnv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            globals: Scope::new(),
            objects: DashMap::new(),
            commands: DashMap::new(),
            factories: DashMap::new(),
            loop_policy: RwLock::new(LoopPolicy::default()),
        })
    }

    /// Exposes a host object to scripts under a well-known name, replacing
    /// any previous object with that name.
    pub fn register_object(&self, name: &str, object: Scope) {
        self.objects.insert(name.to_ascii_lowercase(), object);
    }

    pub fn object(&self, name: &str) -> Option<Scope> {
        self.objects
            .get(&name.to_ascii_lowercase())
            .map(|o| o.clone())
    }

    /// Registers a command every script in this environment can call.
    pub fn register_command(&self, name: &str, command: Command) {
        self.commands.insert(name.to_ascii_lowercase(), command);
    }

    pub fn command(&self, name: &str) -> Option<Command> {
        self.commands
            .get(&name.to_ascii_lowercase())
            .map(|c| c.clone())
    }

    /// Registers a constructor for the `new` operator.
    pub fn register_factory(&self, class: &str, factory: ObjectFactory) {
        self.factories.insert(class.to_ascii_lowercase(), factory);
    }

    pub fn factory(&self, class: &str) -> Option<ObjectFactory> {
        self.factories
            .get(&class.to_ascii_lowercase())
            .map(|f| f.clone())
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        self.loop_policy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_loop_policy(&self, policy: LoopPolicy) {
        *self.loop_policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }
}

/// One loaded script: the decoded program, its machine, and the commands
/// registered on it alone.
pub struct Script {
    env: Arc<ScriptEnv>,
    name: RwLock<ByteString>,
    path: RwLock<Option<PathBuf>>,
    kind: ScriptKind,
    ref_object: Option<Scope>,
    program: RwLock<Arc<Program>>,
    machine: Mutex<Machine>,
    commands: DashMap<String, Command>,
    enabled: AtomicBool,
}

impl Script {
    pub fn from_file(
        env: &Arc<ScriptEnv>,
        path: impl AsRef<Path>,
        ref_object: Option<Scope>,
        kind: ScriptKind,
    ) -> Result<Arc<Self>, ScriptError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::build(
            env,
            &name,
            &bytes,
            Some(path.to_path_buf()),
            ref_object,
            kind,
        ))
    }

    pub fn from_bytes(
        env: &Arc<ScriptEnv>,
        name: &str,
        bytes: &[u8],
        ref_object: Option<Scope>,
        kind: ScriptKind,
    ) -> Arc<Self> {
        Self::build(env, name, bytes, None, ref_object, kind)
    }

    fn build(
        env: &Arc<ScriptEnv>,
        name: &str,
        bytes: &[u8],
        path: Option<PathBuf>,
        ref_object: Option<Scope>,
        kind: ScriptKind,
    ) -> Arc<Self> {
        let program = Arc::new(Program::parse(bytes));
        debug!(
            %name,
            instrs = program.len(),
            functions = program.functions.len(),
            "script loaded"
        );
        let script = Arc::new(Self {
            env: env.clone(),
            name: RwLock::new(ByteString::from(name)),
            path: RwLock::new(path),
            kind,
            ref_object: ref_object.clone(),
            program: RwLock::new(program),
            machine: Mutex::new(Machine::new(env.clone(), ref_object)),
            commands: DashMap::new(),
            enabled: AtomicBool::new(true),
        });
        script.install_builtins();
        script
    }

    fn install_builtins(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.register_command(
            "settimer",
            Arc::new(move |_machine, args| {
                if let Some(script) = weak.upgrade() {
                    let secs = args.first().map(Val::as_num).unwrap_or(0.0);
                    script.schedule_event("ontimeout", secs);
                }
                Ok(Val::zero())
            }),
        );
    }

    pub fn env(&self) -> &Arc<ScriptEnv> {
        &self.env
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn ref_object(&self) -> Option<&Scope> {
        self.ref_object.as_ref()
    }

    pub fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .to_string()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The currently loaded program. Frames hold their own clone, so a
    /// reload never changes code under a running dispatch.
    pub fn program(&self) -> Arc<Program> {
        self.program
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Declared function names in declaration order.
    pub fn functions(&self) -> Vec<String> {
        self.program().fn_order.clone()
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.program().function(name).is_some()
    }

    /// Registers a command visible to this script only; it shadows any
    /// environment command with the same name.
    pub fn register_command(&self, name: &str, command: Command) {
        self.commands.insert(name.to_ascii_lowercase(), command);
    }

    pub(crate) fn lookup_command(&self, name: &str) -> Option<Command> {
        let key = name.to_ascii_lowercase();
        self.commands
            .get(&key)
            .map(|c| c.clone())
            .or_else(|| self.env.command(&key))
    }

    /// Stops future dispatches; running ones finish normally.
    pub fn halt(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Dispatches an event and surfaces fatal errors.
    ///
    /// Dispatches serialize on the machine lock. Loop guards are cleared
    /// first so counts never carry over from the previous event.
    pub async fn execute(
        self: &Arc<Self>,
        function: &str,
        args: Vec<Val>,
    ) -> Result<Val, ScriptError> {
        if !self.is_enabled() {
            return Ok(Val::zero());
        }
        self.program().reset_guards();
        let mut machine = self.machine.lock().await;
        machine.begin_dispatch();
        machine.run(self, function, args).await
    }

    /// Fire-and-forget event dispatch: errors are logged and degrade to
    /// zero.
    pub async fn call(self: &Arc<Self>, function: &str, args: Vec<Val>) -> Val {
        match self.execute(function, args).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, %function, script = %self.name(), "event failed");
                Val::zero()
            }
        }
    }

    /// Calls a function another program exported with the `public` marker.
    /// Non-public and unknown functions yield zero.
    ///
    /// A busy target degrades to zero instead of waiting: the caller holds
    /// its own machine lock for the duration, so a cycle of cross-script
    /// calls would otherwise deadlock both scripts.
    pub(crate) async fn call_public(
        self: &Arc<Self>,
        function: &str,
        args: Vec<Val>,
    ) -> Result<Val, ScriptError> {
        let public = self
            .program()
            .function(function)
            .is_some_and(|f| f.public);
        if !public {
            return Ok(Val::zero());
        }
        let mut machine = match self.machine.try_lock() {
            Ok(machine) => machine,
            Err(_) => {
                warn!(
                    script = %self.name(),
                    %function,
                    "target busy, cross-script call degraded"
                );
                return Ok(Val::zero());
            }
        };
        machine.run(self, function, args).await
    }

    /// Runs `function` after `secs` seconds as an independent dispatch. The
    /// task holds only a weak handle, so dropping the script cancels the
    /// delivery.
    pub fn schedule_event(self: &Arc<Self>, function: &str, secs: f64) {
        let delay = match Duration::try_from_secs_f64(secs.max(0.0)) {
            Ok(delay) => delay,
            Err(_) => {
                warn!(secs, %function, script = %self.name(), "timer delay out of range");
                return;
            }
        };
        let weak = Arc::downgrade(self);
        let function = function.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(script) = weak.upgrade() {
                script.call(&function, Vec::new()).await;
            }
        });
    }

    pub async fn update_from_file(&self, path: impl AsRef<Path>) -> Result<(), ScriptError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        *self.name.write().unwrap_or_else(|e| e.into_inner()) = ByteString::from(name);
        *self.path.write().unwrap_or_else(|e| e.into_inner()) = Some(path.to_path_buf());
        self.replace_program(&bytes).await;
        Ok(())
    }

    pub async fn update_from_bytes(&self, name: &str, bytes: &[u8]) {
        *self.name.write().unwrap_or_else(|e| e.into_inner()) = ByteString::from(name);
        *self.path.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.replace_program(bytes).await;
    }

    async fn replace_program(&self, bytes: &[u8]) {
        let program = Arc::new(Program::parse(bytes));
        // Take the machine lock so the swap never races a dispatch.
        let mut machine = self.machine.lock().await;
        *self.program.write().unwrap_or_else(|e| e.into_inner()) = program;
        machine.reset();
        debug!(script = %self.name(), "program replaced");
    }
}

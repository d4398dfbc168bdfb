//! Script runtime: the one interpreter shared by the UI and audio threads.
//!
//! Scripts can define these hooks, all optional:
//! - `on_start()` - Called after a successful compile when playback starts
//! - `on_stop()` - Called when playback stops
//! - `on_update(dt)` - Called each UI frame while running
//! - `on_audio_read(data, length, channels)` - Called on the audio thread for
//!   every block; `data` is the interleaved block, `length` its sample count
//!
//! Every entry point takes the interpreter lock for its whole duration, so
//! hooks never interleave. Field edits queued by the UI are applied inside
//! `audio_read`, under the same lock, before `on_audio_read` runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use mlua::{AnyUserData, Function, HookTriggers, IntoLuaMulti, Lua, Value, VmState};
use serde::Serialize;

use crate::attributes::{self, CompiledScript, FieldDescriptor};
use crate::audio_snapshot::AudioSnapshot;
use crate::config::{LockPolicy, RuntimeConfig};
use crate::error::{Result, RuntimeError};
use crate::field_queue::{self, FieldReceiver, FieldSender, FieldUpdate, FieldValue, Liveness};
use crate::inspector::field_value;
use crate::script_api::{register_api, AudioBlock};
use crate::script_diagnostics::{from_lua_error, ScriptPhase, SCRIPT_CHUNK_NAME};
use crate::script_log::ScriptLogger;

/// Hook globals cleared before every compile.
pub const HOOKS: [&str; 4] = ["on_start", "on_stop", "on_update", "on_audio_read"];

/// VM instructions between budget checks.
const BUDGET_CHECK_INTERVAL: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptState {
    Idle,
    Running,
}

/// What happened to one audio block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioReadOutcome {
    /// The hook ran and its output was copied to the device buffer.
    Processed,
    /// Nothing to run (idle, or no `on_audio_read`); output is silence.
    Silent,
    /// The interpreter was busy under [`LockPolicy::TryLock`]; output is silence.
    Skipped,
    /// The hook raised an error; output is silence.
    Failed,
}

enum HookOutcome {
    Missing,
    Completed,
    Failed,
}

struct Interpreter {
    lua: Lua,
    block: AnyUserData,
    state: ScriptState,
    compiled: bool,
    fields: Vec<FieldDescriptor>,
    generation: u64,
    updates: FieldReceiver,
    instructions: Arc<AtomicU64>,
    logger: ScriptLogger,
}

impl Interpreter {
    fn new(config: &RuntimeConfig, logger: ScriptLogger, updates: FieldReceiver) -> mlua::Result<Self> {
        let lua = Lua::new();
        register_api(&lua, logger.clone(), config.sample_rate)?;
        let block = lua.create_userdata(AudioBlock::default())?;

        let instructions = Arc::new(AtomicU64::new(0));
        if let Some(budget) = config.instruction_budget {
            let counter = instructions.clone();
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(BUDGET_CHECK_INTERVAL),
                move |_lua, _debug| {
                    let used = counter.fetch_add(BUDGET_CHECK_INTERVAL as u64, Ordering::Relaxed)
                        + BUDGET_CHECK_INTERVAL as u64;
                    if used > budget {
                        Err(mlua::Error::RuntimeError(format!(
                            "instruction budget exceeded ({} instructions)",
                            budget
                        )))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        Ok(Self {
            lua,
            block,
            state: ScriptState::Idle,
            compiled: false,
            fields: Vec::new(),
            generation: 0,
            updates,
            instructions,
            logger,
        })
    }

    /// Start a fresh per-call log and instruction allowance.
    fn begin_call(&self) {
        self.logger.reset_call_budget();
        self.instructions.store(0, Ordering::Relaxed);
    }

    fn hook(&self, name: &str) -> Option<Function> {
        match self.lua.globals().get::<Value>(name) {
            Ok(Value::Function(function)) => Some(function),
            _ => None,
        }
    }

    fn call_hook(&self, phase: ScriptPhase, args: impl IntoLuaMulti) -> HookOutcome {
        let Some(name) = phase.hook_name() else {
            return HookOutcome::Missing;
        };
        let Some(hook) = self.hook(name) else {
            return HookOutcome::Missing;
        };
        self.begin_call();
        match hook.call::<()>(args) {
            Ok(()) => HookOutcome::Completed,
            Err(err) => {
                let diagnostic = from_lua_error(phase, &err);
                log::warn!("{}() failed: {}", name, diagnostic);
                self.logger.diagnostic(diagnostic);
                HookOutcome::Failed
            }
        }
    }

    /// Write one queued edit into the script's globals. Returns whether it
    /// was applied.
    fn apply_update(&self, update: &FieldUpdate) -> bool {
        if update.generation != self.generation {
            log::debug!("Dropping stale update for '{}'", update.name);
            return false;
        }
        let declared = self
            .fields
            .iter()
            .any(|f| f.name() == update.name && f.kind() == update.value.kind());
        if !declared {
            log::debug!("Dropping update for undeclared field '{}'", update.name);
            return false;
        }

        self.write_global(&update.name, update.value)
    }

    /// Set a global to `value` if its current type accepts it.
    fn write_global(&self, name: &str, value: FieldValue) -> bool {
        let globals = self.lua.globals();
        let Ok(current) = globals.get::<Value>(name) else {
            return false;
        };
        let value = match (current, value) {
            (Value::Number(_) | Value::Integer(_), FieldValue::Float(v)) => Value::Number(v as f64),
            (Value::Number(_) | Value::Integer(_), FieldValue::Int(v)) => Value::Integer(v as i64),
            (Value::Boolean(_), FieldValue::Bool(v)) => Value::Boolean(v),
            (current, value) => {
                log::debug!(
                    "Dropping {:?} value for '{}': global is a {}",
                    value.kind(),
                    name,
                    current.type_name()
                );
                return false;
            }
        };
        globals.set(name, value).is_ok()
    }

    /// Bring each declared global in line with its descriptor's clamped
    /// initial value.
    fn seed_fields(&self) {
        for field in &self.fields {
            self.write_global(field.name(), field_value(field));
        }
    }

    fn drain_updates(&self) -> usize {
        let mut applied = 0;
        self.updates.drain(|update| {
            if self.apply_update(&update) {
                applied += 1;
            }
        });
        applied
    }

    fn global(&self, name: &str) -> Option<FieldValue> {
        match self.lua.globals().get::<Value>(name).ok()? {
            Value::Number(n) => Some(FieldValue::Float(n as f32)),
            Value::Integer(i) => i32::try_from(i).ok().map(FieldValue::Int),
            Value::Boolean(b) => Some(FieldValue::Bool(b)),
            _ => None,
        }
    }
}

/// Handle to the shared interpreter. Clones refer to the same runtime.
#[derive(Clone)]
pub struct ScriptRuntime {
    interpreter: Arc<Mutex<Interpreter>>,
    liveness: Arc<Liveness>,
    sender: FieldSender,
    logger: ScriptLogger,
    config: Arc<RuntimeConfig>,
}

impl ScriptRuntime {
    pub fn new(config: RuntimeConfig, logger: ScriptLogger) -> Result<Self> {
        let liveness = Arc::new(Liveness::default());
        let (sender, receiver) = field_queue::channel(liveness.clone());
        let interpreter = Interpreter::new(&config, logger.clone(), receiver)?;
        log::info!(
            "Script runtime ready ({} Hz, lock policy {:?})",
            config.sample_rate,
            config.lock_policy
        );
        Ok(Self {
            interpreter: Arc::new(Mutex::new(interpreter)),
            liveness,
            sender,
            logger,
            config: Arc::new(config),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Interpreter> {
        self.interpreter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, Interpreter>> {
        match self.interpreter.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        }
    }

    /// Compile annotated source and load it into the interpreter.
    ///
    /// Rejected while a script is running. On failure the runtime has no
    /// loaded script until the next successful compile.
    pub fn compile(&self, source: &str) -> Result<CompiledScript> {
        let mut interp = self.lock();
        if interp.state == ScriptState::Running {
            return Err(RuntimeError::AlreadyRunning);
        }

        let compiled = attributes::compile(source);

        let globals = interp.lua.globals();
        for hook in HOOKS {
            globals.set(hook, Value::Nil)?;
        }
        interp.generation = self.liveness.advance_generation();
        interp.compiled = false;
        interp.fields.clear();

        interp.begin_call();
        let loaded = interp
            .lua
            .load(compiled.source.as_str())
            .set_name(SCRIPT_CHUNK_NAME)
            .exec();

        if let Err(err) = loaded {
            let diagnostic = from_lua_error(ScriptPhase::Compile, &err);
            log::warn!("Compile failed: {}", diagnostic);
            self.logger.diagnostic(diagnostic.clone());
            return Err(RuntimeError::Compile(diagnostic));
        }

        interp.compiled = true;
        interp.fields = compiled.fields.clone();
        interp.seed_fields();
        log::info!("Compiled script with {} fields", compiled.fields.len());
        self.logger.info("Compile ok");
        Ok(compiled)
    }

    /// Run `on_start` and enter Running. A no-op while already running.
    pub fn start(&self) -> Result<()> {
        let mut interp = self.lock();
        if interp.state == ScriptState::Running {
            log::debug!("start() ignored: already running");
            return Ok(());
        }
        if !interp.compiled {
            return Err(RuntimeError::NotCompiled);
        }

        interp.call_hook(ScriptPhase::Start, ());
        interp.updates.discard();
        interp.state = ScriptState::Running;
        self.liveness.set_running(true);
        Ok(())
    }

    /// Compile, then start.
    pub fn compile_and_start(&self, source: &str) -> Result<CompiledScript> {
        let compiled = self.compile(source)?;
        self.start()?;
        Ok(compiled)
    }

    /// Run `on_stop` and return to Idle. A no-op while idle.
    pub fn stop(&self) {
        let mut interp = self.lock();
        if interp.state == ScriptState::Idle {
            return;
        }
        interp.call_hook(ScriptPhase::Stop, ());
        interp.state = ScriptState::Idle;
        self.liveness.set_running(false);
        let dropped = interp.updates.discard();
        if dropped > 0 {
            log::debug!("Discarded {} pending field updates", dropped);
        }
    }

    /// Per-frame hook.
    pub fn update(&self, dt: f32) {
        if !self.liveness.is_running() {
            return;
        }
        let interp = self.lock();
        if interp.state != ScriptState::Running {
            return;
        }
        interp.call_hook(ScriptPhase::Update, dt as f64);
    }

    /// Fill `buffer` (interleaved, `channels` per frame) from `on_audio_read`.
    ///
    /// Pending field edits are applied first. Whenever the hook does not
    /// complete, the buffer is filled with silence.
    pub fn audio_read(&self, buffer: &mut [f32], channels: usize) -> AudioReadOutcome {
        let interp = match self.config.lock_policy {
            LockPolicy::Block => self.lock(),
            LockPolicy::TryLock => match self.try_lock() {
                Some(guard) => guard,
                None => {
                    buffer.fill(0.0);
                    return AudioReadOutcome::Skipped;
                }
            },
        };

        if interp.state != ScriptState::Running {
            buffer.fill(0.0);
            return AudioReadOutcome::Silent;
        }

        interp.drain_updates();

        if interp.hook("on_audio_read").is_none() {
            buffer.fill(0.0);
            return AudioReadOutcome::Silent;
        }

        match interp.block.borrow_mut::<AudioBlock>() {
            Ok(mut block) => block.reset(buffer.len()),
            Err(err) => {
                log::error!("Audio block unavailable: {}", err);
                buffer.fill(0.0);
                return AudioReadOutcome::Failed;
            }
        }

        let args = (interp.block.clone(), buffer.len() as i64, channels.max(1) as i64);
        match interp.call_hook(ScriptPhase::Audio, args) {
            HookOutcome::Completed => match interp.block.borrow::<AudioBlock>() {
                Ok(block) => {
                    buffer.copy_from_slice(block.as_slice());
                    AudioReadOutcome::Processed
                }
                Err(err) => {
                    log::error!("Audio block unavailable: {}", err);
                    buffer.fill(0.0);
                    AudioReadOutcome::Failed
                }
            },
            HookOutcome::Missing => {
                buffer.fill(0.0);
                AudioReadOutcome::Silent
            }
            HookOutcome::Failed => {
                buffer.fill(0.0);
                AudioReadOutcome::Failed
            }
        }
    }

    pub fn state(&self) -> ScriptState {
        self.lock().state
    }

    /// Lock-free running check, safe to call from any thread.
    pub fn is_running(&self) -> bool {
        self.liveness.is_running()
    }

    /// Fields of the loaded script.
    pub fn fields(&self) -> Vec<FieldDescriptor> {
        self.lock().fields.clone()
    }

    /// Current value of a numeric or boolean global.
    pub fn global(&self, name: &str) -> Option<FieldValue> {
        self.lock().global(name)
    }

    pub fn field_sender(&self) -> FieldSender {
        self.sender.clone()
    }

    pub fn logger(&self) -> &ScriptLogger {
        &self.logger
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn processor(&self, snapshot: Arc<AudioSnapshot>) -> AudioProcessor {
        AudioProcessor {
            runtime: self.clone(),
            snapshot,
        }
    }
}

/// Audio-thread side: runs the runtime and publishes successful blocks to
/// the snapshot.
#[derive(Clone)]
pub struct AudioProcessor {
    runtime: ScriptRuntime,
    snapshot: Arc<AudioSnapshot>,
}

impl AudioProcessor {
    pub fn process(&self, buffer: &mut [f32], channels: usize) -> AudioReadOutcome {
        let outcome = self.runtime.audio_read(buffer, channels);
        if outcome == AudioReadOutcome::Processed {
            self.snapshot.write(buffer);
        }
        outcome
    }

    pub fn snapshot(&self) -> &Arc<AudioSnapshot> {
        &self.snapshot
    }
}

//! Script logging and the outbound event channel.
//!
//! Scripts print from both the UI thread (`on_start`, `on_update`, ...) and
//! the audio thread (`on_audio_read`). Neither writes to a terminal or a
//! widget directly: messages and diagnostics are pushed onto an unbounded
//! channel as [`ScriptEvent`]s and the UI thread drains them into a
//! [`LogConsole`], which timestamps them, keeps a bounded history and
//! forwards them to the `log` facade.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;

use crate::script_diagnostics::ScriptDiagnostic;

/// Default maximum number of script messages per hook call.
pub const DEFAULT_MAX_LOGS_PER_CALL: u32 = 100;

/// Default number of entries kept by the console.
pub const DEFAULT_LOG_HISTORY: usize = 100;

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Info => "[INFO]",
            LogLevel::Warn => "[WARN]",
            LogLevel::Error => "[ERROR]",
        }
    }
}

/// Something the runtime wants the user to see.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEvent {
    Log { level: LogLevel, message: String },
    Diagnostic(ScriptDiagnostic),
}

#[derive(Debug)]
struct CallBudget {
    limit: u32,
    count: AtomicU32,
    warned: AtomicBool,
}

/// Sending side of the event channel. Cheap to clone; safe to call from the
/// audio thread (never blocks).
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    tx: Sender<ScriptEvent>,
    budget: Arc<CallBudget>,
}

impl ScriptLogger {
    /// Reset the per-call message counter. Called before every hook.
    pub fn reset_call_budget(&self) {
        self.budget.count.store(0, Ordering::Relaxed);
        self.budget.warned.store(false, Ordering::Relaxed);
    }

    /// Check if another message fits in the current call.
    fn can_log(&self) -> bool {
        let count = self.budget.count.fetch_add(1, Ordering::Relaxed);
        if count < self.budget.limit {
            return true;
        }
        // Only warn once per call about exceeding the limit
        if !self.budget.warned.swap(true, Ordering::Relaxed) {
            self.send(ScriptEvent::Log {
                level: LogLevel::Warn,
                message: format!(
                    "Script log limit exceeded ({} messages/call). Further logs dropped.",
                    self.budget.limit
                ),
            });
        }
        false
    }

    fn send(&self, event: ScriptEvent) {
        // The console may already be gone during shutdown.
        let _ = self.tx.send(event);
    }

    /// Log a script message, respecting the per-call limit.
    pub fn script(&self, level: LogLevel, message: impl Into<String>) {
        if self.can_log() {
            self.send(ScriptEvent::Log {
                level,
                message: message.into(),
            });
        }
    }

    /// Host message, not subject to the script limit.
    pub fn host(&self, level: LogLevel, message: impl Into<String>) {
        self.send(ScriptEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.host(LogLevel::Info, message);
    }

    pub fn diagnostic(&self, diagnostic: ScriptDiagnostic) {
        self.send(ScriptEvent::Diagnostic(diagnostic));
    }
}

/// Convert a Lua value to display text the way `print` would.
pub fn stringify_value(value: &mlua::Value) -> String {
    match value {
        mlua::Value::Nil => "nil".to_string(),
        mlua::Value::Boolean(b) => b.to_string(),
        mlua::Value::Integer(i) => i.to_string(),
        mlua::Value::Number(n) => {
            if n.is_finite() && n.fract() == 0.0 {
                format!("{:.1}", n)
            } else {
                n.to_string()
            }
        }
        mlua::Value::String(s) => s.to_string_lossy().to_string(),
        other => format!("{}: {:p}", other.type_name(), other.to_pointer()),
    }
}

/// A drained, timestamped console line.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub time: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<ScriptDiagnostic>,
}

impl std::fmt::Display for ConsoleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.time.format("%Y-%m-%d %H:%M:%S"),
            self.level.prefix(),
            self.message
        )
    }
}

/// Receiving side: bounded history of console lines.
#[derive(Debug)]
pub struct LogConsole {
    rx: Receiver<ScriptEvent>,
    entries: VecDeque<ConsoleEntry>,
    capacity: usize,
}

/// Create a connected logger/console pair.
pub fn channel(max_logs_per_call: u32, history: usize) -> (ScriptLogger, LogConsole) {
    let (tx, rx) = channel::unbounded();
    let logger = ScriptLogger {
        tx,
        budget: Arc::new(CallBudget {
            limit: max_logs_per_call,
            count: AtomicU32::new(0),
            warned: AtomicBool::new(false),
        }),
    };
    let capacity = history.max(1);
    let console = LogConsole {
        rx,
        entries: VecDeque::with_capacity(capacity),
        capacity,
    };
    (logger, console)
}

impl LogConsole {
    /// Drain pending events into the history. Returns the number drained.
    pub fn poll(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(event) = self.rx.try_recv() {
            let entry = match event {
                ScriptEvent::Log { level, message } => ConsoleEntry {
                    time: Local::now(),
                    level,
                    message,
                    diagnostic: None,
                },
                ScriptEvent::Diagnostic(diagnostic) => ConsoleEntry {
                    time: Local::now(),
                    level: LogLevel::Error,
                    message: format!("Error: {}", diagnostic),
                    diagnostic: Some(diagnostic),
                },
            };
            forward(&entry);
            self.push(entry);
            drained += 1;
        }
        drained
    }

    fn push(&mut self, entry: ConsoleEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// History, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &ConsoleEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Diagnostics currently in the history.
    pub fn diagnostics(&self) -> impl Iterator<Item = &ScriptDiagnostic> {
        self.entries.iter().filter_map(|e| e.diagnostic.as_ref())
    }
}

fn forward(entry: &ConsoleEntry) {
    match entry.level {
        LogLevel::Info => log::info!(target: "script", "{}", entry.message),
        LogLevel::Warn => log::warn!(target: "script", "{}", entry.message),
        LogLevel::Error => log::error!(target: "script", "{}", entry.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_diagnostics::ScriptPhase;

    #[test]
    fn test_stringify_scalars() {
        assert_eq!(stringify_value(&mlua::Value::Nil), "nil");
        assert_eq!(stringify_value(&mlua::Value::Boolean(true)), "true");
        assert_eq!(stringify_value(&mlua::Value::Integer(42)), "42");
        assert_eq!(stringify_value(&mlua::Value::Number(440.0)), "440.0");
        assert_eq!(stringify_value(&mlua::Value::Number(0.25)), "0.25");
    }

    #[test]
    fn test_stringify_table() {
        let lua = mlua::Lua::new();
        let table = lua.create_table().unwrap();
        let text = stringify_value(&mlua::Value::Table(table));
        assert!(text.starts_with("table: 0x"), "{}", text);
    }

    #[test]
    fn test_log_level_prefix() {
        assert_eq!(LogLevel::Info.prefix(), "[INFO]");
        assert_eq!(LogLevel::Warn.prefix(), "[WARN]");
        assert_eq!(LogLevel::Error.prefix(), "[ERROR]");
    }

    #[test]
    fn test_call_limit() {
        let (logger, mut console) = channel(3, 100);
        for i in 0..10 {
            logger.script(LogLevel::Info, format!("message {}", i));
        }
        // Three messages plus one limit warning.
        assert_eq!(console.poll(), 4);
        let last = console.entries().last().unwrap();
        assert_eq!(last.level, LogLevel::Warn);

        // Host messages ignore the limit, and a reset restores it.
        logger.info("Compile ok");
        logger.reset_call_budget();
        logger.script(LogLevel::Info, "again");
        assert_eq!(console.poll(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let (logger, mut console) = channel(1000, 5);
        for i in 0..12 {
            logger.info(format!("line {}", i));
        }
        console.poll();
        assert_eq!(console.len(), 5);
        let first = console.entries().next().unwrap();
        assert_eq!(first.message, "line 7");

        console.clear();
        assert!(console.is_empty());
    }

    #[test]
    fn test_diagnostics_are_errors() {
        let (logger, mut console) = channel(10, 10);
        logger.diagnostic(ScriptDiagnostic::host_error(ScriptPhase::Compile, "broken"));
        console.poll();
        let entry = console.entries().next().unwrap();
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.message, "Error: broken");
        assert_eq!(console.diagnostics().count(), 1);
        assert!(entry.to_string().contains("[ERROR] Error: broken"));
    }
}

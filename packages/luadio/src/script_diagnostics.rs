//! Structured script diagnostics.
//!
//! Lua reports errors as plain strings with an embedded `chunk:line:`
//! prefix. Luadio wraps them into a stable, JSON-serializable diagnostic
//! that the UI can surface without parsing log output. The attribute
//! compiler only inserts characters inside existing lines, so line numbers
//! reported by the interpreter already match the user's text.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Chunk name used when loading user scripts.
pub const SCRIPT_CHUNK_NAME: &str = "script";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script used the host API incorrectly (nil calls, bad arguments, bad indices).
    HostApiMisuse,
    /// A hook ran past its instruction budget.
    BudgetExceeded,
    /// Host-side failure unrelated to the script text.
    HostError,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    Start,
    Stop,
    Update,
    Audio,
}

impl ScriptPhase {
    /// Lifecycle hook invoked in this phase, if any.
    pub fn hook_name(self) -> Option<&'static str> {
        match self {
            ScriptPhase::Compile => None,
            ScriptPhase::Start => Some("on_start"),
            ScriptPhase::Stop => Some("on_stop"),
            ScriptPhase::Update => Some("on_update"),
            ScriptPhase::Audio => Some("on_audio_read"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number in the user script.
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Raw interpreter error string (useful for bug reports).
    #[serde(default)]
    pub raw: Option<String>,
}

impl std::fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(loc) => write!(f, "line {}: {}", loc.line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl ScriptDiagnostic {
    pub fn host_error(phase: ScriptPhase, message: impl Into<String>) -> Self {
        Self {
            kind: ScriptDiagnosticKind::HostError,
            phase,
            message: message.into(),
            location: None,
            raw: None,
        }
    }
}

/// `None` only if the pattern fails to build; messages then carry no location.
fn location_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // Matches both `[string "script"]:12:` and `script:12:`.
            Regex::new(r#"(?:\[string "script"\]|\bscript):(\d+):\s*"#)
                .map_err(|e| log::error!("Invalid script location pattern: {}", e))
                .ok()
        })
        .as_ref()
}

/// Split a Lua error message into the first user-script line it points at
/// and the message text after that prefix.
pub fn parse_location(message: &str) -> (Option<ScriptLocation>, String) {
    let Some(captures) = location_pattern().and_then(|re| re.captures(message)) else {
        return (None, message.trim().to_string());
    };
    let line = captures
        .get(1)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|line| *line > 0);
    let whole = captures.get(0).map_or(0..0, |m| m.range());
    let text = message[whole.end..]
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    (line.map(|line| ScriptLocation { line }), text)
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    let lower = message.to_ascii_lowercase();

    if lower.contains("instruction budget") {
        return ScriptDiagnosticKind::BudgetExceeded;
    }

    if lower.contains("attempt to call a nil value")
        || lower.contains("attempt to index a nil value")
        || lower.contains("bad argument")
        || lower.contains("out of range")
        || lower.contains("module '")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

/// Convert an interpreter error raised in `phase`.
pub fn from_lua_error(phase: ScriptPhase, err: &mlua::Error) -> ScriptDiagnostic {
    let raw = err.to_string();
    let kind = match err {
        mlua::Error::SyntaxError { .. } => ScriptDiagnosticKind::ParseError,
        _ => classify_message(&raw),
    };
    let (location, text) = parse_location(&raw);
    let message = if text.is_empty() { raw.clone() } else { text };

    ScriptDiagnostic {
        kind,
        phase,
        message,
        location,
        raw: Some(raw),
    }
}

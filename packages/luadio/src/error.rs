use crate::script_diagnostics::ScriptDiagnostic;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("compile failed: {0}")]
    Compile(ScriptDiagnostic),
    #[error("no script has been compiled")]
    NotCompiled,
    #[error("a script is already running; stop it first")]
    AlreadyRunning,
    #[error("interpreter setup failed: {0}")]
    Interpreter(#[from] mlua::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

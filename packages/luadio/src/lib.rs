pub mod tokenizer;
pub mod attributes;
pub mod field_queue;
pub mod runtime;
pub mod audio_snapshot;
pub mod inspector;

// Script host
pub mod script_api;
pub mod script_log;
pub mod script_diagnostics;
pub mod dsp;

pub mod config;
pub mod error;
pub mod cli;

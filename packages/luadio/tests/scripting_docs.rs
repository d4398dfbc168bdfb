//! Test that all Lua code blocks in scripting.md compile and run.
//!
//! Run with: cargo test --test scripting_docs

use std::fs;

use luadio::config::RuntimeConfig;
use luadio::runtime::{AudioReadOutcome, ScriptRuntime};
use luadio::script_log;

/// Extract all Lua code blocks from markdown content
fn extract_lua_blocks(content: &str) -> Vec<(usize, String)> {
    let mut blocks = Vec::new();
    let mut in_lua_block = false;
    let mut current_block = String::new();
    let mut block_start_line = 0;

    for (line_num, line) in content.lines().enumerate() {
        if line.trim().starts_with("```lua") {
            in_lua_block = true;
            block_start_line = line_num + 1;
            current_block.clear();
        } else if in_lua_block && line.trim() == "```" {
            in_lua_block = false;
            blocks.push((block_start_line, current_block.clone()));
        } else if in_lua_block {
            current_block.push_str(line);
            current_block.push('\n');
        }
    }

    blocks
}

/// Compile, start, run one stereo block and stop. Returns the first
/// problem found.
fn run_block(block: &str) -> Result<(), String> {
    let config = RuntimeConfig::default();
    let (logger, mut console) = script_log::channel(config.max_logs_per_call, config.log_history);
    let runtime = ScriptRuntime::new(config, logger).map_err(|e| e.to_string())?;

    runtime.compile_and_start(block).map_err(|e| e.to_string())?;
    runtime.update(1.0 / 60.0);
    let mut buffer = vec![0.0f32; 128];
    let outcome = runtime.audio_read(&mut buffer, 2);
    runtime.stop();

    console.poll();
    if let Some(diagnostic) = console.diagnostics().next() {
        return Err(diagnostic.to_string());
    }
    if outcome == AudioReadOutcome::Failed {
        return Err("on_audio_read failed".to_string());
    }
    Ok(())
}

#[test]
fn test_all_lua_blocks_run() {
    // Read the scripting.md file
    let scripting_md_path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../scripting.md");
    let content = fs::read_to_string(scripting_md_path).expect("Failed to read scripting.md");

    let blocks = extract_lua_blocks(&content);
    assert!(!blocks.is_empty(), "No Lua code blocks found in scripting.md");

    let mut errors = Vec::new();
    for (line_num, block) in &blocks {
        if let Err(error_msg) = run_block(block) {
            errors.push(format!(
                "Block starting at line {} failed:\n{}\nError: {}",
                line_num,
                block.lines().take(3).collect::<Vec<_>>().join("\n"),
                error_msg
            ));
        }
    }

    if !errors.is_empty() {
        panic!(
            "Found {} error(s) in scripting.md:\n\n{}",
            errors.len(),
            errors.join("\n\n---\n\n")
        );
    }

    println!("Successfully ran {} Lua code blocks", blocks.len());
}

#[test]
fn test_default_script_runs() {
    run_block(luadio::script_api::DEFAULT_SCRIPT).unwrap();
}

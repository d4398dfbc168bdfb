use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::attributes::FieldDescriptor;
use crate::audio_snapshot::{AudioSnapshot, SpectrumAnalyzer};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::inspector::Inspector;
use crate::runtime::{AudioReadOutcome, ScriptRuntime};
use crate::script_api::DEFAULT_SCRIPT;
use crate::script_log::{self, LogConsole};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script and print its field schema as JSON
    Check {
        script: PathBuf,

        /// Also print the source handed to the interpreter
        #[arg(long)]
        source: bool,
    },
    /// Run a script offline through the audio and UI loops
    Render {
        script: PathBuf,

        /// Number of audio blocks to process
        #[arg(long, default_value_t = 64)]
        blocks: usize,

        /// Frames per block
        #[arg(long, default_value_t = 512)]
        frames: usize,

        /// Interleaved channels
        #[arg(long, default_value_t = 2)]
        channels: usize,

        /// Field edit applied after start, as name=value (repeatable)
        #[arg(long = "set")]
        edits: Vec<String>,

        /// Runtime config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the last snapshot and its spectrum as JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the default script
    Template,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { script, source } => check(&script, source),
        Commands::Render {
            script,
            blocks,
            frames,
            channels,
            edits,
            config,
            out,
        } => {
            let config = match config {
                Some(path) => RuntimeConfig::load(&path)?,
                None => RuntimeConfig::default(),
            };
            let options = RenderOptions {
                blocks,
                frames,
                channels: channels.max(1),
                edits,
            };
            let report = render(&read_script(&script)?, config, &options)?;
            println!("{}", report.summary);
            if let Some(out) = out {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(&out, json)
                    .with_context(|| format!("failed to write {}", out.display()))?;
            }
            Ok(())
        }
        Commands::Template => {
            print!("{}", DEFAULT_SCRIPT);
            Ok(())
        }
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Print console lines drained since the last call.
fn flush_console(console: &mut LogConsole) {
    let drained = console.poll();
    let skip = console.len().saturating_sub(drained);
    for entry in console.entries().skip(skip) {
        println!("{}", entry);
    }
}

fn check(path: &Path, print_source: bool) -> Result<()> {
    let source = read_script(path)?;
    let config = RuntimeConfig::default();
    let (logger, mut console) = script_log::channel(config.max_logs_per_call, config.log_history);
    let runtime = ScriptRuntime::new(config, logger)?;

    let result = runtime.compile(&source);
    flush_console(&mut console);
    let compiled = match result {
        Ok(compiled) => compiled,
        Err(RuntimeError::Compile(diagnostic)) => {
            anyhow::bail!("{}: {}", path.display(), diagnostic)
        }
        Err(other) => return Err(other.into()),
    };

    println!("{}", serde_json::to_string_pretty(&compiled.fields)?);
    if print_source {
        println!("{}", compiled.source);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub blocks: usize,
    pub frames: usize,
    pub channels: usize,
    pub edits: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct BlockCounts {
    pub processed: usize,
    pub silent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BlockCounts {
    fn record(&mut self, outcome: AudioReadOutcome) {
        match outcome {
            AudioReadOutcome::Processed => self.processed += 1,
            AudioReadOutcome::Silent => self.silent += 1,
            AudioReadOutcome::Skipped => self.skipped += 1,
            AudioReadOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderSummary {
    pub blocks: BlockCounts,
    pub peak: f32,
    pub rms: f32,
    pub dominant_bin: Option<usize>,
    pub dominant_hz: Option<f32>,
}

impl std::fmt::Display for RenderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "blocks: {} processed, {} silent, {} skipped, {} failed; peak {:.4}, rms {:.4}",
            self.blocks.processed,
            self.blocks.silent,
            self.blocks.skipped,
            self.blocks.failed,
            self.peak,
            self.rms
        )?;
        if let Some(hz) = self.dominant_hz {
            write!(f, "; dominant {:.1} Hz", hz)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub fields: Vec<FieldDescriptor>,
    pub summary: RenderSummary,
    pub snapshot: Vec<f32>,
    pub spectrum: Vec<f32>,
}

/// Compile and start `source`, run the audio loop on its own thread while
/// this thread plays the UI role, then stop.
pub fn render(source: &str, config: RuntimeConfig, options: &RenderOptions) -> Result<RenderReport> {
    let sample_rate = config.sample_rate;
    let snapshot = Arc::new(AudioSnapshot::with_capacity(config.snapshot_capacity));
    let (logger, mut console) = script_log::channel(config.max_logs_per_call, config.log_history);
    let runtime = ScriptRuntime::new(config, logger)?;

    let compiled = match runtime.compile_and_start(source) {
        Ok(compiled) => compiled,
        Err(err) => {
            flush_console(&mut console);
            return Err(err).context("script did not compile");
        }
    };

    let mut inspector = Inspector::new(runtime.field_sender());
    inspector.set_fields(compiled.fields);
    for edit in &options.edits {
        inspector
            .apply_assignment(edit)
            .with_context(|| format!("invalid --set {}", edit))?;
    }

    let processor = runtime.processor(snapshot.clone());
    let blocks = options.blocks;
    let block_len = options.frames * options.channels;
    let channels = options.channels;
    let audio = std::thread::Builder::new()
        .name("luadio-audio".to_string())
        .spawn(move || {
            let mut buffer = vec![0.0f32; block_len];
            let mut counts = BlockCounts::default();
            let mut peak = 0.0f32;
            let mut sum_squares = 0.0f64;
            for _ in 0..blocks {
                let outcome = processor.process(&mut buffer, channels);
                counts.record(outcome);
                for sample in &buffer {
                    peak = peak.max(sample.abs());
                    sum_squares += (*sample as f64) * (*sample as f64);
                }
            }
            (counts, peak, sum_squares)
        })
        .context("failed to spawn audio thread")?;

    let frame = Duration::from_millis(16);
    while !audio.is_finished() {
        runtime.update(frame.as_secs_f32());
        flush_console(&mut console);
        std::thread::sleep(Duration::from_millis(1));
    }
    let (counts, peak, sum_squares) = audio
        .join()
        .map_err(|_| anyhow::anyhow!("audio thread panicked"))?;

    runtime.stop();
    flush_console(&mut console);

    let samples = snapshot.to_vec();
    // Spectrum of the first channel.
    let first_channel: Vec<f32> = samples.iter().step_by(options.channels).copied().collect();
    let mut analyzer = SpectrumAnalyzer::new();
    let spectrum = analyzer.compute(&first_channel).to_vec();
    let dominant_bin = analyzer.peak().filter(|(_, m)| *m > 0.0).map(|(bin, _)| bin);
    let fft_size = SpectrumAnalyzer::fft_size(first_channel.len());
    let dominant_hz =
        dominant_bin.map(|bin| SpectrumAnalyzer::bin_frequency(bin, fft_size, sample_rate));

    let total = (blocks * block_len).max(1);
    let summary = RenderSummary {
        blocks: counts,
        peak,
        rms: (sum_squares / total as f64).sqrt() as f32,
        dominant_bin,
        dominant_hz,
    };

    Ok(RenderReport {
        fields: inspector.fields().to_vec(),
        summary,
        snapshot: samples,
        spectrum,
    })
}

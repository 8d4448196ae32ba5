//! Membrane CLI entry point.
//!
//! Provides `schedule`, `validate`, `redact` and `simulate` subcommands for
//! inspecting the 30-step clock, checking wire files, sanitizing text and
//! replaying packet streams through a fully wired membrane.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use membrane::bus::MembraneBus;
use membrane::clock::{ClockError, Sys6MembraneClock, STEPS_PER_CYCLE};
use membrane::codec::CodecPipeline;
use membrane::config::{config_dir, load_config, MembraneConfig};
use membrane::packet::{validate_packet, wire, RedactionPolicy};
use membrane::policy::CrossingPolicy;
use membrane::sink::JsonlSink;

/// Membrane: policy-gated bus between an inner core and the outer world.
#[derive(Parser)]
#[command(name = "membrane", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Print the 30-step clock table.
    Schedule,
    /// Validate a JSON Lines file of wire envelopes.
    Validate {
        /// Path to the packets file.
        path: PathBuf,
    },
    /// Redact e-mails, phone numbers, credentials and extra patterns.
    Redact {
        /// Text to redact.
        text: String,
        /// Extra regular expression to redact (repeatable).
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        /// Field name whose value is redacted (repeatable).
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Submit packets and run the clock against a journal.
    Simulate {
        /// JSON Lines file of wire envelopes.
        #[arg(long)]
        input: PathBuf,
        /// TOML configuration (default: ~/.membrane/config.toml if present).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of ticks to run.
        #[arg(long, default_value_t = 30)]
        ticks: u32,
        /// Append approved crossings to this JSON Lines journal.
        #[arg(long)]
        journal: Option<PathBuf>,
        /// Override the initial energy level.
        #[arg(long)]
        energy: Option<f64>,
        /// Also write JSON logs with daily rotation to this directory.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Schedule => {
            membrane::logging::init_cli();
            handle_schedule();
            Ok(())
        }
        Command::Validate { path } => {
            membrane::logging::init_cli();
            handle_validate(&path)
        }
        Command::Redact {
            text,
            patterns,
            fields,
        } => {
            membrane::logging::init_cli();
            handle_redact(&text, patterns, fields)
        }
        Command::Simulate {
            input,
            config,
            ticks,
            journal,
            energy,
            log_dir,
        } => {
            let _logging_guard = match &log_dir {
                Some(dir) => Some(membrane::logging::init_production(dir)?),
                None => {
                    membrane::logging::init_cli();
                    None
                }
            };
            let config = resolve_config(config.as_deref())?;
            handle_simulate(&input, config, ticks, journal.as_deref(), energy).await
        }
    }
}

/// Explicit path, else `~/.membrane/config.toml` when it exists, else defaults.
fn resolve_config(path: Option<&Path>) -> anyhow::Result<MembraneConfig> {
    if let Some(path) = path {
        return load_config(path).with_context(|| format!("failed to load {}", path.display()));
    }
    let default_path = config_dir()?.join("config.toml");
    if default_path.exists() {
        load_config(&default_path)
            .with_context(|| format!("failed to load {}", default_path.display()))
    } else {
        Ok(MembraneConfig::default())
    }
}

/// Print one row per global step.
fn handle_schedule() {
    println!("step  phase  stage  step  dyad  delta3    window");
    let mut clock = Sys6MembraneClock::new(Default::default());
    for _ in 0..STEPS_PER_CYCLE {
        let snap = clock.tick();
        println!(
            "{:>4}  {:>5}  {:>5}  {:>4}  {:>4}  {:<8}  {}",
            snap.global_step,
            snap.phase,
            snap.stage,
            snap.step,
            snap.dyad,
            snap.delta3,
            snap.window
        );
    }
}

/// Decode and validate every non-empty line; fail if any line is bad.
fn handle_validate(path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut invalid = 0_usize;
    let mut total = 0_usize;
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        total = total.saturating_add(1);
        let line_no = index.saturating_add(1);
        match wire::decode(line) {
            Ok(packet) => {
                let report = validate_packet(&packet);
                if report.valid {
                    println!("line {line_no}: ok {} {}", packet.kind(), packet.id());
                } else {
                    invalid = invalid.saturating_add(1);
                    println!(
                        "line {line_no}: invalid {} {}: {}",
                        packet.kind(),
                        packet.id(),
                        report.errors.join("; ")
                    );
                }
            }
            Err(e) => {
                invalid = invalid.saturating_add(1);
                println!("line {line_no}: undecodable: {e}");
            }
        }
    }

    println!("{total} packet(s), {invalid} invalid");
    if invalid > 0 {
        anyhow::bail!("{invalid} of {total} packet(s) failed validation");
    }
    Ok(())
}

/// Print redacted text.
fn handle_redact(text: &str, patterns: Vec<String>, fields: Vec<String>) -> anyhow::Result<()> {
    let codec = CodecPipeline::new(Default::default()).context("failed to build codec")?;
    let policy = RedactionPolicy {
        redact_fields: fields,
        redact_patterns: patterns,
    };
    let redacted = codec.redact(text, &policy).context("redaction failed")?;
    println!("{redacted}");
    Ok(())
}

/// Submit the input packets, run the clock and print the outcome.
async fn handle_simulate(
    input: &Path,
    config: MembraneConfig,
    ticks: u32,
    journal: Option<&Path>,
    energy: Option<f64>,
) -> anyhow::Result<()> {
    let bus = Arc::new(MembraneBus::new());
    bus.start();
    let policy = Arc::new(CrossingPolicy::new(config.policy.clone()));
    let codec = Arc::new(CodecPipeline::new(config.codec.clone()).context("failed to build codec")?);

    let mut clock = Sys6MembraneClock::new(config.clock.clone());
    if let Some(level) = energy {
        clock.set_energy_level(level);
    }
    clock.connect(Arc::clone(&bus), Arc::clone(&policy), Arc::clone(&codec));
    if let Some(path) = journal {
        let sink = Arc::new(
            JsonlSink::new(path).with_context(|| format!("failed to open {}", path.display()))?,
        );
        clock.set_inner_sink(Arc::clone(&sink) as Arc<dyn membrane::sink::InnerSink>);
        clock.set_outer_sink(sink);
    }

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index.saturating_add(1);
        let packet = match wire::decode(line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping undecodable packet");
                println!("line {line_no}: skipped: {e}");
                continue;
            }
        };
        match bus.submit(packet) {
            Ok(entry) => info!(line = line_no, entry_id = %entry.id, sequence = entry.sequence, "packet submitted"),
            Err(e) => println!("line {line_no}: not submitted: {e}"),
        }
    }

    for _ in 0..ticks {
        let report = match clock.tick_and_cross().await {
            Ok(report) => report,
            Err(ClockError::InnerSink {
                entry_id,
                source,
                settled,
            }) => {
                for crossing in &settled {
                    println!(
                        "[{}] {} {} {}: {}",
                        crossing.sys6_step,
                        crossing.decision,
                        crossing.direction,
                        crossing.packet_id,
                        crossing.reason
                    );
                }
                println!("inner sink failed for {entry_id}: {source}");
                continue;
            }
            Err(e) => return Err(e).context("tick failed"),
        };
        for crossing in &report.crossings {
            println!(
                "step {:>2} [{}] {} {} {}: {}",
                report.snapshot.global_step,
                report.snapshot.window,
                crossing.decision,
                crossing.direction,
                crossing.packet_id,
                crossing.reason
            );
        }
    }

    let stats = bus.get_stats();
    let depths = bus.get_queue_depths();
    println!(
        "entries={} approved={} rejected={} duplicates={} deferrals={} open_inward={} open_outward={}",
        stats.total_entries,
        stats.approved_count,
        stats.rejected_count,
        stats.duplicate_submissions,
        stats.deferral_count,
        depths.inward,
        depths.outward
    );
    println!("policy evaluations={}", policy.history().len());
    Ok(())
}

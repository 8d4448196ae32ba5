//! Configuration loading.
//!
//! A single `membrane.toml` with `[policy]`, `[clock]` and `[codec]` sections.
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level membrane configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MembraneConfig {
    /// Crossing policy thresholds.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Clock, energy and lane settings.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Codec pipeline settings.
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Crossing policy thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Risk scores strictly above this value are never approved.
    #[serde(default = "default_max_risk_score")]
    pub max_risk_score: f64,

    /// Minimum mean fact confidence for evidence to be approved.
    #[serde(default = "default_min_evidence_confidence")]
    pub min_evidence_confidence: f64,

    /// Energy at or below this level defers non-urgent packets.
    #[serde(default = "default_low_energy_threshold")]
    pub low_energy_threshold: f64,

    /// Extra confidence required from sources of unknown trust.
    #[serde(default = "default_unknown_trust_margin")]
    pub unknown_trust_margin: f64,

    /// Risk categories that block a crossing regardless of score.
    #[serde(default = "default_blocked_risk_categories")]
    pub blocked_risk_categories: Vec<String>,

    /// Deferrals after which the clock rejects an entry.
    #[serde(default = "default_max_deferrals")]
    pub max_deferrals: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_risk_score: default_max_risk_score(),
            min_evidence_confidence: default_min_evidence_confidence(),
            low_energy_threshold: default_low_energy_threshold(),
            unknown_trust_margin: default_unknown_trust_margin(),
            blocked_risk_categories: default_blocked_risk_categories(),
            max_deferrals: default_max_deferrals(),
        }
    }
}

/// Clock, energy and lane settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    /// Energy level at construction, clamped to `[0, 1]`.
    #[serde(default = "default_initial_energy")]
    pub initial_energy: f64,

    /// Energy subtracted on every tick.
    #[serde(default = "default_energy_decay")]
    pub energy_decay: f64,

    /// Capacity of each delta-2 lane.
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: u32,

    /// Maximum crossings attempted per tick.
    #[serde(default = "default_crossings_per_tick")]
    pub crossings_per_tick: u32,

    /// Buffer size of the optional event channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            initial_energy: default_initial_energy(),
            energy_decay: default_energy_decay(),
            lane_capacity: default_lane_capacity(),
            crossings_per_tick: default_crossings_per_tick(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Codec pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    /// Length of produced embeddings.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Sentences kept by the summarizer.
    #[serde(default = "default_summary_max_sentences")]
    pub summary_max_sentences: usize,

    /// Hard character cap on summaries.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// Key points reported per summary.
    #[serde(default = "default_max_key_points")]
    pub max_key_points: usize,

    /// Field names always redacted on crossings.
    #[serde(default)]
    pub redact_fields: Vec<String>,

    /// Extra regular expressions always redacted on crossings.
    #[serde(default)]
    pub redact_patterns: Vec<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            embedding_dim: default_embedding_dim(),
            summary_max_sentences: default_summary_max_sentences(),
            summary_max_chars: default_summary_max_chars(),
            max_key_points: default_max_key_points(),
            redact_fields: Vec::new(),
            redact_patterns: Vec::new(),
        }
    }
}

// Default value functions for serde

fn default_max_risk_score() -> f64 {
    0.7
}
fn default_min_evidence_confidence() -> f64 {
    0.3
}
fn default_low_energy_threshold() -> f64 {
    0.2
}
fn default_unknown_trust_margin() -> f64 {
    0.1
}
fn default_blocked_risk_categories() -> Vec<String> {
    ["prompt_injection", "exfiltration", "malware"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}
fn default_max_deferrals() -> u32 {
    5
}
fn default_initial_energy() -> f64 {
    1.0
}
fn default_energy_decay() -> f64 {
    0.005
}
fn default_lane_capacity() -> u32 {
    10
}
fn default_crossings_per_tick() -> u32 {
    1
}
fn default_event_channel_capacity() -> usize {
    64
}
fn default_embedding_dim() -> usize {
    128
}
fn default_summary_max_sentences() -> usize {
    3
}
fn default_summary_max_chars() -> usize {
    280
}
fn default_max_key_points() -> usize {
    5
}

/// Load the membrane config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<MembraneConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: MembraneConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.membrane/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".membrane"))
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub jcamp: JcampConfig,
}

/// Bounds enforced at the upload boundary.  The conversion core itself does
/// not limit archive expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_upload_kb")]
    pub max_upload_kb: u64,

    /// How many levels of nested containers the pipeline opens.
    #[serde(default = "default_max_archive_depth")]
    pub max_archive_depth: usize,

    #[serde(default = "default_max_archive_members")]
    pub max_archive_members: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_kb: default_max_upload_kb(),
            max_archive_depth: default_max_archive_depth(),
            max_archive_members: default_max_archive_members(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Regexes matched against `target: message`; matching events are dropped.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JcampConfig {
    #[serde(default = "default_values_per_line")]
    pub values_per_line: usize,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

impl Default for JcampConfig {
    fn default() -> Self {
        Self {
            values_per_line: default_values_per_line(),
            owner: None,
            origin: None,
        }
    }
}

fn default_max_upload_kb() -> u64 { 10240 }
fn default_max_archive_depth() -> usize { 4 }
fn default_max_archive_members() -> usize { 10_000 }
fn default_values_per_line() -> usize { 12 }

/// Parse a TOML config.  Unknown keys are reported, not rejected.
pub fn parse_config(toml_str: &str) -> Result<ConverterConfig> {
    let de = toml::Deserializer::new(toml_str);
    let mut unknown = Vec::new();
    let config: ConverterConfig = serde_ignored::deserialize(de, |path| {
        unknown.push(path.to_string());
    })
    .context("parsing config")?;
    for key in unknown {
        tracing::warn!("unknown config key '{key}' ignored");
    }
    Ok(config)
}

/// Load `path` if given, else the default location; a missing default file
/// yields the built-in defaults.
pub fn load_config(path: Option<&str>) -> Result<ConverterConfig> {
    let (path, explicit) = match path {
        Some(p) => (PathBuf::from(p), true),
        None => (default_config_path(), false),
    };
    if !explicit && !path.exists() {
        return Ok(ConverterConfig::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&text)
}

/// `$XDG_CONFIG_HOME/spectra-convert/config.toml`, falling back to
/// `~/.config/...`.
pub fn default_config_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("spectra-convert").join("config.toml")
}

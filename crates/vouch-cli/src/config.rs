//! `--config` file support
//!
//! ```toml
//! [decode]
//! max_repairs = 3
//! model = "slug-writer"
//! generation_timeout_ms = 20000
//! deadline_ms = 60000
//!
//! [generator]
//! command = "./bin/generate.sh"
//! args = ["--fast"]
//! ```
//!
//! Command-line flags override anything set here.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use vouch_core::DecodeOptions;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub decode: DecodeOptions,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Program run once per round
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Replay script, resolved relative to the config file
    pub replay: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
    let mut config: Config = toml::from_str(&content)
        .map_err(|e| format!("invalid config {}: {}", path.display(), e))?;
    if let (Some(replay), Some(dir)) = (&config.generator.replay, path.parent()) {
        config.generator.replay = Some(dir.join(replay));
    }
    Ok(config)
}

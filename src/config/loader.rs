use std::{fs, fs::File, io::Write, path::Path};

use ::config::{Config, Environment};
use anyhow::{Context, Result};
use log::{info, trace};

use crate::config::ScannerConfig;

pub const ENV_PREFIX: &str = "CHAINSCAN";

pub fn get_default_config() -> &'static str {
    include_str!("../../config/config.toml")
}

/// Loads the configuration file at `path`, writing the default one first if it is missing.
/// Environment variables (`CHAINSCAN_...`, `__` between nested keys) take precedence over the file.
pub fn load_configuration(path: &Path) -> Result<ScannerConfig> {
    if !path.exists() {
        write_config_to(path, get_default_config()).context("Could not create default config")?;
        info!(path:% = path.display(); "Created new configuration file");
    }

    let filename = path.to_str().context("Invalid config file path")?;
    let cfg = Config::builder()
        .add_source(::config::File::with_name(filename))
        .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"))
        .build()
        .context("Could not build config")?;

    let scanner: ScannerConfig = cfg.try_deserialize().context("Invalid scanner configuration")?;
    trace!(config:? = scanner; "Configuration loaded");
    Ok(scanner)
}

pub fn write_config_to(path: &Path, source: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create parent directories")?;
    };

    let mut file = File::create(path).context("Failed to create config file")?;
    file.write_all(source.as_bytes())
        .context("Failed to write config content")?;
    file.write_all(b"\n").context("Failed to write newline")?;
    Ok(())
}

pub mod structured_console_encoder;

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use log::{debug, info};
use log4rs::{
    Config,
    config::{Deserializers, RawConfig},
};

use crate::log::structured_console_encoder::StructuredConsoleEncoderDeserializer;

const EXTERNAL_CONFIG: &str = "log4rs.yml";

/// Initializes logging from `log4rs.yml` in the working directory, or from the embedded defaults.
pub fn init_logging() -> anyhow::Result<()> {
    let mut deserializers = Deserializers::default();
    deserializers.insert("structured_console", StructuredConsoleEncoderDeserializer);

    let path = Path::new(EXTERNAL_CONFIG);
    if path.exists() {
        log4rs::init_file(path, deserializers).context("Failed to load external log4rs.yml")?;
        info!(path = EXTERNAL_CONFIG; "Logging initialized from external configuration");
        return Ok(());
    }

    let yaml_content = include_str!("../../resources/default_log4rs.yml");
    let raw_config: RawConfig =
        serde_yaml::from_str(yaml_content).context("Embedded logging configuration is invalid YAML")?;

    let (appenders, errors) = raw_config.appenders_lossy(&deserializers);
    if !errors.is_empty() {
        anyhow::bail!("Errors parsing embedded appenders: {:?}", errors);
    }

    let config = Config::builder()
        .appenders(appenders)
        .loggers(raw_config.loggers())
        .build(raw_config.root())
        .context("Failed to build logging config")?;
    log4rs::init_config(config).context("Failed to initialize logging from embedded config")?;

    debug!("Logging initialized from embedded defaults (no external log4rs.yml found)");
    Ok(())
}

fn reveal_addresses() -> bool {
    static REVEAL_ADDRESSES: OnceLock<bool> = OnceLock::new();

    *REVEAL_ADDRESSES.get_or_init(|| {
        std::env::var("REVEAL_ADDRESSES")
            .map(|v| {
                let val = v.to_lowercase();
                val == "true" || val == "1"
            })
            .unwrap_or(false)
    })
}

/// Masks an address for logging, keeping only its first and last six characters.
/// With `REVEAL_ADDRESSES=true` the address is returned unchanged.
pub fn mask_address(address: &str) -> String {
    if reveal_addresses() {
        return address.to_string();
    }
    mask(address)
}

fn mask(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_keeps_ends_of_long_addresses() {
        assert_eq!(mask("bnb1qxy2kgdygjrsqtzq2n0yrf2493"), "bnb1qx...rf2493");
        assert_eq!(mask("short"), "***");
        assert_eq!(mask(""), "***");
    }
}

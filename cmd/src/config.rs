//! Configuration loading for the echo service.
//!
//! Precedence, lowest to highest: YAML config file, environment variables
//! (`PROTOMUX_IP`, `PROTOMUX_PORT`), CLI flags. The merged map, unknown
//! keys included, is what the module sees in `on_configuration`.

use anyhow::{Context, Result};
use protomux_server::Options;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Root structure of the YAML config file.
#[derive(Debug, Deserialize)]
struct FileConfig {
    /// Free-form key/value options forwarded to the server.
    options: Option<Options>,
}

/// Load the options map from an optional config file.
pub fn load_options(path: Option<&Path>) -> Result<Options> {
    let mut options = Options::new();

    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        match serde_yaml::from_str::<FileConfig>(&content) {
            Ok(file) => {
                if let Some(map) = file.options {
                    options.extend(map);
                }
                info!("loaded configuration from {}", path.display());
            }
            Err(err) => {
                warn!(
                    "failed to parse config file {}: {}; using defaults",
                    path.display(),
                    err
                );
            }
        }
    }

    apply_environment_overrides(&mut options);
    Ok(options)
}

fn apply_environment_overrides(options: &mut Options) {
    if let Ok(ip) = std::env::var("PROTOMUX_IP") {
        info!("Ip overridden by environment: {}", ip);
        options.insert("Ip".into(), ip);
    }
    if let Ok(port) = std::env::var("PROTOMUX_PORT") {
        info!("Port overridden by environment: {}", port);
        options.insert("Port".into(), port);
    }
}

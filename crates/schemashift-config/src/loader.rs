use std::path::{Path, PathBuf};

use schemashift_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// File names probed by [`ConfigLoader::discover`], in order.
pub const CONFIG_FILE_NAMES: [&str; 4] = [
    "schemashift.yml",
    "schemashift.yaml",
    "schemashift.toml",
    "schemashift.json",
];

/// Reads `AppConfig` from YAML, TOML or JSON files.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let config = Self::parse(path, &contents)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Load the first known config file in `dir`, or defaults if none exists.
    pub fn discover(dir: &Path) -> Result<(AppConfig, Option<PathBuf>)> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok((Self::from_file(&candidate)?, Some(candidate)));
            }
        }

        info!(
            "no config file found in {}, using defaults",
            dir.display()
        );
        Ok((AppConfig::default(), None))
    }

    fn parse(path: &Path, contents: &str) -> Result<AppConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        debug!("parsing {} as {ext}", path.display());
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            "json" => serde_json::from_str(contents)
                .map_err(|e| Error::Config(format!("JSON parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Serialize `config` next to `path`, choosing the format from its extension.
    pub fn write(path: &Path, config: &AppConfig) -> Result<()> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let contents = match ext {
            "yml" | "yaml" => serde_yaml::to_string(config)
                .map_err(|e| Error::Config(format!("YAML serialize error: {e}")))?,
            "toml" => toml::to_string_pretty(config)
                .map_err(|e| Error::Config(format!("TOML serialize error: {e}")))?,
            "json" => serde_json::to_string_pretty(config)?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };
        std::fs::write(path, contents)?;
        Ok(())
    }
}

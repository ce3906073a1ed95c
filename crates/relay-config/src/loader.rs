use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::Config;

/// Find the config file by searching standard locations.
pub fn find_config_path() -> PathBuf {
    let local = Path::new("relay.json");
    if local.exists() {
        return local.to_path_buf();
    }

    // Default: ~/.relay/config.json (will use defaults if missing)
    dirs::home_dir()
        .map(|h| h.join(".relay").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("relay.json"))
}

/// Load configuration from a JSON file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Save configuration to a JSON file.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let contents = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create config directory '{}'",
                parent.to_string_lossy()
            )
        })?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg.pipeline.max_concurrent_roles, 4);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut cfg = Config::default();
        cfg.pipeline.role_timeout_secs = 42;
        cfg.agents.models.insert(
            "default".into(),
            crate::ModelRef {
                provider: "ollama".into(),
                model: "llama3".into(),
            },
        );
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.pipeline.role_timeout_secs, 42);
        assert_eq!(loaded.agents.models["default"].model, "llama3");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }
}

//! Configuration file support for medlit.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `MEDLIT__SECTION__KEY` environment variables, then the conventional
//! `NCBI_API_KEY`, `NCBI_EMAIL` and `LAB_WORK_DIR` variables for values that
//! are still unset.
//!
//! # Configuration File Format
//!
//! ```toml
//! [ncbi]
//! api_key = "your-ncbi-key"
//! email = "you@example.org"
//!
//! [sources.pubmed]
//! enabled = true
//! endpoint = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils"
//!
//! [sources.koreamed]
//! enabled = true
//! endpoint = "https://koreamed.org/SearchBasic.php"
//! requests_per_second = 1
//!
//! [search]
//! adapter_timeout_secs = 10
//! overall_timeout_secs = 30
//! max_results_per_db = 5
//! retry_attempts = 3
//! request_timeout_ms = 2500
//! strategy_target = 5
//!
//! [storage]
//! work_dir = "/data/lab"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};

use super::Config;

/// File name searched for in the working directory
pub const LOCAL_CONFIG_FILE: &str = "medlit.toml";

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Locate a configuration file: `./medlit.toml`, then `<config dir>/medlit/config.toml`
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join(env!("CARGO_PKG_NAME")).join("config.toml"))
        .filter(|path| path.is_file())
}

/// Load configuration from an explicit file, a discovered file, or defaults
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let discovered = match path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

    if let Some(file) = &discovered {
        tracing::debug!(path = %file.display(), "Loading configuration file");
        builder = builder.add_source(config::File::from(file.as_path()).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix("MEDLIT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config: Config = settings.try_deserialize()?;
    config.apply_env_fallbacks(|key| std::env::var(key).ok());
    Ok(config)
}

impl Config {
    /// Save configuration to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseId;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let toml_content = r#"
[ncbi]
email = "lab@example.org"

[sources.koreamed]
enabled = false

[sources.pubmed]
endpoint = "http://localhost:9999/eutils"
requests_per_second = 2

[search]
adapter_timeout_secs = 5
max_results_per_db = 8
"#;

        let mut file = File::create(&path).unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert!(!config.sources.koreamed.enabled);
        assert_eq!(config.sources.pubmed.endpoint, "http://localhost:9999/eutils");
        assert_eq!(config.http_settings(DatabaseId::PubMed).requests_per_second, 2);
        assert_eq!(config.search.adapter_timeout_secs, 5);
        assert_eq!(config.search.overall_timeout_secs, 30);
        assert_eq!(config.search.max_results_per_db, 8);
        assert!(config.ncbi.email.is_some());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.ncbi.tool = "saved-tool".to_string();
        config.search.retry_attempts = 5;

        config.save(&path).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.ncbi.tool, "saved-tool");
        assert_eq!(loaded.search.retry_attempts, 5);
    }

    #[test]
    fn test_config_file_nonexistent() {
        let result = load_config(Some(Path::new("/nonexistent/medlit.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invalid.toml");

        std::fs::write(&path, "invalid = toml = content").unwrap();

        assert!(load_config(Some(&path)).is_err());
    }
}

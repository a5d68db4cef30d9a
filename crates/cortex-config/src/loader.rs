//! Configuration loading and merging
//!
//! Sources, lowest precedence first: built-in defaults, the global file
//! (`~/.claude/cortex-embeddings/config.toml`), the repo-local file
//! (`<repo>/.cortex/config.toml`), then `CORTEX_*` environment variables.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{ConfigError, CortexConfig, Result};

/// Loads and merges configuration for one repository.
pub struct ConfigLoader {
    repo_path: PathBuf,
    /// Overrides the global directory (tests)
    global_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(repo_path: impl AsRef<Path>) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            global_dir: None,
        }
    }

    pub fn with_global_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.global_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Merge all sources into a validated config.
    pub fn load(&self) -> Result<CortexConfig> {
        let mut config = CortexConfig::default();

        if let Some(global) = self.global_file() {
            if global.exists() {
                debug!("Loading global config {:?}", global);
                merge_file(&mut config, &global)?;
            }
        }

        let local = self.repo_path.join(".cortex").join("config.toml");
        if local.exists() {
            debug!("Loading local config {:?}", local);
            merge_file(&mut config, &local)?;
        }

        apply_env_overrides(&mut config);

        config.validate()?;
        Ok(config)
    }

    fn global_file(&self) -> Option<PathBuf> {
        self.global_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".claude").join("cortex-embeddings")))
            .map(|dir| dir.join("config.toml"))
    }
}

/// Overlay a TOML file onto `config`. Sections present in the file replace
/// the current section wholesale; absent sections keep their value.
fn merge_file(config: &mut CortexConfig, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let value: toml::Value = text.parse().map_err(ConfigError::ParseError)?;
    let Some(table) = value.as_table() else {
        return Ok(());
    };

    macro_rules! overlay {
        ($key:literal, $field:ident) => {
            if let Some(section) = table.get($key) {
                match section.clone().try_into() {
                    Ok(parsed) => config.$field = parsed,
                    Err(e) => {
                        return Err(ConfigError::ValidationError(format!(
                            "invalid [{}] section in {:?}: {}",
                            $key, path, e
                        )))
                    }
                }
            }
        };
    }

    overlay!("embedding", embedding);
    overlay!("change_processor", change_processor);
    overlay!("live_indexer", live_indexer);
    overlay!("staging", staging);
    overlay!("logging", logging);
    Ok(())
}

/// Environment variables recognized on top of file config.
fn apply_env_overrides(config: &mut CortexConfig) {
    if let Some(count) = env_parse::<usize>("CORTEX_PROCESS_COUNT") {
        config.embedding.process_count = count;
    }
    if let Some(size) = env_parse::<usize>("CORTEX_BATCH_SIZE") {
        config.embedding.batch_size = size;
    }
    if let Some(ms) = env_parse::<u64>("CORTEX_TIMEOUT_MS") {
        config.embedding.timeout_ms = ms;
    }
    if let Some(ms) = env_parse::<u64>("CORTEX_DEBOUNCE_MS") {
        config.change_processor.debounce_ms = ms;
        config.live_indexer.debounce_ms = ms;
    }
    if let Some(filter) = std::env::var("CORTEX_LOG").ok().filter(|v| !v.is_empty()) {
        config.logging.filter = filter;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}={}", name, raw);
            None
        }
    }
}

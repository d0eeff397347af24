//! TOML configuration for curation runs.
//!
//! Lookup order: explicit path, `MEMCURATE_CONFIG`, `./memcurate.toml`,
//! then built-in defaults. `MEMCURATE_THRESHOLD` overrides the default
//! breaker threshold after the file is read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use memcurate_state::{ConnectionConfig, Threshold};
use serde::{Deserialize, Serialize};

use crate::error::{CurationError, Result};
use crate::token::{TokenAccountant, DEFAULT_CHARS_PER_TOKEN};

pub const CONFIG_ENV: &str = "MEMCURATE_CONFIG";
pub const THRESHOLD_ENV: &str = "MEMCURATE_THRESHOLD";
pub const DEFAULT_CONFIG_FILE: &str = "memcurate.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    pub session: SessionConfig,
    pub tokens: TokenConfig,
    pub extraction: ExtractionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Breaker threshold for owners without their own setting
    pub default_threshold: f64,
    pub max_content_chars: usize,
    pub search_limit: usize,
    /// Wall-clock ceiling per session; 0 disables it
    pub max_session_secs: u64,
    /// Journal memories written on commit/rollback are truncated to this
    pub journal_max_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_threshold: Threshold::DEFAULT.value(),
            max_content_chars: 10_000,
            search_limit: 20,
            max_session_secs: 900,
            journal_max_chars: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub chars_per_token: f64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Token budget per transcript chunk handed to the extractor
    pub chunk_tokens: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { chunk_tokens: 2_000 }
    }
}

/// Database location. `MEMCURATE_DB_*` variables win over these values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub url: Option<String>,
    pub namespace: Option<String>,
    pub database: Option<String>,
}

impl CurationConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CurationError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            CurationError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve, read and validate the configuration, then apply env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match candidate {
            Some(path) => Self::from_file(&path)?,
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(&local)?
                } else {
                    tracing::info!("No config file found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(THRESHOLD_ENV) {
            self.session.default_threshold = raw.trim().parse().map_err(|_| {
                CurationError::Config(format!("{THRESHOLD_ENV} is not a number: {raw}"))
            })?;
            self.validate()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Threshold::new(self.session.default_threshold)
            .map_err(|e| CurationError::Config(e.to_string()))?;
        if self.session.max_content_chars == 0 {
            return Err(CurationError::Config(
                "session.max_content_chars must be positive".into(),
            ));
        }
        if self.session.search_limit == 0 {
            return Err(CurationError::Config(
                "session.search_limit must be positive".into(),
            ));
        }
        if self.session.journal_max_chars == 0 {
            return Err(CurationError::Config(
                "session.journal_max_chars must be positive".into(),
            ));
        }
        if !(self.tokens.chars_per_token.is_finite() && self.tokens.chars_per_token > 0.0) {
            return Err(CurationError::Config(
                "tokens.chars_per_token must be a positive number".into(),
            ));
        }
        if self.extraction.chunk_tokens == 0 {
            return Err(CurationError::Config(
                "extraction.chunk_tokens must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn default_threshold(&self) -> Threshold {
        Threshold::new(self.session.default_threshold).unwrap_or_default()
    }

    pub fn accountant(&self) -> TokenAccountant {
        TokenAccountant::new(self.tokens.chars_per_token)
    }

    pub fn session_ceiling(&self) -> Option<Duration> {
        (self.session.max_session_secs > 0)
            .then(|| Duration::from_secs(self.session.max_session_secs))
    }

    /// Connection settings: env first, then this file, then the local default.
    pub fn connection(&self) -> Result<ConnectionConfig> {
        let mut conn = ConnectionConfig::from_env().map_err(CurationError::Config)?;
        if std::env::var_os("MEMCURATE_DB_URL").is_none() {
            if let Some(url) = &self.storage.url {
                conn.url = url.clone();
            }
        }
        if std::env::var_os("MEMCURATE_DB_NAMESPACE").is_none() {
            if let Some(ns) = &self.storage.namespace {
                conn.namespace = ns.clone();
            }
        }
        if std::env::var_os("MEMCURATE_DB_DATABASE").is_none() {
            if let Some(db) = &self.storage.database {
                conn.database = db.clone();
            }
        }
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = CurationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_threshold().value(), 0.75);
        assert_eq!(config.session.max_content_chars, 10_000);
        assert_eq!(config.session_ceiling(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = CurationConfig::from_toml_str(
            r#"
            [session]
            default_threshold = 0.5
            max_session_secs = 0

            [storage]
            url = "mem://"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_threshold().value(), 0.5);
        assert_eq!(config.session.search_limit, 20);
        assert_eq!(config.session_ceiling(), None);
        assert_eq!(config.tokens.chars_per_token, 4.0);
        assert_eq!(config.storage.url.as_deref(), Some("mem://"));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = CurationConfig::from_toml_str("[session]\ndefault_threshold = 0.0\n").unwrap_err();
        assert!(matches!(err, CurationError::Config(_)));
        assert!(CurationConfig::from_toml_str("[session]\ndefault_threshold = 1.5\n").is_err());
    }

    #[test]
    fn zero_chunk_budget_is_rejected() {
        assert!(CurationConfig::from_toml_str("[extraction]\nchunk_tokens = 0\n").is_err());
    }

    #[test]
    fn zero_journal_length_is_rejected() {
        let err = CurationConfig::from_toml_str("[session]\njournal_max_chars = 0\n").unwrap_err();
        assert!(matches!(err, CurationError::Config(ref m) if m.contains("journal_max_chars")));
        assert!(CurationConfig::from_toml_str("[session]\njournal_max_chars = 1\n").is_ok());
    }

    #[test]
    fn loads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tokens]\nchars_per_token = 3.5").unwrap();
        let config = CurationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.accountant().chars_per_token(), 3.5);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = CurationConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

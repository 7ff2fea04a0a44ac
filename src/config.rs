use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::probe::{BeyondMaxOptions, ProbeConfig, RetryPolicy, MAX_RETRIES_CEILING};
use crate::sync::SyncOptions;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FormsyncConfig {
    pub database: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl FormsyncConfig {
    /// Configured database path, or the default location under `base`
    pub fn database_path(&self, base: &Path) -> PathBuf {
        match &self.database {
            Some(db) => base.join(db),
            None => default_database_path_in(base),
        }
    }
}

/// Tuning knobs for syncing, as written in `formsync.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_cache_age_hours: u64,
    pub full_sync_interval_hours: u64,
    pub circuit_threshold: u32,
    pub max_beyond_probes: u32,
    pub max_consecutive_failures: u32,
    pub request_delay_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_retries: u32,
    pub gap_start_id: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_cache_age_hours: 24,
            full_sync_interval_hours: 24,
            circuit_threshold: 5,
            max_beyond_probes: 50,
            max_consecutive_failures: 10,
            request_delay_ms: 100,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
            max_retries: 3,
            gap_start_id: 1,
        }
    }
}

impl SyncSettings {
    pub fn to_sync_options(&self) -> Result<SyncOptions> {
        let options = SyncOptions {
            force_full: false,
            max_cache_age: Duration::from_secs(self.max_cache_age_hours.saturating_mul(3600)),
            circuit_threshold: self.circuit_threshold,
            beyond_max: BeyondMaxOptions {
                max_probes: self.max_beyond_probes,
                max_consecutive_failures: self.max_consecutive_failures,
            },
            gap_start_id: self.gap_start_id,
            probe_gaps: true,
            probe_beyond_max: true,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn to_probe_config(&self) -> Result<ProbeConfig> {
        if self.max_retries > MAX_RETRIES_CEILING {
            return Err(Error::Configuration(format!(
                "max_retries {} exceeds the ceiling of {}",
                self.max_retries, MAX_RETRIES_CEILING
            )));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(Error::Configuration(
                "retry_max_delay_ms must not be below retry_base_delay_ms".to_string(),
            ));
        }

        Ok(ProbeConfig {
            request_delay: Duration::from_millis(self.request_delay_ms),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                ..RetryPolicy::default()
            },
            max_retries: self.max_retries,
        })
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("formsync.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".formsync").join("forms.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<FormsyncConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: FormsyncConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &FormsyncConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (pass force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

use crate::error::ConfigError;
use crate::signing::SigTiming;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One HSM repository to attach at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository name referenced by signing keys
    pub name: String,

    /// Path to the PKCS#11 module library
    pub module_path: String,

    /// Login credential; `None` means the operator is prompted elsewhere
    #[serde(default)]
    pub pin: Option<String>,
}

/// Static configuration for the signing engine.
///
/// Loaded from a TOML file with `SIGRUN_`-prefixed environment overrides
/// for the operational knobs; policy evaluation and XML parsing happen in
/// external collaborators, this struct only carries already-decided values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Number of concurrent signing workers
    pub worker_threads: usize,

    /// Capacity of the signing queue (producers block when it is full)
    pub queue_size: usize,

    /// System-wide cap on live HSM sessions
    pub max_sessions: usize,

    /// Directory for per-zone backup logs
    pub backup_dir: PathBuf,

    /// Signature validity window in seconds
    pub sig_validity_secs: u64,

    /// Random extension added to expiration, in seconds
    pub sig_jitter_secs: u64,

    /// Signatures expiring within this window are re-created
    pub sig_refresh_secs: u64,

    /// HSM repositories to attach
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            queue_size: 1000,
            max_sessions: crate::hsm::HSM_MAX_SESSIONS,
            backup_dir: PathBuf::from("/var/lib/sigrun"),
            sig_validity_secs: 30 * 24 * 3600,
            sig_jitter_secs: 12 * 3600,
            sig_refresh_secs: 3 * 24 * 3600,
            repositories: Vec::new(),
        }
    }
}

impl SignerConfig {
    /// Load configuration from a TOML file, then apply env overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config: SignerConfig =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Override operational knobs from the environment
    pub fn apply_env(&mut self) {
        if let Some(v) = env_usize("SIGRUN_WORKER_THREADS") {
            self.worker_threads = v;
        }
        if let Some(v) = env_usize("SIGRUN_QUEUE_SIZE") {
            self.queue_size = v;
        }
        if let Some(v) = env_usize("SIGRUN_MAX_SESSIONS") {
            self.max_sessions = v;
        }
        if let Ok(v) = std::env::var("SIGRUN_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "max_sessions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sig_validity_secs <= self.sig_refresh_secs {
            return Err(ConfigError::Invalid {
                field: "sig_validity_secs",
                reason: "validity must exceed the refresh window".to_string(),
            });
        }

        let mut names = HashSet::new();
        for repository in &self.repositories {
            if repository.name.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "repositories.name",
                    reason: "repository name must not be empty".to_string(),
                });
            }
            if !names.insert(repository.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "repositories.name",
                    reason: format!("duplicate repository '{}'", repository.name),
                });
            }
        }
        Ok(())
    }

    /// Backup log path for one zone
    pub fn backup_file(&self, zone: &str) -> PathBuf {
        let zone = crate::records::normalize_owner(zone);
        self.backup_dir
            .join(format!("{}backup", zone.trim_start_matches('.')))
    }

    pub fn sig_timing(&self) -> SigTiming {
        SigTiming {
            validity: chrono::Duration::seconds(self.sig_validity_secs as i64),
            jitter: chrono::Duration::seconds(self.sig_jitter_secs as i64),
            refresh: chrono::Duration::seconds(self.sig_refresh_secs as i64),
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

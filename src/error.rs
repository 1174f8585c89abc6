use thiserror::Error;

/// Bad or missing external inputs; fatal to a pass, never to the process
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Crate-level error aggregating the per-area taxonomies
#[derive(Error, Debug)]
pub enum SignerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rrset(#[from] crate::rrset::RrsetError),

    #[error(transparent)]
    Hsm(#[from] crate::hsm::HsmError),

    #[error(transparent)]
    Backup(#[from] crate::backup::BackupError),

    #[error(transparent)]
    Pass(#[from] crate::pass::PassError),
}

pub type Result<T> = std::result::Result<T, SignerError>;

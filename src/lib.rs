pub mod backup;
pub mod config;
pub mod error;
pub mod hsm;
pub mod keys;
pub mod pass;
pub mod records;
pub mod rrset;
pub mod signing;

pub use config::SignerConfig;
pub use error::{Result, SignerError};
pub use pass::{PassReport, PassState, ZoneSigner};

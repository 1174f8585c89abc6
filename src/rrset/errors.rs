use crate::records::RrType;
use thiserror::Error;

/// RRset lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RrsetError {
    /// Deleting a record that is not part of the committed set is a
    /// contract violation unless the caller explicitly allows duplicates
    #[error("record not found in {owner} {rtype}")]
    NotFound { owner: String, rtype: RrType },
}

pub type Result<T> = std::result::Result<T, RrsetError>;

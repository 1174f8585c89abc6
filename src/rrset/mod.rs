pub mod errors;
#[allow(clippy::module_inception)]
pub mod rrset;
pub mod store;

pub use errors::{Result, RrsetError};
pub use rrset::{CommitOutcome, RrSet};
pub use store::{RrsetKey, RrsetStore};

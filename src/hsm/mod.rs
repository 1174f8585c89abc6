pub mod backend;
pub mod errors;
pub mod pool;
pub mod soft;

pub use backend::{HsmBackend, KeyHandle};
pub use errors::{HsmError, Result};
pub use pool::{HSM_MAX_SESSIONS, HsmModule, HsmPool, Session};
pub use soft::SoftHsm;

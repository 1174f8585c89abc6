pub mod queue;
pub mod signer;
pub mod worker;

pub use queue::{QueueError, SigningQueue};
pub use signer::{SigTiming, build_rrsig, reusable_rrsig};
pub use worker::{SignCounters, SignFailure, WorkerContext, WorkerPool};

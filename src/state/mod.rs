//! Batch state management
//!
//! Crash-safe, lock-guarded persistence of batch progress:
//! - Path authorization against an allowed root
//! - Atomic temp-file + rename writes
//! - Cross-process advisory locks with bounded wait
//! - Schema-checked loading with backward-compatible defaults
//! - Batch lifecycle and auto-clear bookkeeping

mod atomic;
mod config;
mod error;
mod lock;
mod machine;
mod path_guard;
mod schema;
mod store;

pub use atomic::{AtomicFileWriter, StagedWrite};
pub use config::{StateConfig, DEFAULT_LOCK_RETRY_INTERVAL, DEFAULT_LOCK_TIMEOUT};
pub use error::{BatchStateError, IoErrorKind, StateResult};
pub use lock::{ConcurrencyGuard, LockMode, StateLock};
pub use machine::{generate_batch_id, BatchStateMachine};
pub use path_guard::{authorize, AuthorizedPath, PathValidator};
pub use schema::StateSchema;
pub use store::{CleanupOutcome, StateStore};

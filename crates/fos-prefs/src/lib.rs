//! fOS Preferences - Durable typed key-value storage
//!
//! Small, atomic integer/boolean store used by subsystems that must keep
//! state across process restarts (VPN feature registry, reconnect counters).
//!
//! # Stores
//!
//! - [`MemoryStore`]: process-local, for tests and ephemeral state
//! - [`FileStore`]: JSON document on disk, written atomically
//! - [`ScopedStore`]: key namespace over any other store
//!
//! Missing or unreadable values are reported as absent rather than as
//! errors: callers treat "absent" as "never happened".

mod error;
mod file;
mod memory;
mod scoped;
mod store;

pub use error::PrefsError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use scoped::ScopedStore;
pub use store::{PrefValue, PreferenceStore};

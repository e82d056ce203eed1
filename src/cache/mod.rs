//! Result Cache
//!
//! Single-flight cache of materialized transform results keyed by request fingerprint.

pub mod entry;
pub mod handle;
pub mod store;

pub use entry::{CacheEntry, CachedOutput, EntryStatus};
pub use handle::ResultHandle;
pub use store::{CacheSettings, Lookup, ResultCache};

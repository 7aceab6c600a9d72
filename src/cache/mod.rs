//! Persistent, content-addressed image cache
//!
//! One cache entry per (OS, architecture, image reference) triple, keyed by
//! a SHA-256 digest of the triple. The finished artifact file is the only
//! state that survives a run; everything else inside an entry is transient.
//!
//! # Entry lifecycle
//!
//! | State | On disk | Meaning |
//! |----------|----------------------------|----------------------------------|
//! | Miss | no entry directory | pipeline runs from scratch |
//! | Building | entry without `image.erofs` | in progress, or a crashed run |
//! | Complete | entry with `image.erofs` | cache hit, pipeline short-circuits |
//!
//! A `Building` entry left behind by a crash is removed by the cleanup guard
//! of the run that created it; if the process was killed hard, the next run
//! for the same key reuses the directory and overwrites the transient state.

pub mod entry;
pub mod key;

pub use entry::{CacheEntry, CacheState, CacheStore, CleanupGuard, EntryInfo};
pub use key::CacheKey;

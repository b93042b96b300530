//! Keyed caches with expiry
//!
//! Two scopes share one contract:
//!
//! - [`memory`] - in-process map with a short fixed TTL, for lookups repeated
//!   within a single collection run
//! - [`persistent`] - one JSON file per key on disk, for slow-changing facts
//!   reused across runs
//!
//! Expiry is lazy: an expired key reads as absent and is dropped on that read.
//! Both implementations serialize access internally so units running in the
//! collection pool can share them.

mod memory;
mod persistent;

pub use memory::{MemoryCache, DEFAULT_MEMORY_TTL};
pub use persistent::PersistentCache;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Key/value store with per-entry expiry
pub trait Cache: Send + Sync {
    /// Read a live entry
    fn get(&self, key: &str) -> Option<Value>;

    /// Store an entry that expires after `ttl`
    fn set(&self, key: &str, value: Value, ttl: Duration);
}

/// Typed helpers over any [`Cache`]
pub trait CacheExt: Cache {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("Ignoring cache entry {} with unexpected shape: {}", key, e);
                None
            }
        }
    }

    fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl),
            Err(e) => tracing::warn!("Failed to serialize cache entry {}: {}", key, e),
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// Build a collision-free key from a kind tag and its parameters
///
/// Parameters are percent-encoded so a `:` inside one cannot be confused
/// with the separator.
pub fn cache_key(kind: &str, params: &[&str]) -> String {
    let mut key = kind.to_string();
    for param in params {
        key.push(':');
        key.push_str(&urlencoding::encode(param));
    }
    key
}

//! Advisory parse cache.
//!
//! The workspace keys cached parse results by `(filename, last_modified)`;
//! a miss simply means "reparse". The on-disk cache format belongs to the
//! cache implementation, not to the workspace.
use crate::parser::ParseResult;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filename: String,
    pub last_modified_ms: u64,
}

pub trait ParseCache {
    fn get(&self, key: &CacheKey) -> Option<ParseResult>;
    fn put(&self, key: CacheKey, value: ParseResult);
}

/// Cache that never hits; every lookup reparses
#[derive(Debug, Default)]
pub struct NullCache;

impl ParseCache for NullCache {
    fn get(&self, _key: &CacheKey) -> Option<ParseResult> {
        None
    }

    fn put(&self, _key: CacheKey, _value: ParseResult) {}
}

/// In-memory cache, useful for repeated loads within one process
#[derive(Debug, Default)]
pub struct MemCache {
    entries: Mutex<HashMap<CacheKey, ParseResult>>,
}

impl ParseCache for MemCache {
    fn get(&self, key: &CacheKey) -> Option<ParseResult> {
        let entries = self.entries.lock().ok()?;
        let hit = entries.get(key).cloned();
        tracing::debug!(filename = %key.filename, hit = hit.is_some(), "parse cache lookup");
        hit
    }

    fn put(&self, key: CacheKey, value: ParseResult) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, value);
        }
    }
}

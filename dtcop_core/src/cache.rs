//! Bounded cache of open shard readers.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::{Error, Result};
use crate::reader::ShardReader;

#[derive(Debug, Default)]
struct CacheState {
    readers: HashMap<PathBuf, Arc<ShardReader<File>>>,
    /// Least recently used first.
    recency: VecDeque<PathBuf>,
}

impl CacheState {
    fn touch(&mut self, key: &Path) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            if let Some(k) = self.recency.remove(pos) {
                self.recency.push_back(k);
            }
        }
    }

    fn remove(&mut self, key: &Path) -> Option<Arc<ShardReader<File>>> {
        self.recency.retain(|k| k != key);
        self.readers.remove(key)
    }
}

/// LRU cache of [`ShardReader`]s keyed by canonical path.
///
/// A shard is opened at most once while it stays cached; opening happens
/// under the cache lock. Evicted readers close when the last outstanding
/// `Arc` is dropped.
#[derive(Debug)]
pub struct ShardCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ShardCache {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("shard cache capacity must be at least 1"));
        }
        Ok(Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get_or_open(&self, path: impl AsRef<Path>) -> Result<Arc<ShardReader<File>>> {
        let key = std::fs::canonicalize(path.as_ref())?;
        let mut state = self.lock();
        if let Some(reader) = state.readers.get(&key).cloned() {
            state.touch(&key);
            return Ok(reader);
        }

        let reader = Arc::new(ShardReader::open(&key)?);
        state.readers.insert(key.clone(), Arc::clone(&reader));
        state.recency.push_back(key);
        while state.readers.len() > self.capacity {
            let Some(oldest) = state.recency.pop_front() else {
                break;
            };
            debug!("evicting shard reader {}", oldest.display());
            state.readers.remove(&oldest);
        }
        Ok(reader)
    }

    /// Drop the cached reader for `path`, if any. Returns whether one was cached.
    pub fn invalidate(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.lock().remove(&key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.readers.clear();
        state.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        std::fs::canonicalize(path.as_ref())
            .map(|key| self.lock().readers.contains_key(&key))
            .unwrap_or(false)
    }
}

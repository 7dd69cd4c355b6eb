//! Bounded in-memory cache of fully reconstructed files.
//!
//! Single owner, serialized through its own mutex so that eviction is
//! cooperative with inserts. Recency is tracked with a simple `VecDeque` of
//! keys reordered on access rather than an intrusive linked list — the
//! cache is capped at 5 entries, so a linear scan on access is cheap and
//! keeps the structure easy to reason about.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

#[derive(Clone)]
pub struct CachedFile {
    pub buffer: Vec<u8>,
    pub filename: String,
}

struct Inner {
    entries: HashMap<String, CachedFile>,
    recency: VecDeque<String>,
    total_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
}

impl Inner {
    fn touch(&mut self, file_id: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == file_id) {
            self.recency.remove(pos);
        }
        self.recency.push_back(file_id.to_string());
    }

    fn evict_until_within_bounds(&mut self) {
        while self.entries.len() > self.max_entries || self.total_bytes > self.max_bytes {
            let oldest = match self.recency.pop_front() {
                Some(key) => key,
                None => break,
            };
            if let Some(removed) = self.entries.remove(&oldest) {
                self.total_bytes -= removed.buffer.len();
            }
        }
    }
}

pub struct FileCache {
    inner: Mutex<Inner>,
}

impl FileCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: VecDeque::new(),
                total_bytes: 0,
                max_entries,
                max_bytes,
            }),
        }
    }

    pub async fn get(&self, file_id: &str) -> Option<CachedFile> {
        let mut inner = self.inner.lock().await;
        if inner.entries.contains_key(file_id) {
            inner.touch(file_id);
            inner.entries.get(file_id).cloned()
        } else {
            None
        }
    }

    pub async fn has(&self, file_id: &str) -> bool {
        self.inner.lock().await.entries.contains_key(file_id)
    }

    pub async fn set(&self, file_id: String, file: CachedFile) {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.entries.get(&file_id) {
            inner.total_bytes -= existing.buffer.len();
        }
        inner.total_bytes += file.buffer.len();
        inner.entries.insert(file_id.clone(), file);
        inner.touch(&file_id);
        inner.evict_until_within_bounds();
    }

    pub async fn snapshot(&self) -> Vec<(String, CachedFile)> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Mutex;

use crate::error::Result;

/// Key → blob store. One write per key per run; no locking contract beyond
/// an atomic per-key put.
pub trait Cache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, blob: &[u8]) -> Result<()>;
}

/// Hex MD5 of a URL, the key every cache namespace uses.
pub fn cache_key(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .ok()
            .and_then(|m| m.get(key).cloned()))
    }

    fn put(&self, key: &str, blob: &[u8]) -> Result<()> {
        if let Ok(mut m) = self.entries.lock() {
            m.insert(key.to_string(), blob.to_vec());
        }
        Ok(())
    }
}

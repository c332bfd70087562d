//! Per-image metadata sidecar.
//!
//! Tags are keyed by the MD5 of the *encoded* image bytes, not the path: two
//! pages derived from the same spread carry the same fingerprint and must
//! share tags.

use parking_lot::Mutex;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagSet {
    pub rotated: bool,
    pub black_background: bool,
}

#[derive(Debug, Default)]
pub struct Sidecar {
    tags: Mutex<HashMap<String, TagSet>>,
}

impl Sidecar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(bytes: &[u8]) -> String {
        format!("{:x}", md5::compute(bytes))
    }

    pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
        Ok(Self::fingerprint(&fs::read(path)?))
    }

    pub fn register(&self, fingerprint: String, tags: TagSet) {
        self.tags.lock().insert(fingerprint, tags);
    }

    pub fn get(&self, fingerprint: &str) -> TagSet {
        self.tags
            .lock()
            .get(fingerprint)
            .copied()
            .unwrap_or_default()
    }

    /// Merge the per-worker maps back into the shared sidecar.
    pub fn extend(&self, entries: impl IntoIterator<Item = (String, TagSet)>) {
        self.tags.lock().extend(entries);
    }
}

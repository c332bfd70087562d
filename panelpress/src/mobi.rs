//! MOBI building through Amazon's `kindlegen`.
//!
//! The packager itself is an external tool; this module spawns it, watches
//! its output for the known error markers, and sizes the worker pool from
//! available system memory.

use anyhow::Context;
use sysinfo::System;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

// kindlegen refuses EPUBs at and above 600 MiB
const EPUB_SIZE_LIMIT: u64 = 629_145_600;

pub fn is_kindlegen_available() -> bool {
    Command::new("kindlegen")
        .arg("-locale")
        .arg("en")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .is_ok()
}

/// Worker count from total system memory: small machines get one kindlegen
/// at a time, anything over 4 GiB gets four.
pub fn pool_size() -> usize {
    let mut system = System::new();
    system.refresh_memory();
    let gib = system.total_memory() as f64 / 1_073_741_824.0;
    if gib <= 2.0 {
        1
    } else if gib <= 4.0 {
        2
    } else {
        4
    }
}

/// Convert one EPUB to MOBI in place (`x.epub` -> `x.mobi`), consuming the
/// EPUB on success.
pub fn convert(epub_path: &Path) -> Result<PathBuf> {
    let size = epub_path.metadata().map(|m| m.len()).unwrap_or(0);
    if size >= EPUB_SIZE_LIMIT {
        return Err(Error::worker(format!(
            "EPUB too big for kindlegen: {} bytes",
            size
        )));
    }

    let output = Command::new("kindlegen")
        .arg("-dont_append_source")
        .arg("-locale")
        .arg("en")
        .arg(epub_path)
        .output()
        .map_err(|_| Error::MissingTool("kindlegen"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if line.contains(":E23026:") {
            return Err(Error::worker("kindlegen: EPUB too big"));
        }
        if line.contains("Error(") {
            return Err(Error::worker(format!("kindlegen: {line}")));
        }
    }
    let built = stdout.contains(":I1036:") || output.status.success();
    if !built {
        return Err(Error::worker(format!(
            "kindlegen exited with {:?}",
            output.status.code()
        )));
    }

    let mobi_path = epub_path.with_extension("mobi");
    if !mobi_path.is_file() {
        return Err(Error::worker("kindlegen produced no output file"));
    }
    fs::remove_file(epub_path).context("failed to remove intermediate EPUB")?;
    Ok(mobi_path)
}

/// Convert a batch of EPUBs with a memory-bounded pool. The first failure
/// aborts the batch.
pub fn convert_batch(epubs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size())
        .build()
        .map_err(|e| Error::worker(e))?;
    pool.install(|| {
        epubs
            .par_iter()
            .map(|epub| convert(epub))
            .collect::<Result<Vec<PathBuf>>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_is_bounded() {
        let size = pool_size();
        assert!((1..=4).contains(&size));
    }
}

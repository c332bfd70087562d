//! Working directories under the OS temp area.
//!
//! Every volume lives in a `KCC-` prefixed temp root so that stale trees
//! from crashed runs can be swept on the next start. Disk space is checked
//! against 2.5x the source size before any extraction.

use sysinfo::Disks;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive;
use crate::error::{Error, Result};

pub const TEMP_PREFIX: &str = "KCC-";

/// Remove leftover working directories from previous runs.
pub fn clean_stale_workdirs() {
    let tmp = env::temp_dir();
    let entries = match fs::read_dir(&tmp) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(TEMP_PREFIX) && entry.path().is_dir() {
            let _ = fs::remove_dir_all(entry.path());
        }
    }
}

pub fn directory_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn source_size(source: &Path) -> u64 {
    if source.is_dir() {
        directory_size(source)
    } else {
        source.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

/// Free space on the temp filesystem must cover 2.5x the source size.
pub fn check_disk_space(source: &Path) -> Result<()> {
    let needed = (source_size(source) as f64 * 2.5) as u64;
    let tmp = env::temp_dir();
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| tmp.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());
    if let Some(disk) = disk {
        if disk.available_space() < needed {
            return Err(Error::DiskSpace {
                needed,
                available: disk.available_space(),
            });
        }
    }
    Ok(())
}

/// The destination next to the source (or the explicit output directory)
/// must accept new files.
pub fn check_writable(source: &Path, output: Option<&Path>) -> Result<()> {
    let dir = match output {
        Some(out) if out.is_dir() => out.to_path_buf(),
        Some(out) => out
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        None => source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(&dir)
        .map(|_| ())
        .map_err(|_| Error::TargetNotWritable(dir))
}

fn new_workdir() -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempdir()?
        .keep();
    Ok(dir)
}

/// Extract or copy the source into a fresh working directory. E-book trees
/// receive the `OEBPS/Images` skeleton, the webtoon tool works at the root.
pub fn prepare(source: &Path, ebook: bool) -> Result<PathBuf> {
    check_disk_space(source)?;
    let workdir = new_workdir()?;
    let images_dir = if ebook {
        workdir.join("OEBPS").join("Images")
    } else {
        workdir.clone()
    };
    match archive::extract_to(source, &images_dir) {
        Ok(count) => {
            log::debug!("prepared {count} images under {}", workdir.display());
            Ok(workdir)
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&workdir);
            Err(e)
        }
    }
}

/// Fresh volume root with the `OEBPS/Images` skeleton, for every volume after
/// the first.
pub fn new_volume_root() -> Result<PathBuf> {
    let root = new_workdir()?;
    fs::create_dir_all(root.join("OEBPS").join("Images"))?;
    Ok(root)
}

pub fn images_dir(volume_root: &Path) -> PathBuf {
    volume_root.join("OEBPS").join("Images")
}

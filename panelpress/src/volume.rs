//! Volume splitting: group output pages into tomes under a byte budget.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{BatchSplit, ResolvedConfig};
use crate::error::{Error, Result};
use crate::sanitize::natural_cmp;
use crate::workspace;

/// Uniform depth of image files below `OEBPS/Images`: 1 for a flat tree,
/// 2+ when chapters live in subdirectories. Mixed depths are rejected.
fn tree_depth(images_root: &Path) -> Result<usize> {
    let mut depth: Option<usize> = None;
    for entry in walkdir::WalkDir::new(images_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !crate::archive::is_image_name(&name) {
            continue;
        }
        let level = entry
            .path()
            .strip_prefix(images_root)
            .map(|rel| rel.components().count())
            .unwrap_or(0);
        match depth {
            None => depth = Some(level),
            Some(d) if d != level => return Err(Error::MixedDepth),
            _ => {}
        }
    }
    depth.ok_or(Error::EmptySource)
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .filter(|e| {
            e.file_type()
                .map(|t| t.is_dir() == want_dirs)
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    entries.sort_by(|a, b| {
        natural_cmp(
            &a.file_name().unwrap_or_default().to_string_lossy(),
            &b.file_name().unwrap_or_default().to_string_lossy(),
        )
    });
    Ok(entries)
}

fn entry_size(path: &Path) -> u64 {
    if path.is_dir() {
        workspace::directory_size(path)
    } else {
        path.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

fn move_into(entry: &Path, volume_root: &Path) -> Result<()> {
    let target = workspace::images_dir(volume_root).join(
        entry
            .file_name()
            .ok_or_else(|| Error::UnsupportedSource(entry.to_path_buf()))?,
    );
    fs::rename(entry, target)?;
    Ok(())
}

/// Split the working tree into volume roots. The returned list starts with
/// the original root; later volumes are fresh working directories the
/// overflowing entries were moved into.
pub fn split(volume_root: &Path, cfg: &ResolvedConfig) -> Result<Vec<PathBuf>> {
    if cfg.opts.batch_split == BatchSplit::Off {
        return Ok(vec![volume_root.to_path_buf()]);
    }

    let images_root = workspace::images_dir(volume_root);
    let depth = tree_depth(&images_root)?;

    // every-subdirectory mode only applies to a one-level chapter tree;
    // deeper trees fall into it by construction
    let per_directory =
        depth >= 3 || (depth == 2 && cfg.opts.batch_split == BatchSplit::PerDirectory);

    let mut volumes = vec![volume_root.to_path_buf()];
    if per_directory {
        let dirs = sorted_entries(&images_root, true)?;
        for dir in dirs.iter().skip(1) {
            let fresh = workspace::new_volume_root()?;
            move_into(dir, &fresh)?;
            volumes.push(fresh);
        }
        return Ok(volumes);
    }

    let target = cfg.target_bytes();
    let entries = sorted_entries(&images_root, depth == 2)?;
    let mut current_root: Option<PathBuf> = None; // None = original volume
    let mut current_size = 0u64;
    for entry in entries {
        let size = entry_size(&entry);
        if current_size + size > target {
            let fresh = workspace::new_volume_root()?;
            volumes.push(fresh.clone());
            current_root = Some(fresh);
            current_size = size;
        } else {
            current_size += size;
        }
        if let Some(root) = &current_root {
            move_into(&entry, root)?;
        }
    }
    Ok(volumes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::profile::Preset;

    fn resolved(batch: BatchSplit, target_mib: u64) -> ResolvedConfig {
        Config {
            profile: Preset::KoC,
            batch_split: batch,
            target_size: Some(target_mib),
            ..Config::default()
        }
        .resolve()
        .unwrap()
    }

    fn flat_tree(pages: usize, page_bytes: usize) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let images = workspace::images_dir(tmp.path());
        fs::create_dir_all(&images).unwrap();
        for i in 0..pages {
            fs::write(images.join(format!("p{:03}.jpg", i)), vec![0u8; page_bytes]).unwrap();
        }
        tmp
    }

    #[test]
    fn no_split_returns_single_volume() {
        let tmp = flat_tree(4, 10);
        let cfg = resolved(BatchSplit::Off, 1);
        let volumes = split(tmp.path(), &cfg).unwrap();
        assert_eq!(volumes.len(), 1);
    }

    #[test]
    fn auto_split_respects_byte_budget() {
        // 8 pages x 300 KiB with a 1 MiB budget: 3 pages per volume
        let tmp = flat_tree(8, 300 * 1024);
        let cfg = resolved(BatchSplit::Auto, 1);
        let volumes = split(tmp.path(), &cfg).unwrap();
        assert_eq!(volumes.len(), 3);
        for volume in &volumes {
            let size = workspace::directory_size(volume);
            assert!(size <= 1024 * 1024, "volume {volume:?} is {size} bytes");
        }
        // reading order is preserved across volumes
        let first: Vec<String> = crate::sanitize::sorted_files_by_dir(&workspace::images_dir(
            &volumes[0],
        ))
        .into_iter()
        .flat_map(|(_, files)| files)
        .collect();
        assert_eq!(first, vec!["p000.jpg", "p001.jpg", "p002.jpg"]);
        for volume in &volumes[1..] {
            let _ = fs::remove_dir_all(volume);
        }
    }

    #[test]
    fn per_directory_split_keeps_first_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let images = workspace::images_dir(tmp.path());
        for chapter in ["ch1", "ch2", "ch3"] {
            fs::create_dir_all(images.join(chapter)).unwrap();
            fs::write(images.join(chapter).join("p1.jpg"), b"data").unwrap();
        }
        let cfg = resolved(BatchSplit::PerDirectory, 400);
        let volumes = split(tmp.path(), &cfg).unwrap();
        assert_eq!(volumes.len(), 3);
        assert!(images.join("ch1/p1.jpg").exists());
        assert!(!images.join("ch2").exists());
        assert!(workspace::images_dir(&volumes[1]).join("ch2/p1.jpg").exists());
        for volume in &volumes[1..] {
            let _ = fs::remove_dir_all(volume);
        }
    }

    #[test]
    fn mixed_depth_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let images = workspace::images_dir(tmp.path());
        fs::create_dir_all(images.join("ch1")).unwrap();
        fs::write(images.join("loose.jpg"), b"data").unwrap();
        fs::write(images.join("ch1/p1.jpg"), b"data").unwrap();
        let cfg = resolved(BatchSplit::Auto, 400);
        assert!(matches!(split(tmp.path(), &cfg), Err(Error::MixedDepth)));
    }
}

//! CBZ output: the processed image tree, zipped.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ResolvedConfig;
use crate::epub::zip_tree;
use crate::error::Result;
use crate::workspace;

/// Package one volume's `OEBPS/Images` tree as a CBZ archive; returns the
/// produced zip path. A `ComicInfo.xml` kept by the copy option rides along
/// at the archive root.
pub fn build(volume_root: &Path, cfg: &ResolvedConfig) -> Result<PathBuf> {
    let images_root = workspace::images_dir(volume_root);
    if cfg.opts.copy_comic_info {
        let comic_info = images_root.join("ComicInfo.xml");
        if !comic_info.exists() {
            log::debug!("no ComicInfo.xml to copy for {}", volume_root.display());
        }
    } else if images_root.join("ComicInfo.xml").exists() {
        fs::remove_file(images_root.join("ComicInfo.xml"))?;
    }

    let zip_path = volume_root.with_file_name(format!(
        "{}_comic.zip",
        volume_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "volume".to_string())
    ));
    zip_tree(&zip_path, &images_root, false)?;
    Ok(zip_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OutputFormat};
    use crate::profile::Preset;

    #[test]
    fn cbz_contains_images_without_mimetype() {
        let tmp = tempfile::tempdir().unwrap();
        let volume = tmp.path().join("vol");
        let images = workspace::images_dir(&volume);
        fs::create_dir_all(images.join("ch1")).unwrap();
        fs::write(images.join("ch1/p1.jpg"), b"img").unwrap();

        let cfg = Config {
            profile: Preset::KDX,
            format: OutputFormat::Cbz,
            ..Config::default()
        }
        .resolve()
        .unwrap();
        let zip_path = build(&volume, &cfg).unwrap();

        let file = fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 1);
        let entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "ch1/p1.jpg");
    }
}

//! Source ingestion: comic archives and directory trees become a working
//! directory of raw page images.
//!
//! ZIP and RAR containers are read natively, 7z containers go through the
//! `7z` executable, and PDFs are mined for their embedded JPEG streams.

use anyhow::Context;
use unrar::Archive;
use zip::ZipArchive;

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Zip,
    Rar,
    SevenZip,
    Pdf,
    Directory,
}

impl SourceKind {
    pub fn detect(path: &Path) -> Option<SourceKind> {
        if path.is_dir() {
            return Some(SourceKind::Directory);
        }
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "cbz" | "zip" => Some(SourceKind::Zip),
            "cbr" | "rar" => Some(SourceKind::Rar),
            "cb7" | "7z" => Some(SourceKind::SevenZip),
            "pdf" => Some(SourceKind::Pdf),
            _ => None,
        }
    }

    /// Does this container need the external `7z` binary?
    pub fn needs_7z(self) -> bool {
        self == SourceKind::SevenZip
    }
}

/// Extensions accepted as page images.
pub fn is_image_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
        && !lower.starts_with('.')
}

fn should_skip(name: &str) -> bool {
    name.starts_with('.')
        || name.contains("__MACOSX")
        || name.contains("thumbs.db")
        || name.contains(".DS_Store")
}

fn keep_entry(rel: &Path) -> bool {
    let name = match rel.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    if rel.iter().any(|part| should_skip(&part.to_string_lossy())) {
        return false;
    }
    is_image_name(name) || name == "ComicInfo.xml"
}

/// Extract `source` into `dest`, preserving relative paths. Returns the
/// number of page images written.
pub fn extract_to(source: &Path, dest: &Path) -> Result<usize> {
    let kind =
        SourceKind::detect(source).ok_or_else(|| Error::UnsupportedSource(source.to_path_buf()))?;
    fs::create_dir_all(dest)?;
    let count = match kind {
        SourceKind::Zip => extract_zip(source, dest)?,
        SourceKind::Rar => extract_rar(source, dest)?,
        SourceKind::SevenZip => extract_7z(source, dest)?,
        SourceKind::Pdf => extract_pdf_jpegs(source, dest)?,
        SourceKind::Directory => copy_tree(source, dest)?,
    };
    if count == 0 {
        return Err(Error::NothingExtracted(source.to_path_buf()));
    }
    Ok(count)
}

fn write_entry(dest: &Path, rel: &Path, data: &[u8]) -> Result<()> {
    let out = dest.join(rel);
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(out, data)?;
    Ok(())
}

fn extract_zip(source: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(source).context("failed to open zip file")?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).context("failed to parse file as zip archive")?;

    let mut count = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let rel = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };
        if !keep_entry(&rel) {
            continue;
        }
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        write_entry(dest, &rel, &data)?;
        count += 1;
    }
    Ok(count)
}

fn extract_rar(source: &Path, dest: &Path) -> Result<usize> {
    let mut archive = Archive::new(source)
        .open_for_processing()
        .context("failed to open RAR file")?;

    let mut count = 0;
    while let Some(header) = archive.read_header().context("failed to read RAR header")? {
        let entry = header.entry();
        let rel = PathBuf::from(&entry.filename);
        if entry.is_directory() || !keep_entry(&rel) {
            archive = header.skip().context("failed to skip RAR entry")?;
            continue;
        }
        let (data, next) = header.read().context("failed to read RAR entry")?;
        write_entry(dest, &rel, &data)?;
        count += 1;
        archive = next;
    }
    Ok(count)
}

pub fn is_7z_available() -> bool {
    Command::new("7z").arg("i").output().is_ok()
}

fn extract_7z(source: &Path, dest: &Path) -> Result<usize> {
    let status = Command::new("7z")
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", dest.display()))
        .arg(source)
        .output()
        .map_err(|_| Error::MissingTool("7z"))?;
    if !status.status.success() {
        return Err(Error::NothingExtracted(source.to_path_buf()));
    }
    // Drop anything that is not a page image or metadata sidecar
    let mut count = 0;
    for entry in walkdir::WalkDir::new(dest)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry.path().strip_prefix(dest).unwrap_or(entry.path());
        if keep_entry(rel) {
            count += 1;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(count)
}

/// Pull the raw JPEG streams out of a PDF by scanning for SOI/EOI marker
/// pairs. Good enough for scan-based comic PDFs, which embed each page as a
/// single baseline JPEG.
fn extract_pdf_jpegs(source: &Path, dest: &Path) -> Result<usize> {
    let data = fs::read(source)?;
    let mut count = 0;
    let mut offset = 0;
    while let Some(start) = find_marker(&data[offset..], &[0xff, 0xd8, 0xff]) {
        let start = offset + start;
        match find_marker(&data[start..], &[0xff, 0xd9]) {
            Some(end) => {
                let end = start + end + 2;
                let name = format!("pdf-{:04}.jpg", count + 1);
                write_entry(dest, Path::new(&name), &data[start..end])?;
                count += 1;
                offset = end;
            }
            None => break,
        }
    }
    Ok(count)
}

fn find_marker(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn copy_tree(source: &Path, dest: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in walkdir::WalkDir::new(source)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(source)
            .expect("walked path is below its root");
        if !keep_entry(rel) {
            continue;
        }
        let out = dest.join(rel);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), out)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn detects_source_kinds() {
        assert_eq!(
            SourceKind::detect(Path::new("a/b.CBZ")),
            Some(SourceKind::Zip)
        );
        assert_eq!(
            SourceKind::detect(Path::new("b.cbr")),
            Some(SourceKind::Rar)
        );
        assert_eq!(SourceKind::detect(Path::new("c.pdf")), Some(SourceKind::Pdf));
        assert_eq!(SourceKind::detect(Path::new("d.txt")), None);
    }

    #[test]
    fn zip_extraction_filters_junk() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("test.cbz");
        let mut zip = zip::ZipWriter::new(File::create(&archive_path).unwrap());
        let options = SimpleFileOptions::default();
        for name in [
            "ch1/page1.jpg",
            "ch1/.hidden.jpg",
            "__MACOSX/ch1/page1.jpg",
            "notes.txt",
            "ComicInfo.xml",
        ] {
            zip.start_file(name, options).unwrap();
            zip.write_all(b"data").unwrap();
        }
        zip.finish().unwrap();

        let dest = tmp.path().join("out");
        let count = extract_to(&archive_path, &dest).unwrap();
        assert_eq!(count, 1);
        assert!(dest.join("ch1/page1.jpg").exists());
        assert!(dest.join("ComicInfo.xml").exists());
        assert!(!dest.join("notes.txt").exists());
        assert!(!dest.join("__MACOSX").exists());
    }

    #[test]
    fn pdf_jpeg_scan_finds_streams() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = tmp.path().join("scan.pdf");
        let mut data = b"%PDF-1.4 junk ".to_vec();
        data.extend_from_slice(&[0xff, 0xd8, 0xff, 0xe0, 1, 2, 3, 0xff, 0xd9]);
        data.extend_from_slice(b" more junk ");
        data.extend_from_slice(&[0xff, 0xd8, 0xff, 0xdb, 9, 9, 0xff, 0xd9]);
        fs::write(&pdf, data).unwrap();

        let dest = tmp.path().join("out");
        assert_eq!(extract_to(&pdf, &dest).unwrap(), 2);
        assert!(dest.join("pdf-0001.jpg").exists());
        assert!(dest.join("pdf-0002.jpg").exists());
    }

    #[test]
    fn empty_pdf_is_an_input_error() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = tmp.path().join("text.pdf");
        fs::write(&pdf, b"%PDF-1.4 no images here").unwrap();
        assert!(matches!(
            extract_to(&pdf, &tmp.path().join("out")),
            Err(Error::NothingExtracted(_))
        ));
    }
}

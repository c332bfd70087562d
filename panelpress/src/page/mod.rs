//! Page parsing and the parallel transform stage.
//!
//! The parser decides, per source image, whether to split, rotate, duplicate
//! or pass through. Each decision becomes a [`Page`] record; the transform
//! workers materialize, process and encode the records independently.

pub mod encode;
pub mod transform;

use arrayvec::ArrayVec;
use imageproc::image::{DynamicImage, GenericImageView, Rgb};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::config::ResolvedConfig;
use crate::error::{Error, Result};
use crate::sidecar::{Sidecar, TagSet};

use encode::Encoding;
use transform::Background;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVariant {
    Single,
    LeftHalf,
    RightHalf,
    DuplicateA,
    DuplicateB,
    DuplicateC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    Normal,
    RotatedSpread,
    Continuation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub variant: PageVariant,
    pub role: PageRole,
}

impl Page {
    fn new(variant: PageVariant, role: PageRole) -> Self {
        Page { variant, role }
    }

    /// Filename suffix. The stringly `-kcc` suffixes are the on-disk wire
    /// format (already-processed detection keys on them); the variant enum is
    /// the in-memory truth and converts only here.
    pub fn suffix(&self, manga_style: bool) -> &'static str {
        match self.variant {
            PageVariant::Single => "-kcc",
            PageVariant::LeftHalf => {
                if manga_style {
                    "-kcc-b"
                } else {
                    "-kcc-a"
                }
            }
            PageVariant::RightHalf => {
                if manga_style {
                    "-kcc-a"
                } else {
                    "-kcc-b"
                }
            }
            PageVariant::DuplicateA => "-kcc-a",
            PageVariant::DuplicateB => "-kcc-b",
            PageVariant::DuplicateC => "-kcc-c",
        }
    }
}

/// Decide the output pages for a source image of the given dimensions.
/// Returns 1-3 records in reading order.
pub fn parse(width: u32, height: u32, cfg: &ResolvedConfig) -> ArrayVec<Page, 3> {
    use crate::config::SplitStrategy;

    let mut pages = ArrayVec::new();
    let double_page = width > height;
    if !double_page || cfg.opts.webtoon {
        pages.push(Page::new(PageVariant::Single, PageRole::Normal));
        return pages;
    }

    match cfg.opts.splitter {
        SplitStrategy::Split => {
            let (first, second) = if cfg.opts.manga_style {
                (PageVariant::RightHalf, PageVariant::LeftHalf)
            } else {
                (PageVariant::LeftHalf, PageVariant::RightHalf)
            };
            pages.push(Page::new(first, PageRole::Normal));
            pages.push(Page::new(second, PageRole::Continuation));
        }
        SplitStrategy::Rotate => {
            pages.push(Page::new(PageVariant::Single, PageRole::RotatedSpread));
        }
        SplitStrategy::RotateAndSplit => {
            pages.push(Page::new(PageVariant::DuplicateA, PageRole::RotatedSpread));
            pages.push(Page::new(PageVariant::DuplicateB, PageRole::Normal));
            pages.push(Page::new(PageVariant::DuplicateC, PageRole::Continuation));
        }
    }
    pages
}

/// Cut or rotate the source image into the view a page record describes.
fn materialize(img: &DynamicImage, page: Page, manga_style: bool) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let half = |left: bool| {
        if left {
            img.crop_imm(0, 0, w / 2, h)
        } else {
            img.crop_imm(w / 2, 0, w - w / 2, h)
        }
    };
    match page.variant {
        PageVariant::LeftHalf => half(true),
        PageVariant::RightHalf => half(false),
        PageVariant::DuplicateB => half(!manga_style),
        PageVariant::DuplicateC => half(manga_style),
        PageVariant::Single | PageVariant::DuplicateA => {
            if page.role == PageRole::RotatedSpread {
                if manga_style {
                    img.rotate90()
                } else {
                    img.rotate270()
                }
            } else {
                img.clone()
            }
        }
    }
}

/// One saved output page: fingerprint and tags for the sidecar, the original
/// source to delete after the batch, and the saved path.
#[derive(Debug, Clone)]
pub struct PageOutput {
    pub fingerprint: String,
    pub tags: TagSet,
    pub source: PathBuf,
    pub saved: PathBuf,
}

/// Process one source image into its 1-3 output files.
pub fn process_file(dir: &Path, name: &str, cfg: &ResolvedConfig) -> Result<Vec<PageOutput>> {
    let source = dir.join(name);
    let decoded = imageproc::image::open(&source)?;
    let decoded = if cfg.opts.force_color {
        decoded
    } else {
        DynamicImage::ImageLuma8(decoded.to_luma8())
    };

    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let pages = parse(decoded.width(), decoded.height(), cfg);

    let mut outputs = Vec::with_capacity(pages.len());
    for page in pages {
        let view = materialize(&decoded, page, cfg.opts.manga_style);

        // border fill: explicit option wins, then corner sampling on the
        // uncropped view
        let background = transform::sample_background(&view.to_luma8());
        let fill = match cfg.opts.border_color {
            Some(color) => Rgb(color.0),
            None => {
                let v = background.luma();
                Rgb([v, v, v])
            }
        };
        let black_background = match cfg.opts.border_color {
            Some(color) => color.luma() < 128,
            None => background == Background::Black,
        };

        let view = transform::crop(view, &cfg.opts);
        let view = transform::auto_contrast(view, cfg.opts.gamma);
        let view = transform::resize_to_target(view, cfg.target_resolution(), &cfg.opts, fill);

        let view = match cfg.profile.palette.levels() {
            Some(levels) if !cfg.opts.force_color => transform::quantize(view, levels),
            _ => view,
        };

        let encoding = if cfg.opts.force_png {
            Encoding::Png
        } else {
            Encoding::Jpeg
        };
        let bytes = encode::encode(&view, encoding, cfg.opts.mozjpeg)?;

        let out_name = format!(
            "{}{}.{}",
            stem,
            page.suffix(cfg.opts.manga_style),
            encoding.extension()
        );
        let saved = dir.join(out_name);
        fs::write(&saved, &bytes)?;

        outputs.push(PageOutput {
            fingerprint: Sidecar::fingerprint(&bytes),
            tags: TagSet {
                rotated: page.role == PageRole::RotatedSpread,
                black_background,
            },
            source: source.clone(),
            saved,
        });
    }
    Ok(outputs)
}

/// Run the transform workers over every image below `images_root`. Workers
/// receive the options record by value-semantics clone and return either
/// their outputs or a serialized error; the first error wins and the caller
/// tears the working tree down.
pub fn process_directory(
    images_root: &Path,
    cfg: &ResolvedConfig,
    sidecar: &Sidecar,
    cancel: &CancelToken,
) -> Result<usize> {
    let mut work = Vec::new();
    for entry in walkdir::WalkDir::new(images_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if crate::archive::is_image_name(&name) {
            let dir = entry
                .path()
                .parent()
                .unwrap_or(images_root)
                .to_path_buf();
            work.push((dir, name));
        }
    }
    if work.is_empty() {
        return Err(Error::EmptySource);
    }

    log::info!("processing {} images", work.len());
    let results: Result<Vec<Vec<PageOutput>>> = work
        .into_par_iter()
        .map(|(dir, name)| {
            cancel.check()?;
            let task = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                process_file(&dir, &name, cfg)
            }));
            match task {
                Ok(result) => result.map_err(|e| Error::worker(format!("{name}: {e:#}"))),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(Error::worker(format!("{name}: {message}")))
                }
            }
        })
        .collect();

    let outputs: Vec<PageOutput> = results?.into_iter().flatten().collect();
    cancel.check()?;

    let count = outputs.len();
    let mut old_sources = Vec::new();
    for output in outputs {
        sidecar.register(output.fingerprint, output.tags);
        old_sources.push(output.source);
    }
    old_sources.sort();
    old_sources.dedup();
    for old in old_sources {
        if old.is_file() {
            fs::remove_file(&old)?;
        }
    }
    Ok(count)
}

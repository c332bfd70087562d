//! Webtoon processing: merge vertical strips, segment them into panels, and
//! re-pack the panels into device-height pages.

use imageproc::image::{imageops, DynamicImage, GenericImageView, GrayImage, RgbImage};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use walkdir::WalkDir;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::is_image_name;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::sanitize::natural_cmp;

// Total merged height above this is silently rejected
const MAX_MERGED_HEIGHT: u32 = 131_072;
// Vertical scan step and band height
const SCAN_STEP: u32 = 5;
const BAND_HEIGHT: u32 = 4;
// Horizontal margin skipped on both sides to avoid edge noise
const SCAN_MARGIN: u32 = 4;
// Binarization cutoff for solid-band detection
const SOLID_THRESHOLD: u8 = 128;
// Pages shorter than this are dropped
const MIN_PAGE_HEIGHT: u32 = 15;

#[derive(Debug, Clone, Copy)]
pub struct WebtoonOptions {
    pub target_height: u32,
    pub merge: bool,
    pub debug: bool,
}

/// Panel bounds in strip coordinates. `height` is the packing height, which
/// for equal-division segments may differ from `y1 - y0` by rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Panel {
    y0: u32,
    y1: u32,
    height: u32,
}

impl Panel {
    fn new(y0: u32, y1: u32) -> Panel {
        Panel {
            y0,
            y1,
            height: y1 - y0,
        }
    }
}

fn images_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| is_image_name(&n.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();
    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    files
}

/// Merge every image directly inside `dir` into one tall strip. The target
/// width is the most common source width; narrower and wider images are
/// resampled to it. Oversized results are rejected and the inputs left
/// untouched.
pub fn merge_directory(dir: &Path) -> Result<()> {
    let files = images_in(dir);
    if files.is_empty() {
        return Ok(());
    }

    let mut sizes = Vec::with_capacity(files.len());
    for file in &files {
        let (w, h) = imageproc::image::image_dimensions(file)?;
        sizes.push((w, h));
    }

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for (w, _) in &sizes {
        *counts.entry(*w).or_default() += 1;
    }
    let target_width = counts
        .iter()
        .map(|(&width, &count)| (count, width))
        .max()
        .map(|(_, width)| width)
        .expect("files is non-empty");

    let scaled_heights: Vec<u32> = sizes
        .iter()
        .map(|&(w, h)| {
            if w == target_width {
                h
            } else {
                ((h as f64 * target_width as f64 / w as f64) as u32).max(1)
            }
        })
        .collect();
    let total_height: u32 = scaled_heights.iter().sum();
    if total_height > MAX_MERGED_HEIGHT {
        log::warn!(
            "skipping merge of {}: {total_height}px exceeds the height bound",
            dir.display()
        );
        return Ok(());
    }

    let mut strip = RgbImage::new(target_width, total_height);
    let mut y = 0i64;
    for (file, scaled_height) in files.iter().zip(&scaled_heights) {
        let img = imageproc::image::open(file)?.to_rgb8();
        let img = if img.width() == target_width {
            img
        } else {
            imageops::resize(
                &img,
                target_width,
                *scaled_height,
                imageops::FilterType::CatmullRom,
            )
        };
        imageops::overlay(&mut strip, &img, 0, y);
        y += img.height() as i64;
        fs::remove_file(file)?;
    }

    let out = files[0].with_extension("png");
    DynamicImage::ImageRgb8(strip).save(&out)?;
    Ok(())
}

fn binarize(gray: &GrayImage) -> GrayImage {
    let mut mask = gray.clone();
    for pixel in mask.pixels_mut() {
        pixel.0[0] = if pixel.0[0] >= SOLID_THRESHOLD { 255 } else { 0 };
    }
    mask
}

/// A band is solid when its binary version is uniform background.
fn band_is_solid(mask: &GrayImage, y: u32) -> bool {
    let (w, h) = mask.dimensions();
    let x1 = w.saturating_sub(SCAN_MARGIN);
    let y1 = (y + BAND_HEIGHT).min(h);
    let mut first = None;
    for row in y..y1 {
        for x in SCAN_MARGIN..x1 {
            let value = mask.get_pixel(x, row).0[0];
            match first {
                None => first = Some(value),
                Some(f) if f != value => return false,
                _ => {}
            }
        }
    }
    true
}

/// Scan the strip in 5-px bands and return the detected panels.
fn find_panels(mask: &GrayImage) -> Vec<Panel> {
    let height = mask.height();
    let mut panels = Vec::new();
    let mut open: Option<u32> = None;
    let mut y = 0;
    while y < height {
        let solid = band_is_solid(mask, y);
        if !solid && open.is_none() {
            open = Some(y.saturating_sub(2));
        }
        if height - y <= SCAN_STEP {
            if !solid {
                if let Some(y0) = open.take() {
                    panels.push(Panel::new(y0, height));
                }
            }
        }
        if solid {
            if let Some(y0) = open.take() {
                panels.push(Panel::new(y0, (y + 6).min(height)));
            }
        }
        y += SCAN_STEP;
    }
    panels
}

/// Split panels that are taller than the page: up to 2x the target they
/// become two overlapping target-height halves, beyond that they are divided
/// into equal segments.
fn divide_panels(panels: Vec<Panel>, target: u32) -> Vec<Panel> {
    let mut out = Vec::with_capacity(panels.len());
    for panel in panels {
        let height = panel.height;
        if height as f64 <= target as f64 * 1.5 {
            out.push(panel);
        } else if height < target * 2 {
            let diff = height - target;
            out.push(Panel {
                y0: panel.y0,
                y1: panel.y1 - diff,
                height: target,
            });
            out.push(Panel {
                y0: panel.y1 - target,
                y1: panel.y1,
                height: target,
            });
        } else {
            let parts = ((height as f64 / target as f64).round() as u32).max(2);
            let diff = height / parts;
            for i in 0..parts {
                out.push(Panel {
                    y0: panel.y0 + i * diff,
                    y1: panel.y1 - (parts - i - 1) * diff,
                    height: diff,
                });
            }
        }
    }
    out
}

/// Greedily pack whole panels into virtual pages of the target height.
fn pack_pages(panels: &[Panel], target: u32) -> Vec<Vec<usize>> {
    let mut pages = Vec::new();
    let mut current = Vec::new();
    let mut left = target as i64;
    for (index, panel) in panels.iter().enumerate() {
        if left - panel.height as i64 > 0 {
            left -= panel.height as i64;
            current.push(index);
        } else {
            if !current.is_empty() {
                pages.push(std::mem::take(&mut current));
            }
            left = target as i64 - panel.height as i64;
            current.push(index);
        }
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

/// Segment one tall strip into `<stem>-<n>.png` pages and remove the strip.
/// Strips no taller than the target are left as they are.
pub fn split_strip(path: &Path, opts: &WebtoonOptions) -> Result<()> {
    let img = imageproc::image::open(path)?;
    let (width, height) = (img.width(), img.height());
    if height <= opts.target_height {
        return Ok(());
    }

    let rgb = img.to_rgb8();
    let mask = binarize(&img.to_luma8());
    let panels = divide_panels(find_panels(&mask), opts.target_height);
    let pages = pack_pages(&panels, opts.target_height);

    if opts.debug {
        save_debug_overlay(path, &rgb, &panels)?;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = path.parent().unwrap_or(Path::new("."));

    let mut page_number = 1;
    for page in pages {
        let page_height: u32 = page.iter().map(|&i| panels[i].height).sum();
        if page_height <= MIN_PAGE_HEIGHT {
            continue;
        }
        let mut canvas = RgbImage::new(width, page_height);
        let mut y = 0i64;
        for &index in &page {
            let panel = &panels[index];
            let slice =
                imageops::crop_imm(&rgb, 0, panel.y0, width, panel.y1 - panel.y0).to_image();
            // pastes are clipped at the canvas edge; overlapping segments
            // advance by their packing height, not their slice height
            imageops::overlay(&mut canvas, &slice, 0, y);
            y += panel.height as i64;
        }
        let out = dir.join(format!("{stem}-{page_number}.png"));
        DynamicImage::ImageRgb8(canvas).save(&out)?;
        page_number += 1;
    }

    fs::remove_file(path)?;
    Ok(())
}

fn save_debug_overlay(path: &Path, rgb: &RgbImage, panels: &[Panel]) -> Result<()> {
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;

    let mut overlay = rgb.clone();
    for panel in panels {
        draw_hollow_rect_mut(
            &mut overlay,
            Rect::at(0, panel.y0 as i32).of_size(rgb.width(), panel.y1 - panel.y0),
            imageproc::image::Rgb([0, 255, 0]),
        );
    }
    let debug_path = path.with_file_name(format!(
        "{}-debug.png",
        path.file_stem().unwrap_or_default().to_string_lossy()
    ));
    DynamicImage::ImageRgb8(overlay).save(debug_path)?;
    Ok(())
}

/// Full webtoon pass over a working tree: optional per-directory merge, then
/// parallel strip splitting. Non-image files are dropped on the way.
pub fn process_tree(root: &Path, opts: &WebtoonOptions, cancel: &CancelToken) -> Result<()> {
    if opts.merge {
        let mut dirs: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.path().to_path_buf())
            .collect();
        dirs.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));

        dirs.into_par_iter()
            .map(|dir| {
                cancel.check()?;
                merge_directory(&dir).map_err(|e| Error::worker(format!("{}: {e:#}", dir.display())))
            })
            .collect::<Result<Vec<()>>>()?;
    }
    cancel.check()?;

    let mut strips = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_image_name(&name) {
            strips.push(entry.path().to_path_buf());
        } else if name != "ComicInfo.xml" {
            fs::remove_file(entry.path())?;
        }
    }

    strips
        .into_par_iter()
        .map(|strip| {
            cancel.check()?;
            split_strip(&strip, opts)
                .map_err(|e| Error::worker(format!("{}: {e:#}", strip.display())))
        })
        .collect::<Result<Vec<()>>>()?;
    Ok(())
}

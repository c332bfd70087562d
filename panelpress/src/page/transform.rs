//! Image transformations: cropping, auto-contrast, gamma, resizing and
//! palette quantization.

use fast_image_resize as fr;
use fr::images::Image as FrImage;
use fr::images::ImageRef as FrImageRef;
use imageproc::contrast::otsu_level;
use imageproc::image::{imageops, DynamicImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage};

use crate::config::{Config, Cropping};

// Rounding cutoff between "near-black" and "near-white" when sampling corners
const BLACK_WHITE_CUTOFF: u8 = 128;
// Histogram share ignored at each end by auto-contrast
const CONTRAST_CUTOFF: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    White,
    Black,
}

impl Background {
    pub fn luma(self) -> u8 {
        match self {
            Background::White => 255,
            Background::Black => 0,
        }
    }
}

/// Majority vote over the four corner pixels, each rounded to near-black or
/// near-white. Ties break to white.
pub fn sample_background(gray: &GrayImage) -> Background {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Background::White;
    }
    let corners = [
        gray.get_pixel(0, 0),
        gray.get_pixel(w - 1, 0),
        gray.get_pixel(0, h - 1),
        gray.get_pixel(w - 1, h - 1),
    ];
    let black_votes = corners
        .iter()
        .filter(|p| p.0[0] < BLACK_WHITE_CUTOFF)
        .count();
    if black_votes > 2 {
        Background::Black
    } else {
        Background::White
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    fn full(w: u32, h: u32) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: w,
            height: h,
        }
    }

    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

fn is_content(pixel: u8, threshold: u8, background: Background) -> bool {
    match background {
        Background::White => pixel < threshold,
        Background::Black => pixel > threshold,
    }
}

/// Tightest bounding box of non-background content under an Otsu threshold.
fn content_bbox(gray: &GrayImage, threshold: u8, background: Background) -> Option<Rect> {
    let (w, h) = gray.dimensions();
    let mut min_x = w;
    let mut max_x = 0;
    let mut min_y = h;
    let mut max_y = 0;
    let mut found = false;
    for (x, y, pixel) in gray.enumerate_pixels() {
        if is_content(pixel.0[0], threshold, background) {
            found = true;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }
    if !found {
        return None;
    }
    Some(Rect {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

/// Margin crop. `power` is the fraction of each detected margin to trim
/// (1.0 removes it entirely); `minimum` floors the retained area as a
/// fraction of the original.
pub fn margin_crop(gray: &GrayImage, power: f32, minimum: f32) -> Rect {
    let (w, h) = gray.dimensions();
    let full = Rect::full(w, h);
    if w < 3 || h < 3 || power <= 0.0 {
        return full;
    }
    let background = sample_background(gray);
    let threshold = otsu_level(gray);
    let bbox = match content_bbox(gray, threshold, background) {
        Some(b) => b,
        None => return full,
    };

    let left = bbox.x;
    let top = bbox.y;
    let right = w - (bbox.x + bbox.width);
    let bottom = h - (bbox.y + bbox.height);
    // power > 1 may eat into the bbox, never past the midline
    let trim = |margin: u32, limit: u32, scale: f32| -> u32 {
        ((margin as f32 * power * scale) as u32).min(limit)
    };
    let candidate = |scale: f32| -> Rect {
        let x0 = trim(left, w / 2 - 1, scale);
        let x1 = w - trim(right, w / 2 - 1, scale);
        let y0 = trim(top, h / 2 - 1, scale);
        let y1 = h - trim(bottom, h / 2 - 1, scale);
        Rect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    };

    let min_area = (w as u64 * h as u64) as f32 * minimum.clamp(0.0, 1.0);
    // Scale the trim back until the retained area stays above the floor
    let mut scale = 1.0f32;
    for _ in 0..=20 {
        let rect = candidate(scale);
        if rect.area() as f32 >= min_area || scale <= 0.0 {
            return rect;
        }
        scale -= 0.05;
    }
    full
}

/// Page-number removal: a short run of content rows hugging the top or
/// bottom edge, separated from the body by solid rows and spanning a
/// narrow fraction of the width, is treated as a page number and cropped
/// away together with its gap.
pub fn page_number_crop(gray: &GrayImage) -> Rect {
    let (w, h) = gray.dimensions();
    let mut rect = Rect::full(w, h);
    if w < 8 || h < 40 {
        return rect;
    }
    let background = sample_background(gray);
    let threshold = otsu_level(gray);
    let max_block = (h / 20).max(1);
    let min_gap = 3u32;

    let row_span = |y: u32| -> Option<(u32, u32)> {
        let mut first = None;
        let mut last = 0;
        for x in 0..w {
            if is_content(gray.get_pixel(x, y).0[0], threshold, background) {
                first.get_or_insert(x);
                last = x;
            }
        }
        first.map(|f| (f, last))
    };

    // Bottom edge
    if let Some(cut) = edge_block(h, max_block, min_gap, |offset| row_span(h - 1 - offset), w) {
        rect.height -= cut;
    }
    // Top edge
    if let Some(cut) = edge_block(h, max_block, min_gap, row_span, w) {
        rect.y += cut;
        rect.height -= cut;
    }
    rect
}

/// Returns how many rows to shave off one edge, or None when the edge block
/// does not look like a page number.
fn edge_block(
    height: u32,
    max_block: u32,
    min_gap: u32,
    row_span: impl Fn(u32) -> Option<(u32, u32)>,
    width: u32,
) -> Option<u32> {
    let mut offset = 0;
    // skip solid rows at the very edge
    while offset < height && row_span(offset).is_none() {
        offset += 1;
    }
    if offset >= height {
        return None;
    }
    // measure the content block
    let mut span: Option<(u32, u32)> = None;
    let mut block_end = offset;
    while block_end < height {
        match row_span(block_end) {
            Some((first, last)) => {
                let (lo, hi) = span.unwrap_or((first, last));
                span = Some((lo.min(first), hi.max(last)));
                block_end += 1;
            }
            None => break,
        }
    }
    let block_height = block_end - offset;
    if block_height == 0 || block_height > max_block {
        return None;
    }
    // require a solid gap between the block and the page body
    let mut gap = 0;
    while block_end + gap < height && row_span(block_end + gap).is_none() {
        gap += 1;
    }
    if gap < min_gap || block_end + gap >= height {
        return None;
    }
    let (lo, hi) = span?;
    if hi - lo + 1 > width / 3 {
        return None;
    }
    Some(block_end + gap / 2)
}

pub fn crop_rect(img: &DynamicImage, rect: Rect) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if rect == Rect::full(w, h) || rect.width == 0 || rect.height == 0 {
        return img.clone();
    }
    img.crop_imm(rect.x, rect.y, rect.width, rect.height)
}

/// Crop per configuration: page numbers first, then margins, matching the
/// order of the processing pipeline.
pub fn crop(img: DynamicImage, opts: &Config) -> DynamicImage {
    if opts.cropping == Cropping::Off || opts.webtoon {
        return img;
    }
    let mut img = img;
    if opts.cropping == Cropping::MarginsAndNumbers {
        let rect = page_number_crop(&img.to_luma8());
        img = crop_rect(&img, rect);
    }
    let rect = margin_crop(
        &img.to_luma8(),
        opts.cropping_power,
        opts.cropping_minimum,
    );
    crop_rect(&img, rect)
}

/// Stretch the histogram to the full range, ignoring a small share at both
/// ends, then apply gamma (0.0 derives gamma from the mean luminance).
pub fn auto_contrast(img: DynamicImage, gamma: f32) -> DynamicImage {
    let gray = img.to_luma8();
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return img;
    }
    let cutoff = (total as f32 * CONTRAST_CUTOFF) as u64;

    let mut low = 0u8;
    let mut acc = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        acc += count;
        if acc > cutoff {
            low = value as u8;
            break;
        }
    }
    let mut high = 255u8;
    acc = 0;
    for (value, &count) in histogram.iter().enumerate().rev() {
        acc += count;
        if acc > cutoff {
            high = value as u8;
            break;
        }
    }

    let gamma = if gamma == 0.0 {
        let mean =
            gray.pixels().map(|p| p.0[0] as u64).sum::<u64>() as f32 / total as f32 / 255.0;
        auto_gamma(mean)
    } else {
        gamma.clamp(0.1, 3.0)
    };

    // a flat histogram has nothing to stretch
    let (low, high) = if high > low { (low, high) } else { (0, 255) };
    let lut = build_lut(low, high, gamma);
    apply_lut(img, &lut)
}

/// Gamma that maps the mean luminance to mid-gray, bounded to a sane range.
fn auto_gamma(mean: f32) -> f32 {
    if !(0.01..=0.99).contains(&mean) {
        return 1.0;
    }
    (0.5f32.ln() / mean.ln()).clamp(0.5, 3.0)
}

fn build_lut(low: u8, high: u8, gamma: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let span = (high as f32 - low as f32).max(1.0);
    for (i, out) in lut.iter_mut().enumerate() {
        let stretched = ((i as f32 - low as f32) / span).clamp(0.0, 1.0);
        let corrected = stretched.powf(gamma);
        *out = (corrected * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn apply_lut(img: DynamicImage, lut: &[u8; 256]) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(mut gray) => {
            for pixel in gray.pixels_mut() {
                pixel.0[0] = lut[pixel.0[0] as usize];
            }
            DynamicImage::ImageLuma8(gray)
        }
        other => {
            let mut rgb = other.to_rgb8();
            for pixel in rgb.pixels_mut() {
                for channel in pixel.0.iter_mut() {
                    *channel = lut[*channel as usize];
                }
            }
            DynamicImage::ImageRgb8(rgb)
        }
    }
}

/// Snap every gray level to the nearest entry of the device palette.
pub fn quantize(img: DynamicImage, levels: &[u8]) -> DynamicImage {
    let mut gray = img.to_luma8();
    let mut lut = [0u8; 256];
    for (i, out) in lut.iter_mut().enumerate() {
        *out = *levels
            .iter()
            .min_by_key(|&&level| (level as i32 - i as i32).abs())
            .expect("palette is non-empty");
    }
    for pixel in gray.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
    DynamicImage::ImageLuma8(gray)
}

fn resample(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (src_w, src_h) = (img.width(), img.height());
    if (src_w, src_h) == (width, height) || width == 0 || height == 0 {
        return img.clone();
    }
    // Lanczos3 preserves detail going down, CatmullRom is smoother going up
    let algorithm = if (width as u64 * height as u64) < (src_w as u64 * src_h as u64) {
        fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3)
    } else {
        fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom)
    };
    let options = fr::ResizeOptions::new().resize_alg(algorithm);
    let mut resizer = fr::Resizer::new();

    match img {
        DynamicImage::ImageLuma8(gray) => {
            let src = FrImageRef::new(src_w, src_h, gray.as_raw(), fr::PixelType::U8)
                .expect("buffer matches dimensions");
            let mut dst_buffer = vec![0u8; width as usize * height as usize];
            let mut dst = FrImage::from_slice_u8(width, height, &mut dst_buffer, fr::PixelType::U8)
                .expect("buffer matches dimensions");
            resizer
                .resize(&src, &mut dst, Some(&options))
                .expect("pixel types match");
            DynamicImage::ImageLuma8(
                GrayImage::from_raw(width, height, dst_buffer).expect("buffer matches dimensions"),
            )
        }
        other => {
            let rgb = other.to_rgb8();
            let src = FrImageRef::new(src_w, src_h, rgb.as_raw(), fr::PixelType::U8x3)
                .expect("buffer matches dimensions");
            let mut dst_buffer = vec![0u8; width as usize * height as usize * 3];
            let mut dst =
                FrImage::from_slice_u8(width, height, &mut dst_buffer, fr::PixelType::U8x3)
                    .expect("buffer matches dimensions");
            resizer
                .resize(&src, &mut dst, Some(&options))
                .expect("pixel types match");
            DynamicImage::ImageRgb8(
                RgbImage::from_raw(width, height, dst_buffer).expect("buffer matches dimensions"),
            )
        }
    }
}

fn letterbox(img: DynamicImage, width: u32, height: u32, fill: Rgb<u8>) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if (w, h) == (width, height) {
        return img;
    }
    let x = (width.saturating_sub(w)) / 2;
    let y = (height.saturating_sub(h)) / 2;
    match img {
        DynamicImage::ImageLuma8(gray) => {
            let luma = rgb_luma(fill);
            let mut canvas = GrayImage::from_pixel(width, height, Luma([luma]));
            imageops::overlay(&mut canvas, &gray, x.into(), y.into());
            DynamicImage::ImageLuma8(canvas)
        }
        other => {
            let rgb = other.to_rgb8();
            let mut canvas = RgbImage::from_pixel(width, height, fill);
            imageops::overlay(&mut canvas, &rgb, x.into(), y.into());
            DynamicImage::ImageRgb8(canvas)
        }
    }
}

fn rgb_luma(rgb: Rgb<u8>) -> u8 {
    let [r, g, b] = rgb.0;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8
}

/// Resize against the device target. Every page ends at exactly the target
/// resolution:
///
/// | source vs target | stretch | noshrink | upscale | default |
/// |---|---|---|---|---|
/// | larger in both   | fit down + pad | fit down + pad | fit down + pad | fit down + pad |
/// | smaller in both  | stretch  | pad      | scale up + pad | pad |
/// | wrong aspect     | stretch  | fit down + pad | fit down + pad | fit down + pad |
pub fn resize_to_target(
    img: DynamicImage,
    target: (u32, u32),
    opts: &Config,
    fill: Rgb<u8>,
) -> DynamicImage {
    let (tw, th) = target;
    if tw == 0 || th == 0 {
        return img;
    }
    let (w, h) = (img.width(), img.height());
    // sources larger than the target on both axes always scale down with
    // their aspect preserved, whatever the policy
    let larger_in_both = w >= tw && h >= th;
    if opts.stretch && !larger_in_both {
        return resample(&img, tw, th);
    }

    let fits = w <= tw && h <= th;
    if fits && !opts.upscale && !opts.stretch {
        // noshrink and default both pad without scaling
        return letterbox(img, tw, th, fill);
    }

    let ratio = (tw as f32 / w as f32).min(th as f32 / h as f32);
    let new_w = ((w as f32 * ratio) as u32).max(1);
    let new_h = ((h as f32 * ratio) as u32).max(1);
    let resized = resample(&img, new_w, new_h);
    letterbox(resized, tw, th, fill)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_page_with_box(w: u32, h: u32, rect: Rect) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        img
    }

    #[test]
    fn margin_crop_finds_content_box() {
        let content = Rect {
            x: 40,
            y: 50,
            width: 100,
            height: 200,
        };
        let img = white_page_with_box(300, 400, content);
        let rect = margin_crop(&img, 1.0, 0.0);
        assert_eq!(rect, content);
    }

    #[test]
    fn margin_crop_honors_minimum_ratio() {
        let img = white_page_with_box(
            300,
            400,
            Rect {
                x: 140,
                y: 190,
                width: 20,
                height: 20,
            },
        );
        let rect = margin_crop(&img, 1.0, 0.9);
        assert!(rect.area() as f32 >= 300.0 * 400.0 * 0.9);
    }

    #[test]
    fn margin_crop_power_scales_trim() {
        let content = Rect {
            x: 100,
            y: 100,
            width: 100,
            height: 200,
        };
        let img = white_page_with_box(300, 400, content);
        let rect = margin_crop(&img, 0.5, 0.0);
        assert_eq!(rect.x, 50);
        assert_eq!(rect.y, 50);
    }

    #[test]
    fn page_number_is_removed_from_bottom() {
        let mut img = white_page_with_box(
            300,
            400,
            Rect {
                x: 20,
                y: 20,
                width: 260,
                height: 340,
            },
        );
        // small mark near the bottom edge
        for y in 390..395 {
            for x in 145..155 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let rect = page_number_crop(&img);
        assert!(rect.height < 400);
        assert!(rect.y + rect.height <= 390);
        // the body must survive
        assert!(rect.y + rect.height > 360);
    }

    #[test]
    fn background_vote_ties_to_white() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([255]));
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(9, 0, Luma([0]));
        assert_eq!(sample_background(&img), Background::White);
        img.put_pixel(0, 9, Luma([0]));
        assert_eq!(sample_background(&img), Background::Black);
    }

    #[test]
    fn quantize_snaps_to_palette() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([0x14])));
        let out = quantize(img, crate::profile::GRAY_16).to_luma8();
        assert_eq!(out.get_pixel(0, 0).0[0], 0x11);
    }

    #[test]
    fn smaller_pages_are_letterboxed_by_default() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 200, Luma([40])));
        let opts = Config::default();
        let out = resize_to_target(img, (300, 400), &opts, Rgb([255, 255, 255]));
        assert_eq!((out.width(), out.height()), (300, 400));
        // original pixels are centered, border is the fill color
        assert_eq!(out.to_luma8().get_pixel(0, 0).0[0], 255);
        assert_eq!(out.to_luma8().get_pixel(150, 200).0[0], 40);
    }

    #[test]
    fn larger_pages_scale_down_and_letterbox() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(600, 1000, Luma([40])));
        let opts = Config::default();
        let out = resize_to_target(img, (300, 400), &opts, Rgb([255, 255, 255]));
        assert_eq!((out.width(), out.height()), (300, 400));
        // scaled to 240x400, padded 30 to each side
        let out = out.to_luma8();
        assert_eq!(out.get_pixel(5, 200).0[0], 255);
        assert_eq!(out.get_pixel(150, 200).0[0], 40);
    }

    #[test]
    fn stretch_hits_exact_target() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 100, Luma([40])));
        let opts = Config {
            stretch: true,
            ..Config::default()
        };
        let out = resize_to_target(img, (300, 400), &opts, Rgb([0, 0, 0]));
        assert_eq!((out.width(), out.height()), (300, 400));
        // smaller in both: the whole canvas is stretched source, no borders
        assert_eq!(out.to_luma8().get_pixel(5, 200).0[0], 40);
    }

    #[test]
    fn stretch_does_not_distort_larger_sources() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(600, 1000, Luma([40])));
        let opts = Config {
            stretch: true,
            ..Config::default()
        };
        let out = resize_to_target(img, (300, 400), &opts, Rgb([255, 255, 255]));
        assert_eq!((out.width(), out.height()), (300, 400));
        // aspect-fit to 240x400 and letterboxed, same as every other policy
        let out = out.to_luma8();
        assert_eq!(out.get_pixel(5, 200).0[0], 255);
        assert_eq!(out.get_pixel(150, 200).0[0], 40);
    }

    #[test]
    fn upscale_preserves_aspect_then_pads() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 200, Luma([40])));
        let opts = Config {
            upscale: true,
            ..Config::default()
        };
        let out = resize_to_target(img, (300, 400), &opts, Rgb([255, 255, 255]));
        assert_eq!((out.width(), out.height()), (300, 400));
        // scaled to 200x400, padded 50 left/right
        assert_eq!(out.to_luma8().get_pixel(10, 200).0[0], 255);
        assert_eq!(out.to_luma8().get_pixel(150, 200).0[0], 40);
    }
}

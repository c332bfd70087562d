//! Image encoding: JPEG (stock or mozjpeg) and PNG.

use anyhow::Context;
use imageproc::image::codecs::png::{CompressionType, FilterType, PngEncoder};
use imageproc::image::{ColorType, DynamicImage, GenericImageView, ImageEncoder};

use crate::error::Result;

pub const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Jpeg,
    Png,
}

impl Encoding {
    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Jpeg => "jpg",
            Encoding::Png => "png",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Encoding::Jpeg => "image/jpeg",
            Encoding::Png => "image/png",
        }
    }
}

pub fn encode(img: &DynamicImage, encoding: Encoding, mozjpeg: bool) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(img.width() as usize * img.height() as usize / 4);
    match encoding {
        Encoding::Jpeg => encode_jpeg(img, &mut buffer, mozjpeg)?,
        Encoding::Png => encode_png(img, &mut buffer)?,
    }
    Ok(buffer)
}

fn encode_jpeg(img: &DynamicImage, buffer: &mut Vec<u8>, mozjpeg: bool) -> Result<()> {
    #[cfg(feature = "mozjpeg")]
    if mozjpeg {
        return encode_mozjpeg(img, buffer);
    }
    let _ = mozjpeg;
    let mut encoder = imageproc::image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut *buffer,
        JPEG_QUALITY,
    );
    encoder
        .encode_image(img)
        .context("failed to compress image to JPEG")?;
    Ok(())
}

#[cfg(feature = "mozjpeg")]
fn encode_mozjpeg(img: &DynamicImage, buffer: &mut Vec<u8>) -> Result<()> {
    use anyhow::anyhow;

    let result = std::panic::catch_unwind(|| -> anyhow::Result<Vec<u8>> {
        let (color, data) = match img {
            DynamicImage::ImageLuma8(gray) => {
                (mozjpeg::ColorSpace::JCS_GRAYSCALE, gray.as_raw().clone())
            }
            other => (
                mozjpeg::ColorSpace::JCS_RGB,
                other.to_rgb8().as_raw().clone(),
            ),
        };
        let mut comp = mozjpeg::Compress::new(color);
        comp.set_size(img.width() as usize, img.height() as usize);
        comp.set_quality(JPEG_QUALITY as f32);
        let mut started = comp.start_compress(Vec::new())?;
        started.write_scanlines(&data)?;
        Ok(started.finish()?)
    });
    match result {
        Ok(Ok(bytes)) => {
            buffer.extend_from_slice(&bytes);
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(anyhow!("mozjpeg encoder panicked").into()),
    }
}

fn encode_png(img: &DynamicImage, buffer: &mut Vec<u8>) -> Result<()> {
    let is_grayscale = img.color() == ColorType::L8 || img.color() == ColorType::La8;
    let encoder = PngEncoder::new_with_quality(
        &mut *buffer,
        CompressionType::Default,
        if is_grayscale {
            FilterType::NoFilter
        } else {
            FilterType::Adaptive
        },
    );
    encoder
        .write_image(
            img.as_bytes(),
            img.width(),
            img.height(),
            img.color().into(),
        )
        .context("failed to compress image to PNG")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::image::{load_from_memory, GrayImage, Luma};

    #[test]
    fn jpeg_round_trips_dimensions() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 32, Luma([120])));
        let bytes = encode(&img, Encoding::Jpeg, false).unwrap();
        let decoded = load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        assert_eq!(&bytes[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn png_round_trips_pixels() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([0x33])));
        let bytes = encode(&img, Encoding::Png, false).unwrap();
        let decoded = load_from_memory(&bytes).unwrap().to_luma8();
        assert_eq!(decoded.get_pixel(4, 4).0[0], 0x33);
    }
}

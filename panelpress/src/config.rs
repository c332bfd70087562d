//! Conversion options: one immutable record passed by value to workers.

use serde::{Deserialize, Serialize};

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::profile::{Manufacturer, Preset, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Auto,
    Mobi,
    Epub,
    Cbz,
    Kfx,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Cbz => "cbz",
            OutputFormat::Mobi => "mobi",
            _ => "epub",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitStrategy {
    Split,
    Rotate,
    RotateAndSplit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cropping {
    Off,
    Margins,
    MarginsAndNumbers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BatchSplit {
    Off,
    Auto,
    PerDirectory,
}

/// Skip/copy policy for previously-converted inputs. The raw 0-5 values of
/// the CLI flag combine two independent behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPolicy(pub u8);

impl SkipPolicy {
    pub fn skip_if_target_exists(self) -> bool {
        matches!(self.0, 1 | 4 | 5)
    }

    pub fn skip_processed(self) -> bool {
        matches!(self.0, 2 | 4)
    }

    pub fn copy_processed(self) -> bool {
        matches!(self.0, 3 | 5)
    }

    pub fn warns_on_reprocess(self) -> bool {
        self.0 <= 1
    }
}

/// Letterbox border color, either forced by the user or sampled per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderColor(pub [u8; 3]);

impl BorderColor {
    pub fn luma(self) -> u8 {
        let [r, g, b] = self.0;
        (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8
    }

    /// Parse `#rgb`, `#rrggbb` (leading `#` optional) or a CSS named color.
    pub fn parse(s: &str) -> Result<BorderColor> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(rgb) = named_color(&lower) {
            return Ok(BorderColor(rgb));
        }
        let hex = lower.strip_prefix('#').unwrap_or(&lower);
        let digits = hex.len();
        if (digits == 3 || digits == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            let component = |i: usize| -> u8 {
                if digits == 3 {
                    let v = u8::from_str_radix(&hex[i..i + 1], 16).unwrap();
                    v * 17
                } else {
                    u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).unwrap()
                }
            };
            return Ok(BorderColor([component(0), component(1), component(2)]));
        }
        Err(Error::BadBorderColor(s.to_string()))
    }
}

fn named_color(name: &str) -> Option<[u8; 3]> {
    let rgb = match name {
        "black" => [0x00, 0x00, 0x00],
        "silver" => [0xc0, 0xc0, 0xc0],
        "gray" | "grey" => [0x80, 0x80, 0x80],
        "white" => [0xff, 0xff, 0xff],
        "maroon" => [0x80, 0x00, 0x00],
        "red" => [0xff, 0x00, 0x00],
        "purple" => [0x80, 0x00, 0x80],
        "fuchsia" | "magenta" => [0xff, 0x00, 0xff],
        "green" => [0x00, 0x80, 0x00],
        "lime" => [0x00, 0xff, 0x00],
        "olive" => [0x80, 0x80, 0x00],
        "yellow" => [0xff, 0xff, 0x00],
        "navy" => [0x00, 0x00, 0x80],
        "blue" => [0x00, 0x00, 0xff],
        "teal" => [0x00, 0x80, 0x80],
        "aqua" | "cyan" => [0x00, 0xff, 0xff],
        "darkgray" | "darkgrey" => [0xa9, 0xa9, 0xa9],
        "lightgray" | "lightgrey" => [0xd3, 0xd3, 0xd3],
        "dimgray" | "dimgrey" => [0x69, 0x69, 0x69],
        "whitesmoke" => [0xf5, 0xf5, 0xf5],
        "ivory" => [0xff, 0xff, 0xf0],
        _ => return None,
    };
    Some(rgb)
}

/// Raw option record, mirroring the converter CLI one to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub profile: Preset,
    pub custom_width: Option<u32>,
    pub custom_height: Option<u32>,
    pub manga_style: bool,
    pub hq: bool,
    /// Two-panel magnification instead of four.
    pub autoscale: bool,
    pub webtoon: bool,
    /// Target output size in MiB.
    pub target_size: Option<u64>,
    pub output: Option<PathBuf>,
    pub copy_source_tree: Option<String>,
    pub title: Option<String>,
    pub format: OutputFormat,
    pub batch_split: BatchSplit,
    pub skip_existing: SkipPolicy,
    pub pad_zeros: usize,
    pub copy_comic_info: bool,
    pub no_processing: bool,
    pub upscale: bool,
    pub stretch: bool,
    pub noshrink: bool,
    pub splitter: SplitStrategy,
    /// 0.0 selects automatic gamma from mean luminance.
    pub gamma: f32,
    pub cropping: Cropping,
    pub cropping_power: f32,
    pub cropping_minimum: f32,
    pub border_color: Option<BorderColor>,
    pub force_color: bool,
    pub force_png: bool,
    pub mozjpeg: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            profile: Preset::KV,
            custom_width: None,
            custom_height: None,
            manga_style: false,
            hq: false,
            autoscale: false,
            webtoon: false,
            target_size: None,
            output: None,
            copy_source_tree: None,
            title: None,
            format: OutputFormat::Auto,
            batch_split: BatchSplit::Off,
            skip_existing: SkipPolicy(0),
            pad_zeros: 0,
            copy_comic_info: false,
            no_processing: false,
            upscale: false,
            stretch: false,
            noshrink: false,
            splitter: SplitStrategy::Split,
            gamma: 0.0,
            cropping: Cropping::MarginsAndNumbers,
            cropping_power: 1.0,
            cropping_minimum: 0.0,
            border_color: None,
            force_color: false,
            force_png: false,
            mozjpeg: false,
        }
    }
}

/// Options after conflict checking and profile/feature derivation. This is
/// the record workers receive by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub opts: Config,
    pub profile: Profile,
    pub format: OutputFormat,
    pub kfx: bool,
    pub is_kindle: bool,
    pub panel_view: bool,
}

impl Config {
    /// Validate flag combinations and derive the effective profile, output
    /// format and feature switches. Configuration errors surface here,
    /// before any work starts.
    pub fn resolve(mut self) -> Result<ResolvedConfig> {
        let mut kfx = false;
        let mut panel_view = self.profile.supports_panel_view();
        let is_kindle = self.profile.manufacturer() == Manufacturer::Kindle;

        let mut format = match self.format {
            OutputFormat::Auto => match self.profile.manufacturer() {
                Manufacturer::Kindle if self.profile != Preset::KDX => OutputFormat::Mobi,
                Manufacturer::Kobo
                | Manufacturer::Nook
                | Manufacturer::Tolino
                | Manufacturer::Pocketbook
                | Manufacturer::Other => OutputFormat::Epub,
                Manufacturer::Kindle | Manufacturer::Amazon | Manufacturer::Apple => {
                    OutputFormat::Cbz
                }
            },
            explicit => explicit,
        };

        if !self.profile.supports_hq() {
            self.hq = false;
        }
        if self.webtoon {
            panel_view = false;
            self.manga_style = false;
            self.upscale = true;
            self.hq = false;
        }
        // CBZ on the DX panel can use the full height of the screen
        if self.profile == Preset::KDX && format == OutputFormat::Cbz {
            self.custom_height = Some(1200);
        }
        if format == OutputFormat::Kfx {
            format = OutputFormat::Epub;
            kfx = true;
            panel_view = false;
        }
        // MOBI has a hard container size limit, splitting is not optional
        if (format == OutputFormat::Mobi || kfx) && self.batch_split != BatchSplit::PerDirectory {
            self.batch_split = BatchSplit::Auto;
        }
        if self.copy_comic_info && format != OutputFormat::Cbz {
            return Err(Error::ComicInfoNeedsCbz);
        }

        let profile = Profile::from(self.profile);
        let profile = if self.custom_width.is_some() || self.custom_height.is_some() {
            profile.with_override(self.custom_width, self.custom_height)
        } else {
            profile
        };

        Ok(ResolvedConfig {
            opts: self,
            profile,
            format,
            kfx,
            is_kindle,
            panel_view,
        })
    }
}

impl ResolvedConfig {
    pub fn resolution(&self) -> (u32, u32) {
        self.profile.resolution
    }

    /// Target resolution for the resize step; HQ renders at double size for
    /// later magnification.
    pub fn target_resolution(&self) -> (u32, u32) {
        let (w, h) = self.profile.resolution;
        if self.opts.hq {
            (w * 2, h * 2)
        } else {
            (w, h)
        }
    }

    pub fn target_bytes(&self) -> u64 {
        match self.opts.target_size {
            Some(mib) => mib * 1024 * 1024,
            None if self.opts.webtoon => 100 * 1024 * 1024,
            None => 400 * 1024 * 1024,
        }
    }

    pub fn output_extension(&self) -> &'static str {
        if self.profile.is_kobo() && self.format == OutputFormat::Epub {
            "kepub.epub"
        } else {
            self.format.extension()
        }
    }
}

//! Device profile registry: screen resolution, palette, manufacturer and
//! feature toggles for every supported reader.

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use std::str::FromStr;

/// 16-level grayscale palette used by most e-ink panels.
pub const GRAY_16: &[u8] = &[
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];

/// 4-level palette of the earliest Kindle panels.
pub const GRAY_4: &[u8] = &[0x00, 0x55, 0xaa, 0xff];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Palette {
    Color,
    Gray4,
    Gray16,
}

impl Palette {
    pub fn levels(self) -> Option<&'static [u8]> {
        match self {
            Palette::Color => None,
            Palette::Gray4 => Some(GRAY_4),
            Palette::Gray16 => Some(GRAY_16),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Manufacturer {
    Kindle,
    Amazon,
    Kobo,
    Nook,
    Tolino,
    Pocketbook,
    Apple,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter)]
pub enum Preset {
    K1,
    K2,
    K34,
    K578,
    KDX,
    KPW,
    KV,
    KPW5,
    KO,
    K11,
    KS,
    KFHD,
    KFHDX,
    KoMT,
    KoG,
    KoGHD,
    KoA,
    KoAHD,
    KoAH2O,
    KoAO,
    KoN,
    KoC,
    KoL,
    KoF,
    KoS,
    KoE,
    NookGL,
    TolV,
    PBEra,
    ApIP,
    Other,
}

impl Preset {
    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as IntoEnumIterator>::iter()
    }

    pub fn id(self) -> &'static str {
        match self {
            Preset::K1 => "K1",
            Preset::K2 => "K2",
            Preset::K34 => "K34",
            Preset::K578 => "K578",
            Preset::KDX => "KDX",
            Preset::KPW => "KPW",
            Preset::KV => "KV",
            Preset::KPW5 => "KPW5",
            Preset::KO => "KO",
            Preset::K11 => "K11",
            Preset::KS => "KS",
            Preset::KFHD => "KFHD",
            Preset::KFHDX => "KFHDX",
            Preset::KoMT => "KoMT",
            Preset::KoG => "KoG",
            Preset::KoGHD => "KoGHD",
            Preset::KoA => "KoA",
            Preset::KoAHD => "KoAHD",
            Preset::KoAH2O => "KoAH2O",
            Preset::KoAO => "KoAO",
            Preset::KoN => "KoN",
            Preset::KoC => "KoC",
            Preset::KoL => "KoL",
            Preset::KoF => "KoF",
            Preset::KoS => "KoS",
            Preset::KoE => "KoE",
            Preset::NookGL => "NookGL",
            Preset::TolV => "TolV",
            Preset::PBEra => "PBEra",
            Preset::ApIP => "ApIP",
            Preset::Other => "OTHER",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Preset::K1 => "Kindle 1",
            Preset::K2 => "Kindle 2",
            Preset::K34 => "Kindle Keyboard/Touch",
            Preset::K578 => "Kindle",
            Preset::KDX => "Kindle DX/DXG",
            Preset::KPW => "Kindle Paperwhite 1/2",
            Preset::KV => "Kindle Voyage/Oasis",
            Preset::KPW5 => "Kindle Paperwhite 5",
            Preset::KO => "Kindle Oasis 2/3",
            Preset::K11 => "Kindle 11",
            Preset::KS => "Kindle Scribe",
            Preset::KFHD => "Fire HD",
            Preset::KFHDX => "Fire HDX",
            Preset::KoMT => "Kobo Mini/Touch",
            Preset::KoG => "Kobo Glo",
            Preset::KoGHD => "Kobo Glo HD",
            Preset::KoA => "Kobo Aura",
            Preset::KoAHD => "Kobo Aura HD",
            Preset::KoAH2O => "Kobo Aura H2O",
            Preset::KoAO => "Kobo Aura One",
            Preset::KoN => "Kobo Nia",
            Preset::KoC => "Kobo Clara HD/2E",
            Preset::KoL => "Kobo Libra H2O/2",
            Preset::KoF => "Kobo Forma",
            Preset::KoS => "Kobo Sage",
            Preset::KoE => "Kobo Elipsa",
            Preset::NookGL => "Nook GlowLight",
            Preset::TolV => "Tolino Vision",
            Preset::PBEra => "PocketBook Era",
            Preset::ApIP => "iPad",
            Preset::Other => "Other",
        }
    }

    pub fn resolution(self) -> (u32, u32) {
        match self {
            Preset::K1 | Preset::K2 => (600, 670),
            Preset::K34 | Preset::K578 | Preset::KoMT => (600, 800),
            Preset::KDX => (824, 1000),
            Preset::KPW | Preset::KoN => (758, 1024),
            Preset::KV | Preset::K11 | Preset::KoGHD | Preset::KoC => (1072, 1448),
            Preset::KPW5 => (1236, 1648),
            Preset::KO | Preset::KoL => (1264, 1680),
            Preset::KS => (1860, 2480),
            Preset::KFHD => (800, 1280),
            Preset::KFHDX => (1200, 1920),
            Preset::KoG => (768, 1024),
            Preset::KoA => (758, 1014),
            Preset::KoAHD => (1080, 1440),
            Preset::KoAH2O => (1080, 1430),
            Preset::KoAO | Preset::KoE => (1404, 1872),
            Preset::KoF | Preset::KoS => (1440, 1920),
            Preset::NookGL | Preset::TolV => (1072, 1448),
            Preset::PBEra => (1200, 1600),
            Preset::ApIP => (1536, 2048),
            Preset::Other => (0, 0),
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            Preset::K1 => Palette::Gray4,
            Preset::KFHD | Preset::KFHDX | Preset::ApIP => Palette::Color,
            _ => Palette::Gray16,
        }
    }

    pub fn manufacturer(self) -> Manufacturer {
        match self {
            Preset::K1
            | Preset::K2
            | Preset::K34
            | Preset::K578
            | Preset::KDX
            | Preset::KPW
            | Preset::KV
            | Preset::KPW5
            | Preset::KO
            | Preset::K11
            | Preset::KS => Manufacturer::Kindle,
            Preset::KFHD | Preset::KFHDX => Manufacturer::Amazon,
            Preset::KoMT
            | Preset::KoG
            | Preset::KoGHD
            | Preset::KoA
            | Preset::KoAHD
            | Preset::KoAH2O
            | Preset::KoAO
            | Preset::KoN
            | Preset::KoC
            | Preset::KoL
            | Preset::KoF
            | Preset::KoS
            | Preset::KoE => Manufacturer::Kobo,
            Preset::NookGL => Manufacturer::Nook,
            Preset::TolV => Manufacturer::Tolino,
            Preset::PBEra => Manufacturer::Pocketbook,
            Preset::ApIP => Manufacturer::Apple,
            Preset::Other => Manufacturer::Other,
        }
    }

    /// Panel View needs a Kindle e-ink panel recent enough to render the
    /// magnification overlays.
    pub fn supports_panel_view(self) -> bool {
        self.manufacturer() == Manufacturer::Kindle
            && !matches!(self, Preset::K1 | Preset::K2 | Preset::K34 | Preset::KDX)
    }

    pub fn supports_hq(self) -> bool {
        self.supports_panel_view()
    }
}

/// Immutable description of the output device, either a preset from the
/// registry or a synthetic "Custom" override that keeps the source preset's
/// palette and manufacturer tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub preset: Preset,
    pub resolution: (u32, u32),
    pub palette: Palette,
    pub custom: bool,
}

impl Profile {
    pub fn id(&self) -> &'static str {
        if self.custom {
            "Custom"
        } else {
            self.preset.id()
        }
    }

    pub fn name(&self) -> &'static str {
        if self.custom {
            "Custom"
        } else {
            self.preset.name()
        }
    }

    pub fn manufacturer(&self) -> Manufacturer {
        self.preset.manufacturer()
    }

    pub fn is_kindle(&self) -> bool {
        self.preset.manufacturer() == Manufacturer::Kindle
    }

    pub fn is_kobo(&self) -> bool {
        self.preset.manufacturer() == Manufacturer::Kobo
    }

    /// Replace one or both axes of the preset resolution, yielding the
    /// synthetic Custom profile.
    pub fn with_override(self, width: Option<u32>, height: Option<u32>) -> Profile {
        let (w, h) = self.resolution;
        Profile {
            resolution: (width.unwrap_or(w), height.unwrap_or(h)),
            custom: true,
            ..self
        }
    }
}

impl From<Preset> for Profile {
    fn from(preset: Preset) -> Self {
        Profile {
            preset,
            resolution: preset.resolution(),
            palette: preset.palette(),
            custom: false,
        }
    }
}

pub fn lookup(id: &str) -> Option<Preset> {
    Preset::iter().find(|p| p.id().eq_ignore_ascii_case(id))
}

pub fn list() -> Vec<Preset> {
    Preset::iter().collect()
}

impl FromStr for Preset {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(s).ok_or_else(|| crate::error::Error::UnknownProfile(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("kv"), Some(Preset::KV));
        assert_eq!(lookup("KoGHD"), Some(Preset::KoGHD));
        assert_eq!(lookup("bogus"), None);
    }

    #[test]
    fn old_kindles_have_no_panel_view() {
        for p in [Preset::K1, Preset::K2, Preset::K34, Preset::KDX] {
            assert!(!p.supports_panel_view());
        }
        assert!(Preset::KV.supports_panel_view());
        assert!(!Preset::KoC.supports_panel_view());
    }

    #[test]
    fn custom_override_keeps_palette() {
        let profile = Profile::from(Preset::KV).with_override(Some(900), None);
        assert_eq!(profile.resolution, (900, 1448));
        assert_eq!(profile.palette, Palette::Gray16);
        assert_eq!(profile.id(), "Custom");
        assert!(profile.is_kindle());
    }
}

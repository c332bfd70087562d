pub mod archive;
pub mod book;
pub mod cancel;
pub mod cbz;
pub mod comicinfo;
pub mod config;
pub mod epub;
pub mod error;
pub mod mobi;
pub mod page;
pub mod profile;
pub mod sanitize;
pub mod sidecar;
pub mod volume;
pub mod webtoon;
pub mod workspace;

// Re-export commonly used types
pub use book::{convert_all, Summary};
pub use cancel::CancelToken;
pub use config::{
    BatchSplit, BorderColor, Config, Cropping, OutputFormat, SkipPolicy, SplitStrategy,
};
pub use error::{Error, Result};
pub use mobi::is_kindlegen_available;
pub use profile::{Manufacturer, Palette, Preset, Profile};

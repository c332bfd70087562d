//! Error taxonomy for the conversion pipeline.
//!
//! Four fatal categories: configuration errors are surfaced before any work,
//! environment errors abort the run, input errors are fatal for one input
//! only, worker errors carry the serialized failure of a transform task.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // Configuration: conflicting flags, unknown identifiers. Checked up front.
    #[error("unknown device profile: {0}")]
    UnknownProfile(String),
    #[error("border color must be a hexadecimal color or one of the named colors: {0}")]
    BadBorderColor(String),
    #[error("ComicInfo.xml can only be copied into CBZ output")]
    ComicInfoNeedsCbz,

    // Environment: missing tools, disk, permissions.
    #[error("{0} is missing from PATH")]
    MissingTool(&'static str),
    #[error("not enough disk space to perform the conversion (need {needed} bytes, {available} available)")]
    DiskSpace { needed: u64, available: u64 },
    #[error("target directory is not writable: {0}")]
    TargetNotWritable(PathBuf),

    // Input: bad source material. Fatal for this input, the run continues.
    #[error("failed to open source file/directory: {0}")]
    UnsupportedSource(PathBuf),
    #[error("source directory is empty")]
    EmptySource,
    #[error("unsupported directory structure: images at mixed depths")]
    MixedDepth,
    #[error("image file {path} is corrupted: {reason}")]
    CorruptImage { path: PathBuf, reason: String },
    #[error("no images could be extracted from {0}")]
    NothingExtracted(PathBuf),

    // Worker: unexpected failure inside a transform or split task. The first
    // one tears down the working tree for its input.
    #[error("worker crashed: {message}")]
    Worker { message: String },
    #[error("conversion interrupted")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Image(#[from] imageproc::image::ImageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Serialize a worker panic or failure into a transportable error.
    pub fn worker(message: impl std::fmt::Display) -> Self {
        Error::Worker {
            message: message.to_string(),
        }
    }
}

//! Error taxonomy for resolution, fetching, patchifying, and geo transforms.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the mapstitch pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// No image service was found in a manifest, or a capability document
    /// was unreachable or malformed.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// Invalid patch or tile configuration (e.g. non-positive stride).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A tile or image request failed or returned an undecodable payload.
    /// `region` names the requested pixel region (`full` or `x,y,w,h`).
    #[error("fetch failed for region {region}: {message}")]
    Fetch { region: String, message: String },

    /// The affine transform has a zero determinant and cannot be inverted.
    #[error("affine transform is not invertible")]
    SingularTransform,

    /// A coordinate projection between reference systems failed.
    #[error("projection error: {0}")]
    Projection(String),

    /// The download was cancelled before completion; no partial raster
    /// is available.
    #[error("download cancelled")]
    Cancelled,

    /// Failure reading or writing a local file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An image file uses a format or layout the crate cannot decode.
    #[error("unsupported image: {0}")]
    Unsupported(String),
}

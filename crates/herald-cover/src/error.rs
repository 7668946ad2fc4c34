//! Error types for cover composition.

use thiserror::Error;

/// Errors that can occur while composing a cover.
#[derive(Debug, Error)]
pub enum CoverError {
    /// Source image could not be decoded, or the result could not be encoded.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Font data is not a usable font.
    #[error("invalid font: {0}")]
    Font(String),

    /// Reading the font or writing the cached cover failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source image had no bytes.
    #[error("source image is empty")]
    EmptySource,
}

//! Cover image composition for herald posts.
//!
//! A cover is a square JPEG: the source photo cropped to the area above a
//! caption banner, the upper-cased title centred in the banner, and an
//! optional watermark just above it. Caption layout is pure and lives in
//! [`layout`]; cropping lives in [`crop`].

mod composer;
pub mod crop;
mod error;
pub mod layout;

pub use composer::{ComposedCover, CoverComposer, CoverOptions, sniff_mime};
pub use error::CoverError;
pub use layout::{CaptionLayout, LayoutOptions, layout_caption};

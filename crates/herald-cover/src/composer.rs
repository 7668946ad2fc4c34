//! Cover composition: photo, darkening overlay, caption banner, watermark.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::debug;

use crate::crop::cover_fit;
use crate::layout::{CaptionLayout, LayoutOptions, layout_caption};
use crate::CoverError;

/// Visual settings for a composed cover.
#[derive(Debug, Clone)]
pub struct CoverOptions {
    /// Width and height of the square output.
    pub canvas: u32,
    pub jpeg_quality: u8,
    pub background: [u8; 3],
    pub banner_color: [u8; 3],
    pub text_color: [u8; 3],
    /// Fraction of brightness removed from the photo area.
    pub photo_darkening: f32,
    /// Small text drawn just above the banner.
    pub watermark: Option<String>,
    pub layout: LayoutOptions,
}

impl Default for CoverOptions {
    fn default() -> Self {
        Self {
            canvas: 1080,
            jpeg_quality: 90,
            background: [16, 16, 16],
            banner_color: [12, 35, 64],
            text_color: [255, 255, 255],
            photo_darkening: 0.2,
            watermark: None,
            layout: LayoutOptions::default(),
        }
    }
}

/// An encoded cover.
#[derive(Debug, Clone)]
pub struct ComposedCover {
    /// JPEG bytes.
    pub bytes: Vec<u8>,
    /// Where the cover was cached, if it was.
    pub path: Option<PathBuf>,
    pub layout: CaptionLayout,
}

/// Renders publish covers from a source photo and a title.
pub struct CoverComposer {
    font: FontVec,
    options: CoverOptions,
}

impl CoverComposer {
    pub fn new(font: FontVec, options: CoverOptions) -> Self {
        Self { font, options }
    }

    /// Build a composer from TrueType/OpenType font data.
    pub fn from_font_bytes(data: Vec<u8>, options: CoverOptions) -> Result<Self, CoverError> {
        let font = FontVec::try_from_vec(data).map_err(|e| CoverError::Font(e.to_string()))?;
        Ok(Self::new(font, options))
    }

    /// Build a composer from a font file on disk.
    pub fn from_font_file(path: &Path, options: CoverOptions) -> Result<Self, CoverError> {
        let data = std::fs::read(path)?;
        Self::from_font_bytes(data, options)
    }

    pub fn options(&self) -> &CoverOptions {
        &self.options
    }

    /// Compose a cover, optionally writing it to `cache_path`.
    pub fn compose(
        &self,
        source: &[u8],
        title: &str,
        cache_path: Option<&Path>,
    ) -> Result<ComposedCover, CoverError> {
        if source.is_empty() {
            return Err(CoverError::EmptySource);
        }
        let photo = image::load_from_memory(source)?;

        let size = self.options.canvas;
        let layout = layout_caption(title, size, &self.options.layout);
        let photo_height = layout.photo_height(size);

        let mut canvas = RgbImage::from_pixel(size, size, Rgb(self.options.background));

        let fitted = cover_fit(&photo, size, photo_height);
        image::imageops::replace(&mut canvas, &fitted, 0, 0);
        darken(&mut canvas, photo_height, self.options.photo_darkening);

        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(0, photo_height as i32).of_size(size, layout.banner_height.max(1)),
            Rgb(self.options.banner_color),
        );
        self.draw_caption(&mut canvas, &layout, photo_height);
        self.draw_watermark(&mut canvas, photo_height);

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.options.jpeg_quality).encode_image(&canvas)?;

        let path = match cache_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &bytes)?;
                Some(path.to_path_buf())
            }
            None => None,
        };

        debug!(
            lines = layout.lines.len(),
            font_size = layout.font_size,
            banner_height = layout.banner_height,
            bytes = bytes.len(),
            "composed cover"
        );

        Ok(ComposedCover {
            bytes,
            path,
            layout,
        })
    }

    fn draw_caption(&self, canvas: &mut RgbImage, layout: &CaptionLayout, photo_height: u32) {
        let size = self.options.canvas;
        let scale = PxScale::from(layout.font_size);
        let block = (layout.lines.len() as f32 * layout.line_height).round() as u32;
        let top = photo_height + layout.banner_height.saturating_sub(block) / 2;
        let color = Rgb(self.options.text_color);

        for (i, line) in layout.lines.iter().enumerate() {
            let (width, _) = text_size(scale, &self.font, line);
            let x = size.saturating_sub(width) / 2;
            let y = top as f32 + i as f32 * layout.line_height;
            draw_text_mut(canvas, color, x as i32, y.round() as i32, scale, &self.font, line);
        }
    }

    fn draw_watermark(&self, canvas: &mut RgbImage, photo_height: u32) {
        let Some(text) = self.options.watermark.as_deref() else {
            return;
        };
        let size = self.options.canvas;
        let scale = PxScale::from(size as f32 * 0.028);
        let margin = size / 40;
        let (width, height) = text_size(scale, &self.font, text);
        let x = size.saturating_sub(width + margin);
        let y = photo_height.saturating_sub(height + margin);
        draw_text_mut(
            canvas,
            Rgb(self.options.text_color),
            x as i32,
            y as i32,
            scale,
            &self.font,
            text,
        );
    }
}

/// MIME type of an encoded image, from its magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|format| format.to_mime_type())
}

/// Scale down brightness of the rows above `height`.
fn darken(canvas: &mut RgbImage, height: u32, amount: f32) {
    let keep = (1.0 - amount).clamp(0.0, 1.0);
    for (_, y, pixel) in canvas.enumerate_pixels_mut() {
        if y >= height {
            continue;
        }
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as f32 * keep).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    const FONT: &[u8] = include_bytes!("../tests/fixtures/DejaVuSans-Bold.ttf");

    fn composer(options: CoverOptions) -> CoverComposer {
        CoverComposer::from_font_bytes(FONT.to_vec(), options).unwrap()
    }

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_darken_only_touches_photo_rows() {
        let mut canvas = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        darken(&mut canvas, 2, 0.5);
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([50, 50, 50]));
        assert_eq!(canvas.get_pixel(0, 3), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_invalid_font_rejected() {
        let result = CoverComposer::from_font_bytes(vec![1, 2, 3], CoverOptions::default());
        assert!(matches!(result, Err(CoverError::Font(_))));
    }

    #[test]
    fn test_compose_rejects_garbage_source() {
        let composer = composer(CoverOptions::default());
        assert!(matches!(
            composer.compose(b"not an image", "Title", None),
            Err(CoverError::Image(_))
        ));
        assert!(matches!(
            composer.compose(&[], "Title", None),
            Err(CoverError::EmptySource)
        ));
    }

    #[test]
    fn test_compose_produces_square_jpeg_and_caches_it() {
        let composer = composer(CoverOptions {
            canvas: 400,
            watermark: Some("example.com".to_string()),
            ..CoverOptions::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("covers").join("item-1.jpg");

        let cover = composer
            .compose(&png(640, 480, [200, 180, 40]), "Gold climbs again", Some(&cache))
            .unwrap();

        let decoded = image::load_from_memory(&cover.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 400));
        assert_eq!(cover.path.as_deref(), Some(cache.as_path()));
        assert_eq!(std::fs::read(&cache).unwrap(), cover.bytes);
        assert_eq!(cover.layout.lines, vec!["GOLD CLIMBS AGAIN".to_string()]);

        // The banner row is the banner colour, not the photo.
        let banner_y = 400 - cover.layout.banner_height / 4;
        let p = decoded.to_rgb8().get_pixel(2, banner_y).0;
        assert!(p[2] > p[0], "banner pixel {:?} should be blue-ish", p);
    }

    #[test]
    fn test_long_caption_stays_on_canvas() {
        let composer = composer(CoverOptions {
            canvas: 300,
            ..CoverOptions::default()
        });
        let title = "inflation ".repeat(60);
        let cover = composer
            .compose(&png(300, 300, [0, 0, 0]), &title, None)
            .unwrap();

        let photo_height = cover.layout.photo_height(300);
        let text_bottom = photo_height as f32 + cover.layout.lines.len() as f32 * cover.layout.line_height;
        assert!(text_bottom <= 300.0, "caption ends at {}", text_bottom);
        assert_eq!(cover.layout.lines.join(" ").split(' ').count(), 60);
    }

    #[test]
    fn test_sniff_mime() {
        let mut png = Vec::new();
        RgbImage::new(2, 2)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        assert_eq!(sniff_mime(&png), Some("image/png"));
        assert_eq!(sniff_mime(b"not an image"), None);
    }
}

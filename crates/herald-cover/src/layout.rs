//! Caption layout.
//!
//! Line breaking uses an average character width (a fixed fraction of the
//! font size) rather than glyph metrics, so layout is deterministic and can
//! be computed without a font.

/// Tunables for caption layout.
#[derive(Debug, Clone)]
pub struct LayoutOptions {
    /// Canvas width the pixel sizes below are given for. Sizes scale
    /// linearly to other canvases.
    pub reference_canvas: f32,
    /// Preferred font sizes in pixels, largest first.
    pub font_sizes: Vec<f32>,
    /// Smallest size tried once the preferred sizes are exhausted.
    pub min_font_size: f32,
    /// Decrement used below the last preferred size.
    pub shrink_step: f32,
    /// Preferred maximum number of caption lines.
    pub max_lines: usize,
    /// Maximum line width as a fraction of the canvas width.
    pub max_width_ratio: f32,
    /// Estimated average character width as a fraction of the font size.
    pub char_width_ratio: f32,
    /// Line height as a multiple of the font size.
    pub line_height_ratio: f32,
    /// Vertical padding above and below the text, as a fraction of the canvas.
    pub padding_ratio: f32,
    pub min_banner_ratio: f32,
    pub max_banner_ratio: f32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            reference_canvas: 1080.0,
            font_sizes: vec![72.0, 64.0, 56.0, 50.0, 44.0, 40.0, 36.0],
            min_font_size: 18.0,
            shrink_step: 2.0,
            max_lines: 4,
            max_width_ratio: 0.88,
            char_width_ratio: 0.6,
            line_height_ratio: 1.2,
            padding_ratio: 0.035,
            min_banner_ratio: 0.15,
            max_banner_ratio: 0.45,
        }
    }
}

/// Result of laying out a caption on a square canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub font_size: f32,
    /// Upper-cased caption lines, in order.
    pub lines: Vec<String>,
    pub line_height: f32,
    /// Height of the banner at the bottom of the canvas.
    pub banner_height: u32,
}

impl CaptionLayout {
    /// Height of the photo area above the banner.
    pub fn photo_height(&self, canvas: u32) -> u32 {
        canvas.saturating_sub(self.banner_height)
    }
}

/// Smallest font size the banner fitting will go down to.
const MIN_RENDER_SIZE: f32 = 1.0;

/// Estimated rendered width of `text` at `font_size`.
pub fn estimate_width(text: &str, font_size: f32, char_width_ratio: f32) -> f32 {
    text.chars().count() as f32 * font_size * char_width_ratio
}

/// Greedy word wrap. A word wider than `max_width` gets a line of its own;
/// words are never split or dropped.
pub fn wrap_words(words: &[&str], font_size: f32, max_width: f32, char_width_ratio: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in words {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate_len = current.chars().count() + 1 + word.chars().count();
        if candidate_len as f32 * font_size * char_width_ratio <= max_width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Lay out `title` for a `canvas`-pixel square cover.
///
/// Picks the largest size whose wrapped text fits `max_lines`, keeps
/// shrinking below the preferred sizes if needed, and finally lets the line
/// count exceed `max_lines` rather than lose words. When even that overflows
/// the tallest banner, the font shrinks further until every line fits.
pub fn layout_caption(title: &str, canvas: u32, options: &LayoutOptions) -> CaptionLayout {
    let upper = title.to_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();
    let max_width = canvas as f32 * options.max_width_ratio;
    let scale = if options.reference_canvas > 0.0 {
        canvas as f32 / options.reference_canvas
    } else {
        1.0
    };
    let min_font_size = options.min_font_size * scale;
    let shrink_step = options.shrink_step * scale;

    let mut sizes: Vec<f32> = options.font_sizes.iter().map(|size| size * scale).collect();
    let mut next = sizes.last().copied().unwrap_or(min_font_size) - shrink_step;
    while next >= min_font_size && shrink_step > 0.0 {
        sizes.push(next);
        next -= shrink_step;
    }
    if sizes.is_empty() {
        sizes.push(min_font_size);
    }

    let mut chosen = None;
    for &size in &sizes {
        let lines = wrap_words(&words, size, max_width, options.char_width_ratio);
        if lines.len() <= options.max_lines {
            chosen = Some((size, lines));
            break;
        }
    }

    let (mut font_size, mut lines) = chosen.unwrap_or_else(|| {
        let size = sizes.last().copied().unwrap_or(min_font_size);
        (size, wrap_words(&words, size, max_width, options.char_width_ratio))
    });

    let padding = canvas as f32 * options.padding_ratio;
    let min_banner = canvas as f32 * options.min_banner_ratio;
    let max_banner = canvas as f32 * options.max_banner_ratio;
    let text_room = (max_banner - 2.0 * padding).max(0.0);
    while lines.len() as f32 * font_size * options.line_height_ratio > text_room
        && font_size > MIN_RENDER_SIZE
    {
        font_size = (font_size * 0.9).max(MIN_RENDER_SIZE);
        lines = wrap_words(&words, font_size, max_width, options.char_width_ratio);
    }

    let line_height = font_size * options.line_height_ratio;
    let wanted = lines.len() as f32 * line_height + 2.0 * padding;
    let banner_height = wanted.clamp(min_banner, max_banner).round() as u32;

    CaptionLayout {
        font_size,
        lines,
        line_height,
        banner_height,
    }
}

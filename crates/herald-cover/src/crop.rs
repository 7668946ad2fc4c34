//! Cover-fit resizing with an attention-weighted crop.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};

/// Scale `source` to cover `width` x `height`, then crop the overflow,
/// keeping the window with the most edge detail.
pub fn cover_fit(source: &DynamicImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = (source.width().max(1), source.height().max(1));
    let scale = (width as f64 / src_w as f64).max(height as f64 / src_h as f64);
    let scaled_w = ((src_w as f64 * scale).ceil() as u32).max(width);
    let scaled_h = ((src_h as f64 * scale).ceil() as u32).max(height);

    let resized = imageops::resize(&source.to_rgb8(), scaled_w, scaled_h, FilterType::Triangle);
    if scaled_w == width && scaled_h == height {
        return resized;
    }

    let gray = imageops::grayscale(&resized);
    let (x, y) = if scaled_w > width {
        (best_window(&column_energy(&gray), width as usize) as u32, 0)
    } else {
        (0, best_window(&row_energy(&gray), height as usize) as u32)
    };

    imageops::crop_imm(&resized, x, y, width, height).to_image()
}

/// Gradient magnitude summed per column.
fn column_energy(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let mut energy = vec![0u64; w as usize];
    for y in 0..h {
        for x in 1..w {
            let a = gray.get_pixel(x - 1, y)[0] as i32;
            let b = gray.get_pixel(x, y)[0] as i32;
            energy[x as usize] += (a - b).unsigned_abs() as u64;
        }
    }
    energy
}

/// Gradient magnitude summed per row.
fn row_energy(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let mut energy = vec![0u64; h as usize];
    for y in 1..h {
        for x in 0..w {
            let a = gray.get_pixel(x, y - 1)[0] as i32;
            let b = gray.get_pixel(x, y)[0] as i32;
            energy[y as usize] += (a - b).unsigned_abs() as u64;
        }
    }
    energy
}

/// Start offset of the `window`-long run with the highest total. Ties go to
/// the offset closest to centre, so a flat profile yields a centre crop.
pub fn best_window(profile: &[u64], window: usize) -> usize {
    if window == 0 || profile.len() <= window {
        return 0;
    }
    let last = profile.len() - window;
    let centre = last / 2;

    let mut sum: u64 = profile[..window].iter().sum();
    let mut best = (sum, 0usize);
    for start in 1..=last {
        sum = sum - profile[start - 1] + profile[start + window - 1];
        let better = sum > best.0
            || (sum == best.0 && start.abs_diff(centre) < best.1.abs_diff(centre));
        if better {
            best = (sum, start);
        }
    }
    best.1
}

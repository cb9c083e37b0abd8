//! Scaling pages down to fit within the OCR service's size limits.

use image::{DynamicImage, imageops::FilterType};

/// Compute the size of an image scaled to fit within `max_width` by
/// `max_height`, preserving its aspect ratio.
///
/// Images strictly smaller than the bounds on both axes are returned
/// unchanged. Anything else, including an image exactly at the bounds, is
/// rescaled, and the result is truncated rather than rounded.
///
/// Zero-sized inputs are a caller error. We never return a zero dimension for
/// them, but the result is otherwise meaningless.
pub fn fit_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    debug_assert!(width > 0 && height > 0, "cannot fit an empty image");
    if width < max_width && height < max_height {
        return (width, height);
    }

    // Compare aspect ratios, then scale by whichever axis is the tighter
    // constraint. Integer math keeps the constrained axis exactly at its bound.
    let (width, height) = (u64::from(width), u64::from(height));
    let (max_w, max_h) = (u64::from(max_width), u64::from(max_height));
    let (new_width, new_height) = if width * max_h > height * max_w {
        (max_w, height * max_w / width)
    } else {
        (width * max_h / height, max_h)
    };
    let clamp = |dim: u64| u32::try_from(dim.max(1)).unwrap_or(u32::MAX);
    (clamp(new_width), clamp(new_height))
}

/// Resample `image` to fit within `max_width` by `max_height`.
///
/// Returns the image itself when no scaling is needed.
pub fn resize_to_fit(image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) = fit_dimensions(width, height, max_width, max_height);
    if (new_width, new_height) == (width, height) {
        image
    } else {
        image.resize_exact(new_width, new_height, FilterType::CatmullRom)
    }
}

use image::{DynamicImage, imageops};

/// Undo the EXIF orientation so the image is drawn upright.
///
/// | tag | transform |
/// |-----|-----------|
/// | 1 / none | identity |
/// | 2 | flip horizontal |
/// | 3 | rotate 180° |
/// | 4 | flip vertical |
/// | 5 | transpose |
/// | 6 | rotate 90° clockwise |
/// | 7 | transverse |
/// | 8 | rotate 270° clockwise |
///
/// Unknown values leave the image untouched.
pub fn correct(img: DynamicImage, orientation: Option<u16>) -> DynamicImage {
    match orientation {
        None | Some(1) => img,
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => transpose(&img),
        Some(6) => img.rotate90(),
        Some(7) => transverse(&img),
        Some(8) => img.rotate270(),
        Some(other) => {
            log::warn!("Ignoring out-of-range orientation value {other}");
            img
        }
    }
}

/// Mirror across the main diagonal: pixel (x, y) moves to (y, x).
fn transpose(img: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageRgba8(imageops::flip_horizontal(&imageops::rotate90(&img.to_rgba8())))
}

/// Mirror across the anti-diagonal.
fn transverse(img: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageRgba8(imageops::flip_horizontal(&imageops::rotate270(&img.to_rgba8())))
}

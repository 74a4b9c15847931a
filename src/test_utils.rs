//! Test fixtures: JPEGs and PNGs with hand-built EXIF segments and a system
//! font lookup.

use ab_glyph::FontVec;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

use crate::stamp::overlay::{FONT_CANDIDATES, load_font};

/// A TIFF field value for [`jpeg_with_exif`].
#[derive(Debug, Clone)]
pub enum ExifEntry {
    Ascii(&'static str),
    Short(u16),
    Long(u32),
    Rationals(Vec<(u32, u32)>),
}

impl ExifEntry {
    fn type_and_count(&self) -> (u16, u32) {
        match self {
            ExifEntry::Ascii(s) => (2, s.len() as u32 + 1),
            ExifEntry::Short(_) => (3, 1),
            ExifEntry::Long(_) => (4, 1),
            ExifEntry::Rationals(r) => (5, r.len() as u32),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            ExifEntry::Ascii(s) => {
                let mut b = s.as_bytes().to_vec();
                b.push(0);
                b
            }
            ExifEntry::Short(v) => v.to_le_bytes().to_vec(),
            ExifEntry::Long(v) => v.to_le_bytes().to_vec(),
            ExifEntry::Rationals(r) => r
                .iter()
                .flat_map(|(n, d)| n.to_le_bytes().into_iter().chain(d.to_le_bytes()))
                .collect(),
        }
    }
}

fn padded_len(len: usize) -> u32 {
    (len + len % 2) as u32
}

fn ifd_size(entries: &[(u16, ExifEntry)]) -> u32 {
    let data: u32 = entries
        .iter()
        .map(|(_, e)| e.bytes().len())
        .filter(|len| *len > 4)
        .map(padded_len)
        .sum();
    2 + 12 * entries.len() as u32 + 4 + data
}

/// Append a little-endian IFD that starts at TIFF offset `start`.
fn write_ifd(out: &mut Vec<u8>, entries: &[(u16, ExifEntry)], start: u32) {
    let mut sorted: Vec<&(u16, ExifEntry)> = entries.iter().collect();
    sorted.sort_by_key(|(tag, _)| *tag);

    let mut data = Vec::new();
    let data_start = start + 2 + 12 * sorted.len() as u32 + 4;

    out.extend_from_slice(&(sorted.len() as u16).to_le_bytes());
    for (tag, entry) in sorted {
        let (kind, count) = entry.type_and_count();
        let bytes = entry.bytes();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        if bytes.len() <= 4 {
            let mut inline = bytes.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            let offset = data_start + data.len() as u32;
            out.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&bytes);
            if bytes.len() % 2 == 1 {
                data.push(0);
            }
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&data);
}

/// Little-endian TIFF body with IFD0 plus optional Exif and GPS sub-IFDs.
fn tiff_body(
    ifd0: &[(u16, ExifEntry)],
    exif_ifd: &[(u16, ExifEntry)],
    gps_ifd: &[(u16, ExifEntry)],
) -> Vec<u8> {
    let mut root: Vec<(u16, ExifEntry)> = ifd0.to_vec();
    // Pointer sizes do not depend on their values, so size with placeholders first.
    if !exif_ifd.is_empty() {
        root.push((0x8769, ExifEntry::Long(0)));
    }
    if !gps_ifd.is_empty() {
        root.push((0x8825, ExifEntry::Long(0)));
    }

    let exif_start = 8 + ifd_size(&root);
    let gps_start = exif_start + if exif_ifd.is_empty() { 0 } else { ifd_size(exif_ifd) };
    for (tag, entry) in root.iter_mut() {
        match *tag {
            0x8769 => *entry = ExifEntry::Long(exif_start),
            0x8825 => *entry = ExifEntry::Long(gps_start),
            _ => {}
        }
    }

    let mut out = b"II".to_vec();
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());
    write_ifd(&mut out, &root, 8);
    if !exif_ifd.is_empty() {
        write_ifd(&mut out, exif_ifd, exif_start);
    }
    if !gps_ifd.is_empty() {
        write_ifd(&mut out, gps_ifd, gps_start);
    }
    out
}

/// Encode a small image as JPEG bytes.
pub fn jpeg_bytes(img: &RgbaImage) -> Vec<u8> {
    let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .unwrap();
    cursor.into_inner()
}

/// A 16x8 JPEG carrying the given EXIF entries in an APP1 segment.
///
/// With all three entry lists empty no APP1 segment is written.
pub fn jpeg_with_exif(
    ifd0: &[(u16, ExifEntry)],
    exif_ifd: &[(u16, ExifEntry)],
    gps_ifd: &[(u16, ExifEntry)],
) -> Vec<u8> {
    let jpeg = jpeg_bytes(&RgbaImage::from_pixel(16, 8, Rgba([200, 120, 40, 255])));
    if ifd0.is_empty() && exif_ifd.is_empty() && gps_ifd.is_empty() {
        return jpeg;
    }

    let tiff = tiff_body(ifd0, exif_ifd, gps_ifd);
    let segment_len = (2 + 6 + tiff.len()) as u16;
    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&jpeg[..2]); // SOI
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// `img` as PNG carrying the given IFD0 entries in an `eXIf` chunk.
pub fn png_with_exif(img: &RgbaImage, ifd0: &[(u16, ExifEntry)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = PngEncoder::new(&mut out);
    encoder.set_exif_metadata(tiff_body(ifd0, &[], &[])).unwrap();
    encoder
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .unwrap();
    out
}

/// First loadable system font, or `None` on machines without one.
///
/// Tests that render text skip themselves when this returns `None`.
pub fn system_font() -> Option<FontVec> {
    FONT_CANDIDATES
        .iter()
        .map(std::path::Path::new)
        .filter(|p| p.exists())
        .find_map(|p| load_font(p).ok())
}

/// Image whose pixels all differ, so geometric transforms are observable.
pub fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 17 % 256) as u8, (y * 31 % 256) as u8, ((x + y * width) % 256) as u8, 255])
    })
}

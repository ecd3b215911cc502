//! Materialized pixel buffers and the transforms metadata can describe.

use rgb::{FromSlice, RGB8};

use crate::error::{Error, Result};
use crate::options::{TransformMode, TransformOptions};

/// Color interpretation of a decoded image, as far as the container layer
/// knows it. The pixel payload itself stays opaque to everything except
/// materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorModel {
    #[default]
    Unknown,
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
    Indexed,
    YCbCr,
    Cmyk,
}

/// Dimensions and color model, available without touching pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    pub color: ColorModel,
}

/// Byte layout of a materialized [`Pixmap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray8,
    GrayAlpha8,
    Rgb8,
    Rgba8,
    /// One palette index per pixel; `palette` holds the RGB entries.
    Indexed8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Gray8 | PixelLayout::Indexed8 => 1,
            PixelLayout::GrayAlpha8 => 2,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

/// A fully materialized image.
#[derive(Debug, Clone, PartialEq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
    pub palette: Option<Vec<RGB8>>,
}

impl Pixmap {
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let expect = width as usize * height as usize * layout.bytes_per_pixel();
        if data.len() != expect {
            return Err(Error::format(format!(
                "pixel buffer is {} bytes, {}x{} {:?} needs {}",
                data.len(),
                width,
                height,
                layout,
                expect
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
            palette: None,
        })
    }

    pub fn with_palette(mut self, palette: Vec<RGB8>) -> Self {
        self.palette = Some(palette);
        self
    }

    /// RGB view of the pixel buffer, when the layout is three-channel.
    pub fn as_rgb(&self) -> Option<&[RGB8]> {
        match self.layout {
            PixelLayout::Rgb8 => Some(self.data.as_rgb()),
            _ => None,
        }
    }

    fn bytes_per_pixel(&self) -> usize {
        self.layout.bytes_per_pixel()
    }

    // ── Rotation ─────────────────────────────────────────────────────────────

    pub fn rotate_180(&mut self) {
        let bpp = self.bytes_per_pixel();
        let mut out = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(bpp).rev() {
            out.extend_from_slice(px);
        }
        self.data = out;
    }

    /// Rotate 90 degrees clockwise; width and height swap.
    pub fn rotate_90_cw(&mut self) {
        let (w, h, bpp) = (self.width as usize, self.height as usize, self.bytes_per_pixel());
        let mut out = vec![0u8; self.data.len()];
        for y in 0..h {
            for x in 0..w {
                let src = (y * w + x) * bpp;
                let dst = (x * h + (h - 1 - y)) * bpp;
                out[dst..dst + bpp].copy_from_slice(&self.data[src..src + bpp]);
            }
        }
        self.data = out;
        std::mem::swap(&mut self.width, &mut self.height);
    }

    /// Rotate 90 degrees counter-clockwise; width and height swap.
    pub fn rotate_90_ccw(&mut self) {
        let (w, h, bpp) = (self.width as usize, self.height as usize, self.bytes_per_pixel());
        let mut out = vec![0u8; self.data.len()];
        for y in 0..h {
            for x in 0..w {
                let src = (y * w + x) * bpp;
                let dst = ((w - 1 - x) * h + y) * bpp;
                out[dst..dst + bpp].copy_from_slice(&self.data[src..src + bpp]);
            }
        }
        self.data = out;
        std::mem::swap(&mut self.width, &mut self.height);
    }

    // ── Gamma ────────────────────────────────────────────────────────────────

    /// Apply a gamma curve to every color channel through a lookup table.
    /// `encoded_gamma` is the file's gamma value scaled by 100000, as PNG
    /// stores it; alpha channels and palette indices are left alone.
    pub fn apply_gamma(&mut self, encoded_gamma: u32, mode: TransformMode) {
        if encoded_gamma == 0 || mode == TransformMode::None {
            return;
        }
        // Correction exponent for a 2.2 display, the libpng convention:
        // a file gamma of 1/2.2 needs no correction at all.
        let file_gamma = encoded_gamma as f64 / 100_000.0;
        let exponent = match mode {
            TransformMode::Forward => 1.0 / (file_gamma * 2.2),
            TransformMode::Reverse => file_gamma * 2.2,
            TransformMode::None => return,
        };
        let lut: Vec<u8> = (0..=255u32)
            .map(|v| {
                let x = v as f64 / 255.0;
                (x.powf(exponent) * 255.0).round().clamp(0.0, 255.0) as u8
            })
            .collect();

        let bpp = self.bytes_per_pixel();
        let color_channels = match self.layout {
            PixelLayout::Gray8 => 1,
            PixelLayout::GrayAlpha8 => 1,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 3,
            PixelLayout::Indexed8 => 0,
        };
        for px in self.data.chunks_exact_mut(bpp) {
            for c in &mut px[..color_channels] {
                *c = lut[*c as usize];
            }
        }
    }
}

/// Apply the requested transform axes to a materialized image.
///
/// `gamma` is the container's gamma field when present; `orientation` is
/// the tag-table orientation when a sub-codec decoded one. Axes whose
/// inputs are missing are silently left alone — transforms describe how to
/// interpret metadata, not a promise the metadata exists.
pub fn apply_transforms(
    pixmap: &mut Pixmap,
    transform: &TransformOptions,
    gamma: Option<u32>,
    orientation: Option<u16>,
) {
    if let Some(g) = gamma {
        pixmap.apply_gamma(g, transform.gamma);
    }

    if transform.rotation != TransformMode::None {
        // Orientation values per the TIFF/EXIF convention.
        match orientation {
            Some(3) => pixmap.rotate_180(),
            Some(6) => match transform.rotation {
                TransformMode::Forward => pixmap.rotate_90_cw(),
                TransformMode::Reverse => pixmap.rotate_90_ccw(),
                TransformMode::None => {}
            },
            Some(8) => match transform.rotation {
                TransformMode::Forward => pixmap.rotate_90_ccw(),
                TransformMode::Reverse => pixmap.rotate_90_cw(),
                TransformMode::None => {}
            },
            Some(other) if other != 1 => {
                tracing::debug!(orientation = other, "unsupported orientation, not applied");
            }
            _ => {}
        }
    }

    if transform.color != TransformMode::None {
        // Needs a profile-aware color collaborator; recorded, not applied.
        tracing::debug!("color transform requested but no color collaborator is wired in");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Pixmap {
        let data: Vec<u8> = (0..w * h * 3).map(|i| (i % 251) as u8).collect();
        Pixmap::new(w, h, PixelLayout::Rgb8, data).unwrap()
    }

    #[test]
    fn new_rejects_short_buffer() {
        assert!(matches!(
            Pixmap::new(2, 2, PixelLayout::Rgb8, vec![0; 11]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn rotate_90_cw_swaps_dimensions() {
        let mut p = gradient(4, 2);
        let first_row: Vec<u8> = p.data[..4 * 3].to_vec();
        p.rotate_90_cw();
        assert_eq!((p.width, p.height), (2, 4));
        // The old top-left pixel ends up in the top-right corner.
        assert_eq!(&p.data[3..6], &first_row[..3]);
    }

    #[test]
    fn rotate_180_twice_is_identity() {
        let mut p = gradient(3, 3);
        let orig = p.data.clone();
        p.rotate_180();
        assert_ne!(p.data, orig);
        p.rotate_180();
        assert_eq!(p.data, orig);
    }

    #[test]
    fn gamma_identity_when_unset() {
        let mut p = gradient(2, 2);
        let orig = p.data.clone();
        p.apply_gamma(0, TransformMode::Forward);
        assert_eq!(p.data, orig);
    }

    #[test]
    fn gamma_moves_midtones() {
        let mut p = Pixmap::new(1, 1, PixelLayout::Gray8, vec![128]).unwrap();
        p.apply_gamma(100_000, TransformMode::Forward); // gamma 1.0 file
        assert!(p.data[0] > 128, "midtone should brighten, got {}", p.data[0]);
    }

    #[test]
    fn gamma_near_unity_for_encoded_files() {
        let mut p = Pixmap::new(1, 1, PixelLayout::Gray8, vec![128]).unwrap();
        p.apply_gamma(45455, TransformMode::Forward); // 1/2.2, the common value
        assert!((p.data[0] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn rgb_view() {
        let p = gradient(2, 1);
        let px = p.as_rgb().unwrap();
        assert_eq!(px.len(), 2);
        assert_eq!(px[0], RGB8 { r: 0, g: 1, b: 2 });
    }
}

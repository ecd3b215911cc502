//! Verbatim pixel-bearing chunks and on-demand materialization.

use byteorder::{BigEndian, ByteOrder};
use rgb::RGB8;

use crate::codec::{get_codec, CodecId};
use crate::error::{Error, Result};
use crate::image::{PixelLayout, Pixmap};
use crate::png::ChunkType;

/// One chunk exactly as read, including its original integrity code.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub ctype: ChunkType,
    pub payload: Vec<u8>,
    pub crc: u32,
}

/// The pixel-bearing chunks of a decoded image, kept verbatim so the file
/// can be re-emitted byte-for-byte without ever inflating the pixels.
///
/// [`Body::materialize`] parses the retained chunks into a [`Pixmap`] at
/// most once and memoizes the result; the verbatim chunks stay valid for
/// round-tripping afterwards. Replacing the pixels with [`Body::set_image`]
/// marks the body dirty, and the writer re-derives the header and image
/// data chunks instead of replaying them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub(crate) ihdr: Option<RawChunk>,
    pub(crate) plte: Option<RawChunk>,
    pub(crate) trns: Option<RawChunk>,
    pub(crate) idat: Vec<RawChunk>,
    pub(crate) image: Option<Pixmap>,
    pub(crate) dirty: bool,
}

/// Parsed IHDR fields, needed both for materialization and re-encode.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub interlace: u8,
}

impl Header {
    pub(crate) fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != 13 {
            return Err(Error::format(format!(
                "IHDR is {} bytes, want 13",
                payload.len()
            )));
        }
        let width = BigEndian::read_u32(&payload[0..4]);
        let height = BigEndian::read_u32(&payload[4..8]);
        if width == 0 || height == 0 {
            return Err(Error::format("zero image dimension"));
        }
        if payload[10] != 0 {
            return Err(Error::format("unknown compression method"));
        }
        if payload[11] != 0 {
            return Err(Error::format("unknown filter method"));
        }
        Ok(Self {
            width,
            height,
            bit_depth: payload[8],
            color_type: payload[9],
            interlace: payload[12],
        })
    }

    fn layout(&self) -> Result<PixelLayout> {
        if self.bit_depth != 8 {
            return Err(Error::format(format!(
                "materialization supports 8-bit depth, file has {}",
                self.bit_depth
            )));
        }
        match self.color_type {
            0 => Ok(PixelLayout::Gray8),
            2 => Ok(PixelLayout::Rgb8),
            3 => Ok(PixelLayout::Indexed8),
            4 => Ok(PixelLayout::GrayAlpha8),
            6 => Ok(PixelLayout::Rgba8),
            t => Err(Error::format(format!("unknown color type {t}"))),
        }
    }
}

impl Body {
    /// Whether the pixels were replaced since the file was read.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replace the image. The verbatim chunks are no longer authoritative
    /// and the writer will re-encode from the pixmap.
    pub fn set_image(&mut self, image: Pixmap) {
        self.image = Some(image);
        self.dirty = true;
    }

    /// The materialized image, parsing the retained chunks exactly once.
    pub fn materialize(&mut self) -> Result<&Pixmap> {
        if self.image.is_none() {
            let pixmap = self.decode_pixels()?;
            self.image = Some(pixmap);
        }
        // Populated just above when it was empty.
        self.image
            .as_ref()
            .ok_or_else(|| Error::format("image unavailable"))
    }

    fn header(&self) -> Result<Header> {
        let ihdr = self
            .ihdr
            .as_ref()
            .ok_or_else(|| Error::format("no header chunk retained"))?;
        Header::parse(&ihdr.payload)
    }

    fn decode_pixels(&self) -> Result<Pixmap> {
        let header = self.header()?;
        if header.interlace != 0 {
            return Err(Error::format(
                "interlaced images cannot be materialized",
            ));
        }
        let layout = header.layout()?;
        if self.idat.is_empty() {
            return Err(Error::format("no image data chunks retained"));
        }

        let mut compressed = Vec::new();
        for chunk in &self.idat {
            compressed.extend_from_slice(&chunk.payload);
        }
        let raw = get_codec(CodecId::Deflate)?.decompress(&compressed)?;

        let bpp = layout.bytes_per_pixel();
        let stride = header.width as usize * bpp;
        let expect = (stride + 1) * header.height as usize;
        if raw.len() != expect {
            return Err(Error::format(format!(
                "decompressed image is {} bytes, want {expect}",
                raw.len()
            )));
        }

        let mut pixels = vec![0u8; stride * header.height as usize];
        let mut prev_row = vec![0u8; stride];
        for y in 0..header.height as usize {
            let line = &raw[y * (stride + 1)..(y + 1) * (stride + 1)];
            let (filter, data) = (line[0], &line[1..]);
            let row = &mut pixels[y * stride..(y + 1) * stride];
            row.copy_from_slice(data);
            unfilter_row(filter, row, &prev_row, bpp)?;
            prev_row.copy_from_slice(row);
        }

        let mut pixmap = Pixmap::new(header.width, header.height, layout, pixels)?;
        if layout == PixelLayout::Indexed8 {
            pixmap = pixmap.with_palette(self.palette_entries()?);
        }
        Ok(pixmap)
    }

    fn palette_entries(&self) -> Result<Vec<RGB8>> {
        let plte = self
            .plte
            .as_ref()
            .ok_or_else(|| Error::format("indexed image without a palette chunk"))?;
        Ok(plte
            .payload
            .chunks_exact(3)
            .map(|c| RGB8 {
                r: c[0],
                g: c[1],
                b: c[2],
            })
            .collect())
    }
}

fn unfilter_row(filter: u8, row: &mut [u8], prev: &[u8], bpp: usize) -> Result<()> {
    match filter {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for i in 0..row.len() {
                row[i] = row[i].wrapping_add(prev[i]);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                let up = prev[i] as u16;
                row[i] = row[i].wrapping_add(((left + up) / 2) as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as i16 } else { 0 };
                let up = prev[i] as i16;
                let upleft = if i >= bpp { prev[i - bpp] as i16 } else { 0 };
                row[i] = row[i].wrapping_add(paeth(left, up, upleft));
            }
        }
        f => return Err(Error::format(format!("unknown filter type {f}"))),
    }
    Ok(())
}

fn paeth(a: i16, b: i16, c: i16) -> u8 {
    let p = a + b - c;
    let (pa, pb, pc) = ((p - a).abs(), (p - b).abs(), (p - c).abs());
    if pa <= pb && pa <= pc {
        a as u8
    } else if pb <= pc {
        b as u8
    } else {
        c as u8
    }
}

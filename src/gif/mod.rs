//! GIF: the block-sequence format.
//!
//! Records are blocks: a one-byte introducer, an optional extension label,
//! then either fixed-layout fields or a run of length-prefixed data
//! sub-blocks ending in a zero terminator. There is no integrity code.

pub mod reader;
pub mod writer;

use rgb::RGB8;

use crate::codec::{get_codec, CodecId};
use crate::error::{Error, Result};
use crate::image::{ColorModel, ImageConfig, PixelLayout, Pixmap};
use crate::meta::{subcodec, Deferred, ExtensionStore, Packet};

pub(crate) const MAGIC_87: &[u8; 6] = b"GIF87a";
pub(crate) const MAGIC_89: &[u8; 6] = b"GIF89a";

pub(crate) mod block {
    pub const EXTENSION: u8 = 0x21;
    pub const IMAGE: u8 = 0x2C;
    pub const TRAILER: u8 = 0x3B;

    pub const LABEL_PLAIN_TEXT: u8 = 0x01;
    pub const LABEL_GRAPHIC_CONTROL: u8 = 0xF9;
    pub const LABEL_COMMENT: u8 = 0xFE;
    pub const LABEL_APPLICATION: u8 = 0xFF;
}

/// Application-extension identities the walker understands.
pub(crate) mod app {
    pub const NETSCAPE: &str = "NETSCAPE2.0";
    pub const XMP: &str = "XMP DataXMP";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    V87a,
    #[default]
    V89a,
}

/// Logical screen descriptor fields other than the dimensions, kept as
/// read so re-emission is exact.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScreenDescriptor {
    pub packed: u8,
    pub background: u8,
    pub aspect: u8,
}

// ── Body ─────────────────────────────────────────────────────────────────────

/// One graphic rendering block, kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyItem {
    Frame(Frame),
    /// A plain-text rendering block: its graphic control payload (if any)
    /// and the raw sub-block stream, terminator included.
    PlainText {
        gce: Option<[u8; 4]>,
        blocks: Vec<u8>,
    },
}

/// One image frame exactly as read.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Graphic control payload preceding this frame, when present.
    pub(crate) gce: Option<[u8; 4]>,
    /// Left, top, width, height (little-endian u16 each) and the packed
    /// local-palette byte.
    pub(crate) descriptor: [u8; 9],
    pub(crate) local_palette: Option<Vec<u8>>,
    pub(crate) lzw_min_code: u8,
    /// Raw raster sub-block stream, length bytes and terminator included.
    pub(crate) raster: Vec<u8>,
}

impl Frame {
    pub(crate) fn width(&self) -> u32 {
        u16::from_le_bytes([self.descriptor[4], self.descriptor[5]]) as u32
    }

    pub(crate) fn height(&self) -> u32 {
        u16::from_le_bytes([self.descriptor[6], self.descriptor[7]]) as u32
    }

    fn interlaced(&self) -> bool {
        self.descriptor[8] & 0x40 != 0
    }
}

/// The verbatim pixel-bearing blocks of a GIF stream.
///
/// Materialization needs the `lzw` compression collaborator, which is not
/// bundled; byte-exact re-emission never does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub(crate) screen: ScreenDescriptor,
    pub(crate) global_palette: Option<Vec<u8>>,
    pub(crate) items: Vec<BodyItem>,
    pub(crate) image: Option<Pixmap>,
}

impl Body {
    /// The first frame, decoded through the collaborator exactly once and
    /// memoized. The collaborator receives the minimum code size followed
    /// by the concatenated raster bytes.
    pub fn materialize(&mut self) -> Result<&Pixmap> {
        if self.image.is_none() {
            let frame = self
                .items
                .iter()
                .find_map(|item| match item {
                    BodyItem::Frame(f) => Some(f),
                    BodyItem::PlainText { .. } => None,
                })
                .ok_or_else(|| Error::format("no image frame retained"))?;
            if frame.interlaced() {
                return Err(Error::format("interlaced rasters cannot be materialized"));
            }

            let codec = get_codec(CodecId::Lzw)?;
            let mut stream = vec![frame.lzw_min_code];
            stream.extend_from_slice(&concat_sub_blocks(&frame.raster)?);
            let pixels = codec.decompress(&stream)?;

            let (w, h) = (frame.width(), frame.height());
            if pixels.len() != w as usize * h as usize {
                return Err(Error::format(format!(
                    "collaborator produced {} bytes for a {w}x{h} raster",
                    pixels.len()
                )));
            }

            let palette_bytes = frame
                .local_palette
                .as_deref()
                .or(self.global_palette.as_deref())
                .ok_or_else(|| Error::format("no palette for indexed raster"))?;
            let palette: Vec<RGB8> = palette_bytes
                .chunks_exact(3)
                .map(|c| RGB8 {
                    r: c[0],
                    g: c[1],
                    b: c[2],
                })
                .collect();

            self.image =
                Some(Pixmap::new(w, h, PixelLayout::Indexed8, pixels)?.with_palette(palette));
        }
        self.image
            .as_ref()
            .ok_or_else(|| Error::format("image unavailable"))
    }
}

/// Strip sub-block framing: concatenate the data bytes of a raw
/// length-prefixed sub-block stream.
pub(crate) fn concat_sub_blocks(raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        let Some(&len) = raw.get(pos) else {
            return Err(Error::format("sub-block stream missing its terminator"));
        };
        pos += 1;
        if len == 0 {
            return Ok(out);
        }
        let end = pos + len as usize;
        let Some(data) = raw.get(pos..end) else {
            return Err(Error::format("sub-block truncated"));
        };
        out.extend_from_slice(data);
        pos = end;
    }
}

// ── Metadata aggregate ───────────────────────────────────────────────────────

/// Everything a GIF file says about itself besides the raster data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub color: ColorModel,
    pub version: Version,

    /// Animation loop count from a NETSCAPE2.0 application block.
    pub loop_count: Option<u16>,
    /// Comment extension contents, in file order.
    pub comments: Vec<String>,

    /// Application extensions the walker had no handler for, keyed by the
    /// application identifier plus authentication code as read.
    pub extensions: ExtensionStore<String>,

    pub(crate) packet: Deferred<Packet>,
}

impl Metadata {
    pub fn config(&self) -> ImageConfig {
        ImageConfig {
            width: self.width,
            height: self.height,
            color: self.color,
        }
    }

    /// The embedded annotation packet, decoding it on first access.
    pub fn packet(&mut self) -> Result<Option<&Packet>> {
        self.packet.get_with(subcodec::decode_packet)
    }

    pub fn set_packet(&mut self, packet: Packet) {
        self.packet.set(packet);
    }

    pub fn set_packet_raw(&mut self, bytes: Vec<u8>) {
        self.packet = Deferred::Raw(bytes);
    }

    pub fn packet_raw(&self) -> Option<&[u8]> {
        self.packet.raw()
    }

    pub(crate) fn force_deferred(&mut self) {
        let _ = self.packet();
    }
}

//! JPEG: the marker-segment format.
//!
//! Records are segments — an `FF`-prefixed marker byte followed by a
//! big-endian length that counts itself, then the payload. There is no
//! per-segment integrity code. Entropy-coded scan data after SOS is not
//! length-framed and is captured verbatim through to the next real marker.

pub mod reader;
pub mod writer;

use crate::codec::{get_codec, CodecId};
use crate::error::{Error, Result};
use crate::image::{ColorModel, ImageConfig, PixelLayout, Pixmap};
use crate::meta::{subcodec, ColorProfile, Deferred, ExtensionStore, Packet, TagTable};

// ── Markers and tags ─────────────────────────────────────────────────────────

pub(crate) mod marker {
    pub const SOI: u8 = 0xD8;
    pub const EOI: u8 = 0xD9;
    pub const SOS: u8 = 0xDA;
    pub const DQT: u8 = 0xDB;
    pub const DNL: u8 = 0xDC;
    pub const DRI: u8 = 0xDD;
    pub const DHT: u8 = 0xC4;
    pub const COM: u8 = 0xFE;
    pub const TEM: u8 = 0x01;
    pub const APP0: u8 = 0xE0;
    pub const APP1: u8 = 0xE1;
    pub const APP2: u8 = 0xE2;
    pub const APP14: u8 = 0xEE;
    pub const APP15: u8 = 0xEF;
    pub const RST0: u8 = 0xD0;
    pub const RST7: u8 = 0xD7;

    /// Start-of-frame markers, every variant with the common layout.
    pub fn is_sof(m: u8) -> bool {
        matches!(
            m,
            0xC0 | 0xC1 | 0xC2 | 0xC3 | 0xC5 | 0xC6 | 0xC7 | 0xC9 | 0xCA | 0xCB | 0xCD | 0xCE
                | 0xCF
        )
    }

    pub fn is_app(m: u8) -> bool {
        (APP0..=APP15).contains(&m)
    }
}

/// Identifying prefixes inside APPn payloads.
pub(crate) mod tag {
    pub const JFIF: &[u8] = b"JFIF\0";
    pub const EXIF: &[u8] = b"Exif\0\0";
    pub const XMP: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
    pub const ICC: &[u8] = b"ICC_PROFILE\0";
    pub const ADOBE: &[u8] = b"Adobe";
}

/// Largest legal segment payload: the length field is 16 bits and counts
/// itself.
pub const MAX_SEGMENT_LEN: usize = 65533;

/// Bytes of profile data that fit in one `ICC_PROFILE` segment after the
/// tag, index, and count.
pub(crate) const MAX_PROFILE_CHUNK: usize = MAX_SEGMENT_LEN - tag::ICC.len() - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Unitless,
    Inch,
    Centimeter,
}

impl Units {
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Units::Unitless),
            1 => Some(Units::Inch),
            2 => Some(Units::Centimeter),
            _ => None,
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Units::Unitless => 0,
            Units::Inch => 1,
            Units::Centimeter => 2,
        }
    }
}

// ── Body ─────────────────────────────────────────────────────────────────────

/// One pixel-bearing record kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyRecord {
    /// A framed segment: frame header, quantization or huffman table,
    /// restart interval, or scan header.
    Segment { marker: u8, payload: Vec<u8> },
    /// Unframed entropy-coded bytes following a scan header, stuffing and
    /// restart markers included.
    Scan(Vec<u8>),
}

/// The verbatim pixel-bearing records of a JPEG stream.
///
/// Re-emission never needs the pixels; materialization hands the whole
/// record run to the `jpeg-baseline` compression collaborator, which is
/// not bundled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub(crate) records: Vec<BodyRecord>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) image: Option<Pixmap>,
}

impl Body {
    /// The materialized image, decoded through the collaborator exactly
    /// once and memoized.
    pub fn materialize(&mut self) -> Result<&Pixmap> {
        if self.image.is_none() {
            let codec = get_codec(CodecId::JpegBaseline)?;
            let mut stream = Vec::new();
            for record in &self.records {
                match record {
                    BodyRecord::Segment { marker, payload } => {
                        stream.push(0xFF);
                        stream.push(*marker);
                        stream.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
                        stream.extend_from_slice(payload);
                    }
                    BodyRecord::Scan(bytes) => stream.extend_from_slice(bytes),
                }
            }
            let raw = codec.decompress(&stream)?;
            let pixels = self.width as usize * self.height as usize;
            let layout = if raw.len() == pixels * 3 {
                PixelLayout::Rgb8
            } else if raw.len() == pixels {
                PixelLayout::Gray8
            } else {
                return Err(Error::format(format!(
                    "collaborator produced {} bytes for a {}x{} image",
                    raw.len(),
                    self.width,
                    self.height
                )));
            };
            self.image = Some(Pixmap::new(self.width, self.height, layout, raw)?);
        }
        self.image
            .as_ref()
            .ok_or_else(|| Error::format("image unavailable"))
    }
}

// ── Metadata aggregate ───────────────────────────────────────────────────────

/// Everything a JPEG file says about itself besides the pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    /// Sample precision from the frame header.
    pub precision: u8,
    pub color: ColorModel,

    /// JFIF version, when an APP0 JFIF segment was present.
    pub version: Option<u16>,
    pub units: Option<Units>,
    pub x_density: u16,
    pub y_density: u16,
    /// The JFIF RGB thumbnail, decoded only when its declared size matches
    /// its payload exactly.
    pub thumbnail: Option<Pixmap>,

    /// Comment segments, in file order.
    pub comments: Vec<String>,
    /// Color transform declared by an Adobe APP14 segment.
    pub adobe_transform: Option<u8>,

    pub extensions: ExtensionStore<u8>,

    pub(crate) profile: Deferred<ColorProfile>,
    pub(crate) tags: Deferred<TagTable>,
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

    /// The embedded color profile, decoding it on first access.
    pub fn profile(&mut self) -> Result<Option<&ColorProfile>> {
        self.profile.get_with(subcodec::decode_profile)
    }

    pub fn set_profile(&mut self, profile: ColorProfile) {
        self.profile.set(profile);
    }

    /// Supply undecoded profile bytes, replacing any cached state. The
    /// writer re-splits them into numbered segments.
    pub fn set_profile_raw(&mut self, bytes: Vec<u8>) {
        self.profile = Deferred::Raw(bytes);
    }

    pub fn profile_raw(&self) -> Option<&[u8]> {
        self.profile.raw()
    }

    /// The embedded tag table, decoding it on first access.
    pub fn tag_table(&mut self) -> Result<Option<&TagTable>> {
        self.tags.get_with(subcodec::decode_tag_table)
    }

    pub fn set_tag_table(&mut self, tags: TagTable) {
        self.tags.set(tags);
    }

    pub fn set_tag_table_raw(&mut self, bytes: Vec<u8>) {
        self.tags = Deferred::Raw(bytes);
    }

    pub fn tag_table_raw(&self) -> Option<&[u8]> {
        self.tags.raw()
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
        let _ = self.profile();
        let _ = self.tag_table();
        let _ = self.packet();
    }
}

//! PNG: the chunked record format.
//!
//! Records are chunks — a big-endian length, a four-byte type, the
//! payload, and a CRC-32 over type plus payload. The walker lives in
//! [`reader`], re-emission in [`writer`], and the verbatim pixel-bearing
//! chunks in [`body`].

pub mod body;
pub mod reader;
pub mod writer;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::image::{ColorModel, ImageConfig};
use crate::meta::{subcodec, ColorProfile, Deferred, ExtensionStore, Packet, TagTable, TextEntry};

pub use body::Body;

/// The eight-byte file signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Longest permitted text key, per the format.
pub const MAX_KEY_LEN: usize = 79;

/// Largest legal chunk payload: lengths must stay below 2^31.
pub const MAX_CHUNK_LEN: usize = (1 << 31) - 1;

/// iTXt key under which annotation packets are conventionally stored.
pub(crate) const PACKET_KEY: &str = "XML:com.adobe.xmp";

// ── Chunk types ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

#[allow(non_upper_case_globals)]
impl ChunkType {
    pub const IHDR: Self = Self(*b"IHDR");
    pub const PLTE: Self = Self(*b"PLTE");
    pub const IDAT: Self = Self(*b"IDAT");
    pub const IEND: Self = Self(*b"IEND");
    pub const tRNS: Self = Self(*b"tRNS");
    pub const tIME: Self = Self(*b"tIME");
    pub const tEXt: Self = Self(*b"tEXt");
    pub const zTXt: Self = Self(*b"zTXt");
    pub const iTXt: Self = Self(*b"iTXt");
    pub const cHRM: Self = Self(*b"cHRM");
    pub const gAMA: Self = Self(*b"gAMA");
    pub const sRGB: Self = Self(*b"sRGB");
    pub const sBIT: Self = Self(*b"sBIT");
    pub const bKGD: Self = Self(*b"bKGD");
    pub const pHYs: Self = Self(*b"pHYs");
    pub const hIST: Self = Self(*b"hIST");
    pub const iCCP: Self = Self(*b"iCCP");
    pub const eXIf: Self = Self(*b"eXIf");

    /// Ancillary chunks (lowercase first letter) may be skipped or stored;
    /// unknown critical chunks make the file undecodable.
    pub fn is_ancillary(self) -> bool {
        self.0[0] & 0x20 != 0
    }

    /// Valid extension-store key: four ASCII letters with the ancillary
    /// bit set and no handler of its own.
    pub fn is_valid_extension(self) -> bool {
        self.0.iter().all(|b| b.is_ascii_alphabetic()) && self.is_ancillary()
    }
}

impl std::fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// ── Structural field types ───────────────────────────────────────────────────

/// Chromaticity calibration: white point and primaries, each coordinate
/// scaled by 100000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chroma {
    pub white_x: u32,
    pub white_y: u32,
    pub red_x: u32,
    pub red_y: u32,
    pub green_x: u32,
    pub green_y: u32,
    pub blue_x: u32,
    pub blue_y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrgbIntent {
    Perceptual,
    RelativeColorimetric,
    Saturation,
    AbsoluteColorimetric,
}

impl SrgbIntent {
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(SrgbIntent::Perceptual),
            1 => Some(SrgbIntent::RelativeColorimetric),
            2 => Some(SrgbIntent::Saturation),
            3 => Some(SrgbIntent::AbsoluteColorimetric),
            _ => None,
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            SrgbIntent::Perceptual => 0,
            SrgbIntent::RelativeColorimetric => 1,
            SrgbIntent::Saturation => 2,
            SrgbIntent::AbsoluteColorimetric => 3,
        }
    }
}

/// Significant bits per channel. Which fields matter depends on the color
/// type the image was stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignificantBits {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub gray: u8,
    pub alpha: u8,
}

/// Background color. Which fields matter depends on the color type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Background {
    pub gray: u16,
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub palette_index: u8,
}

/// Physical pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalDims {
    pub x: u32,
    pub y: u32,
    /// 0 = unknown, 1 = meter.
    pub unit: u8,
}

// ── Metadata aggregate ───────────────────────────────────────────────────────

/// Everything a PNG file says about itself besides the pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color: ColorModel,

    pub text: Vec<TextEntry>,
    pub last_modified: Option<DateTime<Utc>>,
    pub chroma: Option<Chroma>,
    pub gamma: Option<u32>,
    pub srgb_intent: Option<SrgbIntent>,
    pub significant_bits: Option<SignificantBits>,
    pub background: Option<Background>,
    pub physical_dims: Option<PhysicalDims>,
    pub histogram: Option<Vec<u16>>,
    /// Profile name carried next to the embedded profile.
    pub profile_name: Option<String>,

    pub extensions: ExtensionStore<ChunkType>,

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
    /// writer emits them verbatim; readers decode them on first access.
    pub fn set_profile_raw(&mut self, bytes: Vec<u8>) {
        self.profile = Deferred::Raw(bytes);
    }

    /// Undecoded profile bytes, when decoding hasn't been attempted.
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

    /// Force every deferred field once, caching outcomes. Field-level
    /// failures (including a missing sub-codec) are cached, not returned:
    /// eager decoding never aborts the decode that requested it.
    pub(crate) fn force_deferred(&mut self) {
        let _ = self.profile();
        let _ = self.tag_table();
        let _ = self.packet();
    }
}

//! Optional metadata sub-codec registry.
//!
//! Color profiles, tag tables, and packets are opaque byte buffers to the
//! container layer; decoding their internal layout is the business of
//! independently-loaded components. Each kind has one process-wide slot
//! holding a decode/encode function pair. A later registration overwrites
//! an earlier one — that is how optional-feature activation works.
//!
//! The slots are written during process initialization and read lazily by
//! deferred field accessors; concurrent registration during active
//! decoding is not a supported usage pattern, but the slots sit behind
//! locks so misuse cannot corrupt anything.

use std::sync::RwLock;

use crate::error::{Error, MetadataKind, Result};

/// Decoded color-management profile. The container layer populates none
/// of this itself; it is whatever the registered profile codec produces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColorProfile {
    pub description: Option<String>,
    pub color_space: Option<String>,
}

/// Decoded tag table (camera and authoring tags).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagTable {
    pub creator: Option<String>,
    pub orientation: Option<u16>,
}

/// Decoded annotation packet (an XML document in practice).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    pub document: String,
}

pub type ProfileDecodeFn = fn(&[u8]) -> Result<ColorProfile>;
pub type ProfileEncodeFn = fn(&ColorProfile) -> Result<Vec<u8>>;
pub type TagTableDecodeFn = fn(&[u8]) -> Result<TagTable>;
pub type TagTableEncodeFn = fn(&TagTable) -> Result<Vec<u8>>;
pub type PacketDecodeFn = fn(&[u8]) -> Result<Packet>;
pub type PacketEncodeFn = fn(&Packet) -> Result<Vec<u8>>;

static PROFILE: RwLock<Option<(ProfileDecodeFn, ProfileEncodeFn)>> = RwLock::new(None);
static TAG_TABLE: RwLock<Option<(TagTableDecodeFn, TagTableEncodeFn)>> = RwLock::new(None);
static PACKET: RwLock<Option<(PacketDecodeFn, PacketEncodeFn)>> = RwLock::new(None);

pub fn register_profile_codec(decode: ProfileDecodeFn, encode: ProfileEncodeFn) {
    *PROFILE.write().expect("profile codec slot poisoned") = Some((decode, encode));
}

pub fn register_tag_table_codec(decode: TagTableDecodeFn, encode: TagTableEncodeFn) {
    *TAG_TABLE.write().expect("tag-table codec slot poisoned") = Some((decode, encode));
}

pub fn register_packet_codec(decode: PacketDecodeFn, encode: PacketEncodeFn) {
    *PACKET.write().expect("packet codec slot poisoned") = Some((decode, encode));
}

pub(crate) fn decode_profile(bytes: &[u8]) -> Result<ColorProfile> {
    match *PROFILE.read().expect("profile codec slot poisoned") {
        Some((decode, _)) => decode(bytes),
        None => Err(Error::UnavailableCodec(MetadataKind::Profile)),
    }
}

pub(crate) fn encode_profile(profile: &ColorProfile) -> Result<Vec<u8>> {
    match *PROFILE.read().expect("profile codec slot poisoned") {
        Some((_, encode)) => encode(profile),
        None => Err(Error::UnavailableCodec(MetadataKind::Profile)),
    }
}

pub(crate) fn decode_tag_table(bytes: &[u8]) -> Result<TagTable> {
    match *TAG_TABLE.read().expect("tag-table codec slot poisoned") {
        Some((decode, _)) => decode(bytes),
        None => Err(Error::UnavailableCodec(MetadataKind::TagTable)),
    }
}

pub(crate) fn encode_tag_table(tags: &TagTable) -> Result<Vec<u8>> {
    match *TAG_TABLE.read().expect("tag-table codec slot poisoned") {
        Some((_, encode)) => encode(tags),
        None => Err(Error::UnavailableCodec(MetadataKind::TagTable)),
    }
}

pub(crate) fn decode_packet(bytes: &[u8]) -> Result<Packet> {
    match *PACKET.read().expect("packet codec slot poisoned") {
        Some((decode, _)) => decode(bytes),
        None => Err(Error::UnavailableCodec(MetadataKind::Packet)),
    }
}

pub(crate) fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
    match *PACKET.read().expect("packet codec slot poisoned") {
        Some((_, encode)) => encode(packet),
        None => Err(Error::UnavailableCodec(MetadataKind::Packet)),
    }
}

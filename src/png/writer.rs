//! The PNG encoder.
//!
//! Emits one chunk per populated structural field in canonical order, text
//! entries in insertion order, deferred fields without forcing a decode
//! (raw bytes are written back verbatim), and extension-store entries in
//! stored order. Everything is validated before a single byte is emitted;
//! a validation failure produces no output at all.
//!
//! An unmutated body is replayed chunk-for-chunk with its original
//! integrity codes, which is what makes metadata-only edits byte-exact and
//! decode-free. A mutated body is re-derived from the pixmap with freshly
//! computed codes.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use chrono::{Datelike, Timelike};

use crate::codec::{get_codec, CodecId};
use crate::error::{Error, Result};
use crate::image::{ColorModel, PixelLayout, Pixmap};
use crate::meta::{subcodec, Deferred, TextEntry, TextKind};
use crate::png::body::{Body, RawChunk};
use crate::png::{ChunkType, Metadata, MAX_CHUNK_LEN, MAX_KEY_LEN, PACKET_KEY, SIGNATURE};

/// Serialize a body and its metadata as a PNG stream.
pub fn encode<W: Write>(mut w: W, body: &Body, meta: &Metadata) -> Result<()> {
    validate(meta)?;

    let mut out = Vec::new();
    out.extend_from_slice(&SIGNATURE);

    // ── Header ───────────────────────────────────────────────────────────
    if body.dirty {
        let image = body
            .image
            .as_ref()
            .ok_or_else(|| Error::format("dirty body without an image"))?;
        push_chunk(&mut out, ChunkType::IHDR, &ihdr_payload(image)?);
    } else {
        let ihdr = body
            .ihdr
            .as_ref()
            .ok_or_else(|| Error::format("body has no header chunk"))?;
        push_verbatim(&mut out, ihdr);
    }

    // ── Pre-palette metadata ─────────────────────────────────────────────
    if let Some(c) = &meta.chroma {
        let mut p = Vec::with_capacity(32);
        for v in [
            c.white_x, c.white_y, c.red_x, c.red_y, c.green_x, c.green_y, c.blue_x, c.blue_y,
        ] {
            p.write_u32::<BigEndian>(v)?;
        }
        push_chunk(&mut out, ChunkType::cHRM, &p);
    }
    if let Some(g) = meta.gamma {
        push_chunk(&mut out, ChunkType::gAMA, &g.to_be_bytes());
    }
    push_profile(&mut out, meta)?;
    if let Some(sb) = &meta.significant_bits {
        push_chunk(&mut out, ChunkType::sBIT, &sbit_payload(meta, sb));
    }
    if let Some(intent) = meta.srgb_intent {
        push_chunk(&mut out, ChunkType::sRGB, &[intent.to_byte()]);
    }

    // ── Palette and friends ──────────────────────────────────────────────
    if body.dirty {
        if let Some(image) = &body.image {
            if let Some(palette) = &image.palette {
                let mut p = Vec::with_capacity(palette.len() * 3);
                for e in palette {
                    p.extend_from_slice(&[e.r, e.g, e.b]);
                }
                push_chunk(&mut out, ChunkType::PLTE, &p);
            }
        }
    } else if let Some(plte) = &body.plte {
        push_verbatim(&mut out, plte);
    }
    if let Some(bg) = &meta.background {
        let mut p = Vec::new();
        match meta.color {
            ColorModel::Gray | ColorModel::GrayAlpha => {
                p.write_u16::<BigEndian>(bg.gray)?;
            }
            ColorModel::Indexed => p.push(bg.palette_index),
            _ => {
                p.write_u16::<BigEndian>(bg.red)?;
                p.write_u16::<BigEndian>(bg.green)?;
                p.write_u16::<BigEndian>(bg.blue)?;
            }
        }
        push_chunk(&mut out, ChunkType::bKGD, &p);
    }
    if let Some(hist) = &meta.histogram {
        let mut p = Vec::with_capacity(hist.len() * 2);
        for v in hist {
            p.write_u16::<BigEndian>(*v)?;
        }
        push_chunk(&mut out, ChunkType::hIST, &p);
    }
    if !body.dirty {
        if let Some(trns) = &body.trns {
            push_verbatim(&mut out, trns);
        }
    }
    if let Some(d) = &meta.physical_dims {
        let mut p = Vec::with_capacity(9);
        p.write_u32::<BigEndian>(d.x)?;
        p.write_u32::<BigEndian>(d.y)?;
        p.push(d.unit);
        push_chunk(&mut out, ChunkType::pHYs, &p);
    }

    // ── Timestamp, text, deferred metadata, extensions ───────────────────
    if let Some(t) = &meta.last_modified {
        let mut p = Vec::with_capacity(7);
        p.write_u16::<BigEndian>(t.year() as u16)?;
        p.extend_from_slice(&[
            t.month() as u8,
            t.day() as u8,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
        ]);
        push_chunk(&mut out, ChunkType::tIME, &p);
    }
    for entry in &meta.text {
        push_text(&mut out, entry)?;
    }
    match &meta.tags {
        Deferred::Raw(bytes) => push_chunk(&mut out, ChunkType::eXIf, bytes),
        Deferred::Decoded(tags) => {
            push_chunk(&mut out, ChunkType::eXIf, &subcodec::encode_tag_table(tags)?)
        }
        Deferred::Absent | Deferred::Failed(_) => {}
    }
    push_packet(&mut out, meta)?;
    for (ctype, payload) in meta.extensions.iter() {
        push_chunk(&mut out, *ctype, payload);
    }

    // ── Image data ───────────────────────────────────────────────────────
    if body.dirty {
        let image = body
            .image
            .as_ref()
            .ok_or_else(|| Error::format("dirty body without an image"))?;
        push_chunk(&mut out, ChunkType::IDAT, &deflate_image(image)?);
    } else {
        if body.idat.is_empty() {
            return Err(Error::format("body has no image data chunks"));
        }
        for chunk in &body.idat {
            push_verbatim(&mut out, chunk);
        }
    }
    push_chunk(&mut out, ChunkType::IEND, &[]);

    w.write_all(&out)?;
    Ok(())
}

// ── Validation ───────────────────────────────────────────────────────────────

fn validate(meta: &Metadata) -> Result<()> {
    for entry in &meta.text {
        validate_key(&entry.key)?;
    }
    if let Some(name) = &meta.profile_name {
        validate_key(name)?;
    }
    for (ctype, payload) in meta.extensions.iter() {
        if !ctype.is_valid_extension() {
            return Err(Error::format(format!(
                "extension chunk type {ctype} is not a writable ancillary type"
            )));
        }
        if payload.len() > MAX_CHUNK_LEN {
            return Err(Error::format(format!(
                "extension chunk {ctype} payload of {} bytes exceeds the chunk size limit",
                payload.len()
            )));
        }
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::format(format!("invalid length for key {key:?}")));
    }
    if key.contains('\0') {
        return Err(Error::format(format!("key {key:?} contains a separator")));
    }
    Ok(())
}

// ── Chunk assembly ───────────────────────────────────────────────────────────

fn push_chunk(out: &mut Vec<u8>, ctype: ChunkType, payload: &[u8]) {
    out.extend_from_slice(&chunk(ctype, payload));
}

/// One complete chunk with a freshly computed integrity code.
pub(crate) fn chunk(ctype: ChunkType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 12);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&ctype.0);
    out.extend_from_slice(payload);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&ctype.0);
    hasher.update(payload);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
    out
}

/// Replay a chunk exactly as it was read, original integrity code included.
fn push_verbatim(out: &mut Vec<u8>, raw: &RawChunk) {
    out.extend_from_slice(&(raw.payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&raw.ctype.0);
    out.extend_from_slice(&raw.payload);
    out.extend_from_slice(&raw.crc.to_be_bytes());
}

fn push_text(out: &mut Vec<u8>, entry: &TextEntry) -> Result<()> {
    match entry.kind {
        TextKind::Plain => {
            let mut p = latin1_bytes(&entry.key)?;
            p.push(0);
            p.extend_from_slice(&latin1_bytes(&entry.value)?);
            push_chunk(out, ChunkType::tEXt, &p);
        }
        TextKind::Compressed => {
            let mut p = latin1_bytes(&entry.key)?;
            p.push(0);
            p.push(0); // deflate
            p.extend_from_slice(&get_codec(CodecId::Deflate)?.compress(&latin1_bytes(&entry.value)?)?);
            push_chunk(out, ChunkType::zTXt, &p);
        }
        TextKind::CompressedLocalized => {
            let mut p = entry.key.as_bytes().to_vec();
            p.push(0);
            p.push(1); // compressed
            p.push(0); // deflate
            p.extend_from_slice(&latin1_bytes(&entry.language_tag)?);
            p.push(0);
            p.extend_from_slice(entry.translated_key.as_bytes());
            p.push(0);
            p.extend_from_slice(&get_codec(CodecId::Deflate)?.compress(entry.value.as_bytes())?);
            push_chunk(out, ChunkType::iTXt, &p);
        }
    }
    Ok(())
}

fn push_profile(out: &mut Vec<u8>, meta: &Metadata) -> Result<()> {
    let raw = match &meta.profile {
        Deferred::Raw(bytes) => bytes.clone(),
        Deferred::Decoded(profile) => subcodec::encode_profile(profile)?,
        Deferred::Absent | Deferred::Failed(_) => return Ok(()),
    };
    let name = meta.profile_name.as_deref().unwrap_or("ICC Profile");
    let mut p = latin1_bytes(name)?;
    p.push(0);
    p.push(0); // deflate
    p.extend_from_slice(&get_codec(CodecId::Deflate)?.compress(&raw)?);
    push_chunk(out, ChunkType::iCCP, &p);
    Ok(())
}

fn push_packet(out: &mut Vec<u8>, meta: &Metadata) -> Result<()> {
    let raw = match &meta.packet {
        Deferred::Raw(bytes) => bytes.clone(),
        Deferred::Decoded(packet) => subcodec::encode_packet(packet)?,
        Deferred::Absent | Deferred::Failed(_) => return Ok(()),
    };
    // Packets travel as an uncompressed localized text entry under a
    // well-known key.
    let mut p = PACKET_KEY.as_bytes().to_vec();
    p.extend_from_slice(&[0, 0, 0, 0, 0]); // sep, flag, method, empty lang+key
    p.extend_from_slice(&raw);
    push_chunk(out, ChunkType::iTXt, &p);
    Ok(())
}

fn latin1_bytes(s: &str) -> Result<Vec<u8>> {
    s.chars()
        .map(|c| {
            let v = c as u32;
            if v <= 0xFF {
                Ok(v as u8)
            } else {
                Err(Error::format(format!("character {c:?} is not Latin-1")))
            }
        })
        .collect()
}

// ── Image re-encode (mutated bodies only) ────────────────────────────────────

fn ihdr_payload(image: &Pixmap) -> Result<Vec<u8>> {
    let color_type = match image.layout {
        PixelLayout::Gray8 => 0u8,
        PixelLayout::Rgb8 => 2,
        PixelLayout::Indexed8 => 3,
        PixelLayout::GrayAlpha8 => 4,
        PixelLayout::Rgba8 => 6,
    };
    let mut p = Vec::with_capacity(13);
    p.write_u32::<BigEndian>(image.width)?;
    p.write_u32::<BigEndian>(image.height)?;
    p.extend_from_slice(&[8, color_type, 0, 0, 0]);
    Ok(p)
}

fn deflate_image(image: &Pixmap) -> Result<Vec<u8>> {
    let stride = image.width as usize * image.layout.bytes_per_pixel();
    let mut filtered = Vec::with_capacity(image.data.len() + image.height as usize);
    for row in image.data.chunks(stride) {
        filtered.push(0u8); // filter: none
        filtered.extend_from_slice(row);
    }
    get_codec(CodecId::Deflate)?.compress(&filtered)
}

fn sbit_payload(meta: &Metadata, sb: &crate::png::SignificantBits) -> Vec<u8> {
    match meta.color {
        ColorModel::Gray => vec![sb.gray],
        ColorModel::GrayAlpha => vec![sb.gray, sb.alpha],
        ColorModel::Rgba => vec![sb.red, sb.green, sb.blue, sb.alpha],
        _ => vec![sb.red, sb.green, sb.blue],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::png::reader;

    fn tiny_body() -> Body {
        let mut body = Body::default();
        body.set_image(Pixmap::new(1, 1, PixelLayout::Gray8, vec![128]).unwrap());
        body
    }

    #[test]
    fn empty_text_key_aborts_with_no_output() {
        let mut meta = Metadata::default();
        meta.text.push(TextEntry::plain("", "value"));
        let mut out = Vec::new();
        assert!(encode(&mut out, &tiny_body(), &meta).is_err());
        assert!(out.is_empty(), "failed write must produce no bytes");
    }

    #[test]
    fn oversized_key_aborts() {
        let mut meta = Metadata::default();
        meta.text.push(TextEntry::plain("k".repeat(80), "value"));
        let mut out = Vec::new();
        assert!(encode(&mut out, &tiny_body(), &meta).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn invalid_extension_type_aborts() {
        let mut meta = Metadata::default();
        // Critical-bit chunk types may not be written from the extension store.
        meta.extensions.push(ChunkType(*b"QQQQ"), vec![1]);
        let mut out = Vec::new();
        assert!(encode(&mut out, &tiny_body(), &meta).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn dirty_body_roundtrips_pixels() {
        let pixels: Vec<u8> = (0..12).collect();
        let mut body = Body::default();
        body.set_image(Pixmap::new(2, 2, PixelLayout::Rgb8, pixels.clone()).unwrap());

        let mut out = Vec::new();
        encode(&mut out, &body, &Metadata::default()).unwrap();

        let (decoded_body, meta) = reader::decode(&out[..], &[]).unwrap();
        assert_eq!((meta.width, meta.height), (2, 2));
        assert_eq!(decoded_body.unwrap().materialize().unwrap().data, pixels);
    }

    #[test]
    fn text_entry_roundtrips_with_kind() {
        let mut body = tiny_body();
        body.set_image(Pixmap::new(1, 1, PixelLayout::Gray8, vec![7]).unwrap());
        let mut meta = Metadata::default();
        meta.text.push(TextEntry::plain("Composer", "Test"));
        meta.text.push(TextEntry {
            key: "Notes".into(),
            value: "squeezed".into(),
            kind: TextKind::Compressed,
            ..Default::default()
        });

        let mut out = Vec::new();
        encode(&mut out, &body, &meta).unwrap();
        let (_, decoded) = reader::decode(&out[..], &[]).unwrap();

        assert_eq!(decoded.text.len(), 2);
        assert_eq!(decoded.text[0].key, "Composer");
        assert_eq!(decoded.text[0].value, "Test");
        assert_eq!(decoded.text[0].kind, TextKind::Plain);
        assert_eq!(decoded.text[1].value, "squeezed");
        assert_eq!(decoded.text[1].kind, TextKind::Compressed);
    }
}

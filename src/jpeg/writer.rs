//! The JPEG encoder.
//!
//! Emits APPn metadata segments in canonical order, then replays the
//! verbatim body records. A profile too large for one segment is re-split
//! at the segment limit and renumbered with a freshly computed count.
//! Everything is validated before a single byte is emitted.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::jpeg::{
    marker, tag, Body, BodyRecord, Metadata, MAX_PROFILE_CHUNK, MAX_SEGMENT_LEN,
};
use crate::meta::{subcodec, Deferred};

/// Serialize a body and its metadata as a JPEG stream.
pub fn encode<W: Write>(mut w: W, body: &Body, meta: &Metadata) -> Result<()> {
    validate(body, meta)?;

    let mut out = vec![0xFF, marker::SOI];

    if meta.version.is_some() {
        push_segment(&mut out, marker::APP0, &jfif_payload(meta)?)?;
    }
    match &meta.tags {
        Deferred::Raw(bytes) => push_tagged(&mut out, marker::APP1, tag::EXIF, bytes)?,
        Deferred::Decoded(tags) => {
            push_tagged(&mut out, marker::APP1, tag::EXIF, &subcodec::encode_tag_table(tags)?)?
        }
        Deferred::Absent | Deferred::Failed(_) => {}
    }
    match &meta.packet {
        Deferred::Raw(bytes) => push_tagged(&mut out, marker::APP1, tag::XMP, bytes)?,
        Deferred::Decoded(packet) => {
            push_tagged(&mut out, marker::APP1, tag::XMP, &subcodec::encode_packet(packet)?)?
        }
        Deferred::Absent | Deferred::Failed(_) => {}
    }
    push_profile(&mut out, meta)?;
    if let Some(transform) = meta.adobe_transform {
        let mut p = tag::ADOBE.to_vec();
        p.extend_from_slice(&[0x00, 0x64, 0x00, 0x00, 0x00, 0x00, transform]);
        push_segment(&mut out, marker::APP14, &p)?;
    }
    for comment in &meta.comments {
        push_segment(&mut out, marker::COM, comment.as_bytes())?;
    }
    for (m, payload) in meta.extensions.iter() {
        push_segment(&mut out, *m, payload)?;
    }

    for record in &body.records {
        match record {
            BodyRecord::Segment { marker, payload } => push_segment(&mut out, *marker, payload)?,
            BodyRecord::Scan(bytes) => out.extend_from_slice(bytes),
        }
    }
    out.extend_from_slice(&[0xFF, marker::EOI]);

    w.write_all(&out)?;
    Ok(())
}

// ── Validation ───────────────────────────────────────────────────────────────

fn validate(body: &Body, meta: &Metadata) -> Result<()> {
    if body.records.is_empty() {
        return Err(Error::format("body has no frame records"));
    }
    for (m, payload) in meta.extensions.iter() {
        if !marker::is_app(*m) {
            return Err(Error::format(format!(
                "extension marker FF{m:02X} is outside the application segment range"
            )));
        }
        if payload.len() > MAX_SEGMENT_LEN {
            return Err(Error::format(format!(
                "extension segment FF{m:02X} payload of {} bytes exceeds the segment limit",
                payload.len()
            )));
        }
    }
    for comment in &meta.comments {
        if comment.len() > MAX_SEGMENT_LEN {
            return Err(Error::format("comment exceeds the segment limit"));
        }
    }
    if let Some(thumb) = &meta.thumbnail {
        if thumb.width > 255 || thumb.height > 255 {
            return Err(Error::format("thumbnail dimensions exceed one byte"));
        }
        let expect = thumb.width as usize * thumb.height as usize * 3;
        if thumb.data.len() != expect {
            return Err(Error::format("thumbnail buffer does not match its dimensions"));
        }
    }
    Ok(())
}

// ── Segment assembly ─────────────────────────────────────────────────────────

fn push_segment(out: &mut Vec<u8>, m: u8, payload: &[u8]) -> Result<()> {
    crate::jpeg::reader::check_segment_len(payload.len())?;
    out.push(0xFF);
    out.push(m);
    out.write_u16::<BigEndian>((payload.len() + 2) as u16)?;
    out.extend_from_slice(payload);
    Ok(())
}

fn push_tagged(out: &mut Vec<u8>, m: u8, prefix: &[u8], bytes: &[u8]) -> Result<()> {
    let mut p = prefix.to_vec();
    p.extend_from_slice(bytes);
    push_segment(out, m, &p)
}

fn push_profile(out: &mut Vec<u8>, meta: &Metadata) -> Result<()> {
    let raw = match &meta.profile {
        Deferred::Raw(bytes) => bytes.clone(),
        Deferred::Decoded(profile) => subcodec::encode_profile(profile)?,
        Deferred::Absent | Deferred::Failed(_) => return Ok(()),
    };
    let chunks: Vec<&[u8]> = raw.chunks(MAX_PROFILE_CHUNK).collect();
    if chunks.len() > 255 {
        return Err(Error::format("profile too large to segment"));
    }
    let count = chunks.len() as u8;
    for (i, chunk) in chunks.iter().enumerate() {
        let mut p = tag::ICC.to_vec();
        p.push(i as u8 + 1);
        p.push(count);
        p.extend_from_slice(chunk);
        push_segment(out, marker::APP2, &p)?;
    }
    Ok(())
}

fn jfif_payload(meta: &Metadata) -> Result<Vec<u8>> {
    let mut p = tag::JFIF.to_vec();
    p.write_u16::<BigEndian>(meta.version.unwrap_or(0x0102))?;
    p.push(meta.units.map(|u| u.to_byte()).unwrap_or(0));
    p.write_u16::<BigEndian>(meta.x_density)?;
    p.write_u16::<BigEndian>(meta.y_density)?;
    match &meta.thumbnail {
        Some(thumb) => {
            p.push(thumb.width as u8);
            p.push(thumb.height as u8);
            p.extend_from_slice(&thumb.data);
        }
        None => p.extend_from_slice(&[0, 0]),
    }
    Ok(p)
}

// ── Test fixtures shared with the reader ─────────────────────────────────────

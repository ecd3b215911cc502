//! The GIF encoder.
//!
//! Emits the header and screen descriptor, metadata extensions in
//! canonical order (loop count, annotation packet, comments, stored
//! application extensions), then the verbatim graphic blocks and the
//! trailer. Data that outgrows one sub-block is re-split at the 255-byte
//! sub-block limit. Everything is validated before a single byte is
//! emitted.

use std::io::Write;

use crate::error::{Error, Result};
use crate::gif::{app, block, Body, BodyItem, Frame, Metadata, Version, MAGIC_87, MAGIC_89};
use crate::meta::{subcodec, Deferred};

/// Serialize a body and its metadata as a GIF stream.
pub fn encode<W: Write>(mut w: W, body: &Body, meta: &Metadata) -> Result<()> {
    validate(meta)?;

    let mut out = Vec::new();
    out.extend_from_slice(match meta.version {
        Version::V87a => MAGIC_87,
        Version::V89a => MAGIC_89,
    });
    out.extend_from_slice(&(meta.width as u16).to_le_bytes());
    out.extend_from_slice(&(meta.height as u16).to_le_bytes());
    out.extend_from_slice(&[
        body.screen.packed,
        body.screen.background,
        body.screen.aspect,
    ]);
    if let Some(gct) = &body.global_palette {
        out.extend_from_slice(gct);
    }

    if let Some(count) = meta.loop_count {
        out.extend_from_slice(&[block::EXTENSION, block::LABEL_APPLICATION, 11]);
        out.extend_from_slice(app::NETSCAPE.as_bytes());
        out.extend_from_slice(&[3, 1]);
        out.extend_from_slice(&count.to_le_bytes());
        out.push(0);
    }
    match &meta.packet {
        Deferred::Raw(bytes) => push_app_extension(&mut out, app::XMP, bytes),
        Deferred::Decoded(packet) => {
            push_app_extension(&mut out, app::XMP, &subcodec::encode_packet(packet)?)
        }
        Deferred::Absent | Deferred::Failed(_) => {}
    }
    for comment in &meta.comments {
        out.extend_from_slice(&[block::EXTENSION, block::LABEL_COMMENT]);
        push_sub_blocks(&mut out, comment.as_bytes());
    }
    for (key, payload) in meta.extensions.iter() {
        push_app_extension(&mut out, key, payload);
    }

    for item in &body.items {
        match item {
            BodyItem::Frame(frame) => push_frame(&mut out, frame),
            BodyItem::PlainText { gce, blocks } => {
                push_gce(&mut out, gce);
                out.extend_from_slice(&[block::EXTENSION, block::LABEL_PLAIN_TEXT]);
                out.extend_from_slice(blocks);
            }
        }
    }
    out.push(block::TRAILER);

    w.write_all(&out)?;
    Ok(())
}

fn validate(meta: &Metadata) -> Result<()> {
    if meta.width > u16::MAX as u32 || meta.height > u16::MAX as u32 {
        return Err(Error::format("screen dimensions exceed two bytes"));
    }
    for (key, _) in meta.extensions.iter() {
        if key.len() < 8 || key.len() > 255 || !key.is_ascii() {
            return Err(Error::format(format!(
                "application extension identifier {key:?} is not writable"
            )));
        }
    }
    Ok(())
}

fn push_app_extension(out: &mut Vec<u8>, key: &str, data: &[u8]) {
    out.extend_from_slice(&[block::EXTENSION, block::LABEL_APPLICATION, key.len() as u8]);
    out.extend_from_slice(key.as_bytes());
    push_sub_blocks(out, data);
}

fn push_gce(out: &mut Vec<u8>, gce: &Option<[u8; 4]>) {
    if let Some(gce) = gce {
        out.extend_from_slice(&[block::EXTENSION, block::LABEL_GRAPHIC_CONTROL, 4]);
        out.extend_from_slice(gce);
        out.push(0);
    }
}

fn push_frame(out: &mut Vec<u8>, frame: &Frame) {
    push_gce(out, &frame.gce);
    out.push(block::IMAGE);
    out.extend_from_slice(&frame.descriptor);
    if let Some(palette) = &frame.local_palette {
        out.extend_from_slice(palette);
    }
    out.push(frame.lzw_min_code);
    out.extend_from_slice(&frame.raster);
}

/// Split `data` into 255-byte-max length-prefixed sub-blocks plus the
/// zero terminator.
fn push_sub_blocks(out: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(255) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
}

// ── Test fixtures shared with the reader ─────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// A structurally complete 2x1 file with `extra` blocks spliced in
    /// before the image frame.
    pub(crate) fn minimal_gif(extra: &[Vec<u8>]) -> Vec<u8> {
        let mut out = MAGIC_89.to_vec();
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        // Global palette of two entries.
        out.extend_from_slice(&[0x80, 0, 0]);
        out.extend_from_slice(&[0, 0, 0, 255, 255, 255]);
        for e in extra {
            out.extend_from_slice(e);
        }
        // Image descriptor at origin, 2x1, no local palette.
        out.push(block::IMAGE);
        out.extend_from_slice(&[0, 0, 0, 0, 2, 0, 1, 0, 0]);
        // Minimum code size and a token raster run.
        out.push(2);
        out.extend_from_slice(&[2, 0x4C, 0x01, 0]);
        out.push(block::TRAILER);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::minimal_gif;
    use super::*;
    use crate::options::ResolvedOptions;
    use crate::stream::PeekReader;

    fn read_back(data: &[u8]) -> (Body, Metadata) {
        let opts = ResolvedOptions::from_list(&[]).unwrap();
        let (body, meta) =
            crate::gif::reader::decode_stream(&mut PeekReader::new(data), &opts).unwrap();
        (body.unwrap(), meta)
    }

    #[test]
    fn byte_exact_roundtrip_without_materialization() {
        let mut ext = vec![block::EXTENSION, block::LABEL_APPLICATION, 11];
        ext.extend_from_slice(b"NETSCAPE2.0");
        ext.extend_from_slice(&[3, 1, 7, 0, 0]);
        let original = minimal_gif(&[ext]);

        let (body, meta) = read_back(&original);
        let mut out = Vec::new();
        encode(&mut out, &body, &meta).unwrap();
        assert_eq!(out, original, "unmutated body must re-emit byte-for-byte");
    }

    #[test]
    fn comments_and_extensions_roundtrip() {
        let original = minimal_gif(&[]);
        let (body, mut meta) = read_back(&original);
        meta.comments.push("made with imagemeta".into());
        meta.extensions
            .push("MYVENDORv10".into(), vec![1, 2, 3]);

        let mut out = Vec::new();
        encode(&mut out, &body, &meta).unwrap();
        let (_, decoded) = read_back(&out);
        assert_eq!(decoded.comments, vec!["made with imagemeta".to_string()]);
        let vendor = "MYVENDORv10".to_string();
        let stored: Vec<&[u8]> = decoded
            .extensions
            .get_all(&vendor)
            .collect();
        assert_eq!(stored, vec![&[1u8, 2, 3][..]]);
    }

    #[test]
    fn short_extension_key_aborts_with_no_output() {
        let original = minimal_gif(&[]);
        let (body, mut meta) = read_back(&original);
        meta.extensions.push("BAD".into(), vec![1]);
        let mut out = Vec::new();
        assert!(encode(&mut out, &body, &meta).is_err());
        assert!(out.is_empty());
    }
}

//! The GIF record walker.
//!
//! After the header and logical screen descriptor, the stream is a
//! sequence of blocks: image descriptors and plain-text blocks (kept
//! verbatim as the body), comment and application extensions (metadata),
//! and the trailer. Data sub-blocks are charged against the budgets from
//! their length bytes before being read.

use std::io::Read;

use byteorder::ReadBytesExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gif::{
    app, block, Body, BodyItem, Frame, Metadata, ScreenDescriptor, Version, MAGIC_87, MAGIC_89,
};
use crate::image::{apply_transforms, ColorModel};
use crate::meta::Deferred;
use crate::options::{Budget, DecodeDepth, ReadOption, ResolvedOptions, TransformMode};
use crate::stream::PeekReader;

/// Decode a GIF stream.
pub fn decode<R: Read>(r: R, opts: &[ReadOption]) -> Result<(Option<Body>, Metadata)> {
    let resolved = ResolvedOptions::from_list(opts)?;
    let mut pr = PeekReader::new(r);
    let (mut body, mut meta) = decode_stream(&mut pr, &resolved)?;
    post_process(&mut body, &mut meta, &resolved)?;
    Ok((body, meta))
}

pub(crate) fn decode_stream<R: Read>(
    r: &mut PeekReader<R>,
    opts: &ResolvedOptions,
) -> Result<(Option<Body>, Metadata)> {
    let mut magic = [0u8; 6];
    r.read_exact(&mut magic)?;
    let version = match &magic {
        m if m == MAGIC_87 => Version::V87a,
        m if m == MAGIC_89 => Version::V89a,
        _ => return Err(Error::format("bad signature")),
    };

    let mut meta = Metadata {
        version,
        color: ColorModel::Indexed,
        ..Default::default()
    };
    let mut body = Body::default();
    let keep_body = !matches!(opts.image, DecodeDepth::Skip);
    let keep_meta = opts.keep_metadata();
    let mut meta_budget = opts.metadata_budget();
    let mut image_budget = opts.image_budget();

    // Logical screen descriptor.
    let mut lsd = [0u8; 7];
    r.read_exact(&mut lsd)?;
    meta.width = u16::from_le_bytes([lsd[0], lsd[1]]) as u32;
    meta.height = u16::from_le_bytes([lsd[2], lsd[3]]) as u32;
    body.screen = ScreenDescriptor {
        packed: lsd[4],
        background: lsd[5],
        aspect: lsd[6],
    };
    if lsd[4] & 0x80 != 0 {
        let size = 3usize << ((lsd[4] & 0x07) + 1);
        image_budget.charge(size as u64)?;
        let mut gct = vec![0u8; size];
        r.read_exact(&mut gct)?;
        body.global_palette = Some(gct);
    }

    let mut pending_gce: Option<[u8; 4]> = None;
    let mut done = false;
    while !done {
        opts.check_cancelled()?;
        if r.at_eof()? {
            if opts.damage.skip_damaged {
                warn!("input ended before the trailer");
                break;
            }
            return Err(Error::format("unexpected end of input before trailer"));
        }

        let introducer = r.read_u8()?;
        let result = match introducer {
            block::TRAILER => {
                done = true;
                Ok(())
            }
            block::IMAGE => on_image(
                r,
                &mut body,
                &mut pending_gce,
                keep_body,
                &mut image_budget,
            ),
            block::EXTENSION => on_extension(
                r,
                &mut meta,
                &mut body,
                &mut pending_gce,
                keep_body,
                keep_meta,
                &mut meta_budget,
            ),
            b => Err(Error::format(format!("unknown block introducer {b:#04x}"))),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_skippable() && opts.damage.skip_damaged => {
                warn!(error = %e, "skipping damaged record");
            }
            Err(e) => return Err(e),
        }
    }

    if done && !r.at_eof()? && !opts.damage.allow_trailing_data {
        return Err(Error::format("trailing data after trailer"));
    }

    let body = if keep_body { Some(body) } else { None };
    Ok((body, meta))
}

pub(crate) fn post_process(
    body: &mut Option<Body>,
    meta: &mut Metadata,
    opts: &ResolvedOptions,
) -> Result<()> {
    if opts.decode_metadata_eagerly() {
        meta.force_deferred();
    }
    if opts.decode_image() {
        if let Some(body) = body {
            body.materialize()?;
            if let Some(pixmap) = body.image.as_mut() {
                if opts.transform.rotation != TransformMode::None
                    || opts.transform.gamma != TransformMode::None
                {
                    apply_transforms(pixmap, &opts.transform, None, None);
                }
            }
        }
    }
    Ok(())
}

fn on_image<R: Read>(
    r: &mut PeekReader<R>,
    body: &mut Body,
    pending_gce: &mut Option<[u8; 4]>,
    keep_body: bool,
    image_budget: &mut Budget,
) -> Result<()> {
    let mut descriptor = [0u8; 9];
    r.read_exact(&mut descriptor)?;
    let local_palette = if descriptor[8] & 0x80 != 0 {
        let size = 3usize << ((descriptor[8] & 0x07) + 1);
        image_budget.charge(size as u64)?;
        let mut p = vec![0u8; size];
        r.read_exact(&mut p)?;
        Some(p)
    } else {
        None
    };
    let lzw_min_code = r.read_u8()?;
    let raster = read_sub_blocks_raw(r, image_budget)?;

    let frame = Frame {
        gce: pending_gce.take(),
        descriptor,
        local_palette,
        lzw_min_code,
        raster,
    };
    if frame.width() == 0 || frame.height() == 0 {
        return Err(Error::format("zero frame dimension"));
    }
    if keep_body {
        body.items.push(BodyItem::Frame(frame));
    }
    Ok(())
}

fn on_extension<R: Read>(
    r: &mut PeekReader<R>,
    meta: &mut Metadata,
    body: &mut Body,
    pending_gce: &mut Option<[u8; 4]>,
    keep_body: bool,
    keep_meta: bool,
    meta_budget: &mut Budget,
) -> Result<()> {
    let label = r.read_u8()?;
    match label {
        block::LABEL_GRAPHIC_CONTROL => {
            if pending_gce.is_some() {
                return Err(Error::format(
                    "two graphic control blocks before a graphic block",
                ));
            }
            let size = r.read_u8()?;
            if size != 4 {
                return Err(Error::format(format!(
                    "graphic control block of {size} bytes, want 4"
                )));
            }
            let mut gce = [0u8; 4];
            r.read_exact(&mut gce)?;
            let term = r.read_u8()?;
            if term != 0 {
                return Err(Error::format("graphic control block not terminated"));
            }
            *pending_gce = Some(gce);
            Ok(())
        }
        block::LABEL_COMMENT => {
            let data = read_sub_blocks_concat(r, meta_budget)?;
            if keep_meta {
                meta.comments
                    .push(String::from_utf8_lossy(&data).into_owned());
            }
            Ok(())
        }
        block::LABEL_APPLICATION => {
            let header_len = r.read_u8()?;
            if header_len < 8 {
                return Err(Error::format(format!(
                    "application block header of {header_len} bytes, want at least 8"
                )));
            }
            meta_budget.charge(header_len as u64)?;
            let mut header = vec![0u8; header_len as usize];
            r.read_exact(&mut header)?;
            let key: String = header.iter().map(|&b| b as char).collect();
            let data = read_sub_blocks_concat(r, meta_budget)?;
            if !keep_meta {
                return Ok(());
            }
            match key.as_str() {
                app::NETSCAPE => {
                    if data.len() == 3 && data[0] == 1 {
                        meta.loop_count = Some(u16::from_le_bytes([data[1], data[2]]));
                    } else if !data.is_empty() {
                        debug!("ignoring malformed NETSCAPE block");
                    }
                }
                app::XMP => {
                    if !meta.packet.is_absent() {
                        return Err(Error::consistency("second annotation packet"));
                    }
                    meta.packet = Deferred::Raw(data);
                }
                _ => meta.extensions.push(key, data),
            }
            Ok(())
        }
        block::LABEL_PLAIN_TEXT => {
            let blocks = read_sub_blocks_raw(r, meta_budget)?;
            if keep_body {
                body.items.push(BodyItem::PlainText {
                    gce: pending_gce.take(),
                    blocks,
                });
            }
            Ok(())
        }
        l => Err(Error::format(format!("unknown extension label {l:#04x}"))),
    }
}

/// Read a sub-block stream verbatim, length bytes and terminator included.
fn read_sub_blocks_raw<R: Read>(r: &mut PeekReader<R>, budget: &mut Budget) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let len = r.read_u8()?;
        out.push(len);
        if len == 0 {
            return Ok(out);
        }
        budget.charge(len as u64)?;
        let start = out.len();
        out.resize(start + len as usize, 0);
        r.read_exact(&mut out[start..])?;
    }
}

/// Read a sub-block stream and return just the concatenated data bytes.
fn read_sub_blocks_concat<R: Read>(r: &mut PeekReader<R>, budget: &mut Budget) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let len = r.read_u8()?;
        if len == 0 {
            return Ok(out);
        }
        budget.charge(len as u64)?;
        let start = out.len();
        out.resize(start + len as usize, 0);
        r.read_exact(&mut out[start..])?;
    }
}

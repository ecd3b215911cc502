//! The JPEG record walker.
//!
//! Walks marker segments after SOI. Frame headers, tables, and scans are
//! retained verbatim for byte-exact re-emission; APPn segments carry the
//! metadata. A color profile larger than one segment arrives as numbered
//! `ICC_PROFILE` pieces and goes through the segment reassembler.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use tracing::warn;

use crate::error::{Error, Result};
use crate::image::{apply_transforms, ColorModel, PixelLayout, Pixmap};
use crate::jpeg::{marker, tag, Body, BodyRecord, Metadata, Units, MAX_SEGMENT_LEN};
use crate::meta::segments::SegmentReassembler;
use crate::meta::Deferred;
use crate::options::{Budget, DecodeDepth, ReadOption, ResolvedOptions, TransformMode};
use crate::stream::PeekReader;

/// Decode a JPEG stream.
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
    let mut soi = [0u8; 2];
    r.read_exact(&mut soi)?;
    if soi != [0xFF, marker::SOI] {
        return Err(Error::format("missing start-of-image marker"));
    }

    let mut d = Decoder {
        meta: Metadata::default(),
        body: Body::default(),
        keep_body: !matches!(opts.image, DecodeDepth::Skip),
        keep_meta: opts.keep_metadata(),
        meta_budget: opts.metadata_budget(),
        icc: SegmentReassembler::new(),
        done: false,
    };
    let mut image_budget = opts.image_budget();

    while !d.done {
        opts.check_cancelled()?;
        if r.at_eof()? {
            if opts.damage.skip_damaged {
                warn!("input ended before the end-of-image marker");
                break;
            }
            return Err(Error::format("unexpected end of input before EOI"));
        }

        if r.read_u8()? != 0xFF {
            return Err(Error::format("lost marker synchronization"));
        }
        let mut m = r.read_u8()?;
        while m == 0xFF {
            // Fill bytes before a marker are legal padding.
            m = r.read_u8()?;
        }

        match m {
            marker::EOI => {
                d.done = true;
                continue;
            }
            marker::TEM | marker::RST0..=marker::RST7 => continue,
            _ => {}
        }

        let declared = r.read_u16::<BigEndian>()? as usize;
        if declared < 2 {
            return Err(Error::format(format!("segment length {declared} under 2")));
        }
        let len = declared - 2;

        // Reject against the budget before touching the payload.
        if marker::is_app(m) || m == marker::COM {
            d.meta_budget.charge(len as u64)?;
        } else {
            image_budget.charge(len as u64)?;
        }

        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload)?;

        let result = d.handle(m, payload);
        match result {
            Ok(()) => {}
            Err(e) if e.is_skippable() && opts.damage.skip_damaged => {
                warn!(marker = %format_args!("FF{m:02X}"), error = %e, "skipping damaged record");
            }
            Err(e) => return Err(e),
        }

        if m == marker::SOS {
            let scan = read_scan(r, &mut image_budget)?;
            if d.keep_body {
                d.body.records.push(BodyRecord::Scan(scan));
            }
        }
    }

    if d.icc.pending() {
        return Err(d.icc.incomplete());
    }
    if d.done && !r.at_eof()? && !opts.damage.allow_trailing_data {
        return Err(Error::format("trailing data after EOI"));
    }

    let body = if d.keep_body { Some(d.body) } else { None };
    Ok((body, d.meta))
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
            let orientation = if opts.transform.rotation != TransformMode::None {
                meta.tag_table().ok().flatten().and_then(|t| t.orientation)
            } else {
                None
            };
            if let Some(pixmap) = body.image.as_mut() {
                apply_transforms(pixmap, &opts.transform, None, orientation);
            }
        }
    }
    Ok(())
}

/// Capture entropy-coded bytes up to (not including) the next real marker.
/// Byte stuffing (`FF 00`) and restart markers stay part of the scan.
fn read_scan<R: Read>(r: &mut PeekReader<R>, budget: &mut Budget) -> Result<Vec<u8>> {
    let mut scan = Vec::new();
    loop {
        let pair = r.peek(2)?;
        if pair.is_empty() {
            return Err(Error::format("scan data truncated"));
        }
        if pair[0] == 0xFF {
            if pair.len() < 2 {
                return Err(Error::format("scan data truncated at a marker prefix"));
            }
            match pair[1] {
                0x00 | marker::RST0..=marker::RST7 => {
                    budget.charge(2)?;
                    let mut two = [0u8; 2];
                    r.read_exact(&mut two)?;
                    scan.extend_from_slice(&two);
                }
                0xFF => {
                    // Fill byte; the marker starts at the last FF.
                    budget.charge(1)?;
                    scan.push(r.read_u8()?);
                }
                _ => break,
            }
        } else {
            budget.charge(1)?;
            scan.push(r.read_u8()?);
        }
    }
    Ok(scan)
}

struct Decoder {
    meta: Metadata,
    body: Body,
    keep_body: bool,
    keep_meta: bool,
    meta_budget: Budget,
    icc: SegmentReassembler,
    done: bool,
}

impl Decoder {
    fn handle(&mut self, m: u8, payload: Vec<u8>) -> Result<()> {
        if marker::is_sof(m) {
            return self.on_sof(m, payload);
        }
        match m {
            marker::DQT | marker::DHT | marker::DRI | marker::DNL | marker::SOS => {
                if self.keep_body {
                    self.body.records.push(BodyRecord::Segment { marker: m, payload });
                }
                Ok(())
            }
            _ if !self.keep_meta => {
                if marker::is_app(m) || m == marker::COM {
                    Ok(())
                } else {
                    Err(Error::format(format!("unknown marker FF{m:02X}")))
                }
            }
            marker::APP0 => self.on_app0(payload),
            marker::APP1 => self.on_app1(payload),
            marker::APP2 => self.on_app2(payload),
            marker::APP14 => self.on_app14(payload),
            _ if marker::is_app(m) => {
                self.meta.extensions.push(m, payload);
                Ok(())
            }
            marker::COM => {
                self.meta
                    .comments
                    .push(String::from_utf8_lossy(&payload).into_owned());
                Ok(())
            }
            _ => Err(Error::format(format!("unknown marker FF{m:02X}"))),
        }
    }

    fn on_sof(&mut self, m: u8, payload: Vec<u8>) -> Result<()> {
        if self.meta.width != 0 {
            return Err(Error::consistency("second frame header"));
        }
        if payload.len() < 6 {
            return Err(Error::format("frame header too short"));
        }
        self.meta.precision = payload[0];
        self.meta.height = BigEndian::read_u16(&payload[1..3]) as u32;
        self.meta.width = BigEndian::read_u16(&payload[3..5]) as u32;
        self.meta.color = match payload[5] {
            1 => ColorModel::Gray,
            3 => ColorModel::YCbCr,
            4 => ColorModel::Cmyk,
            n => return Err(Error::format(format!("unsupported component count {n}"))),
        };
        if self.keep_body {
            self.body.width = self.meta.width;
            self.body.height = self.meta.height;
            self.body.records.push(BodyRecord::Segment { marker: m, payload });
        }
        Ok(())
    }

    fn on_app0(&mut self, payload: Vec<u8>) -> Result<()> {
        if !payload.starts_with(tag::JFIF) {
            self.meta.extensions.push(marker::APP0, payload);
            return Ok(());
        }
        let p = &payload[tag::JFIF.len()..];
        if p.len() < 9 {
            return Err(Error::format("JFIF segment too short"));
        }
        self.meta.version = Some(BigEndian::read_u16(&p[0..2]));
        self.meta.units = Some(
            Units::from_byte(p[2])
                .ok_or_else(|| Error::format(format!("unknown density unit {}", p[2])))?,
        );
        self.meta.x_density = BigEndian::read_u16(&p[3..5]);
        self.meta.y_density = BigEndian::read_u16(&p[5..7]);

        let (tw, th) = (p[7] as u32, p[8] as u32);
        if tw == 0 || th == 0 {
            return Ok(());
        }
        let pixels = &p[9..];
        let expect = tw as usize * th as usize * 3;
        if pixels.len() != expect {
            return Err(Error::format(format!(
                "thumbnail payload is {} bytes, {tw}x{th} needs {expect}",
                pixels.len()
            )));
        }
        self.meta.thumbnail = Some(Pixmap::new(tw, th, PixelLayout::Rgb8, pixels.to_vec())?);
        Ok(())
    }

    fn on_app1(&mut self, payload: Vec<u8>) -> Result<()> {
        if let Some(rest) = payload.strip_prefix(tag::EXIF) {
            if !self.meta.tags.is_absent() {
                return Err(Error::consistency("second tag-table segment"));
            }
            self.meta.tags = Deferred::Raw(rest.to_vec());
        } else if let Some(rest) = payload.strip_prefix(tag::XMP) {
            if !self.meta.packet.is_absent() {
                return Err(Error::consistency("second annotation packet"));
            }
            self.meta.packet = Deferred::Raw(rest.to_vec());
        } else {
            self.meta.extensions.push(marker::APP1, payload);
        }
        Ok(())
    }

    fn on_app2(&mut self, payload: Vec<u8>) -> Result<()> {
        let Some(rest) = payload.strip_prefix(tag::ICC) else {
            self.meta.extensions.push(marker::APP2, payload);
            return Ok(());
        };
        if rest.len() < 2 {
            return Err(Error::format("profile segment too short"));
        }
        if !self.meta.profile.is_absent() {
            return Err(Error::consistency("profile segments after reassembly finished"));
        }
        let (index, count) = (rest[0], rest[1]);
        if let Some(complete) = self.icc.push(index, count, &rest[2..])? {
            self.meta.profile = Deferred::Raw(complete);
        }
        Ok(())
    }

    fn on_app14(&mut self, payload: Vec<u8>) -> Result<()> {
        if payload.starts_with(tag::ADOBE) {
            if payload.len() < 12 {
                return Err(Error::format("Adobe segment too short"));
            }
            self.meta.adobe_transform = Some(payload[11]);
        } else {
            self.meta.extensions.push(marker::APP14, payload);
        }
        Ok(())
    }
}

// Length sanity shared with the writer.
pub(crate) fn check_segment_len(len: usize) -> Result<()> {
    if len > MAX_SEGMENT_LEN {
        return Err(Error::format(format!(
            "segment payload of {len} bytes exceeds the {MAX_SEGMENT_LEN} byte segment limit"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::writer::tests_support::{app_segment, minimal_jpeg, segment};

    #[test]
    fn minimal_file_decodes() {
        let data = minimal_jpeg(&[]);
        let (body, meta) = decode(&data[..], &skip_body()).unwrap();
        assert_eq!((meta.width, meta.height), (2, 2));
        assert_eq!(meta.color, ColorModel::YCbCr);
        assert!(body.is_none());
    }

    // Materializing needs the jpeg-baseline collaborator, which unit
    // tests leave unregistered.
    fn skip_body() -> Vec<ReadOption> {
        vec![ReadOption::Decode(crate::options::DecodeDepthOptions {
            image: DecodeDepth::Skip,
            metadata: DecodeDepth::Defer,
        })]
    }

    #[test]
    fn thumbnail_size_mismatch_is_format_error() {
        // Declared 2x2 but 11 bytes of pixel data instead of 12.
        let mut jfif = b"JFIF\0".to_vec();
        jfif.extend_from_slice(&[0x01, 0x02, 0, 0, 1, 0, 1, 2, 2]);
        jfif.extend_from_slice(&[0u8; 11]);
        let data = minimal_jpeg(&[segment(marker::APP0, &jfif)]);
        assert!(matches!(decode(&data[..], &skip_body()), Err(Error::Format(_))));
    }

    #[test]
    fn thumbnail_exact_size_decodes() {
        let mut jfif = b"JFIF\0".to_vec();
        jfif.extend_from_slice(&[0x01, 0x02, 0, 0, 1, 0, 1, 2, 2]);
        jfif.extend_from_slice(&[9u8; 12]);
        let data = minimal_jpeg(&[segment(marker::APP0, &jfif)]);
        let (_, meta) = decode(&data[..], &skip_body()).unwrap();
        let thumb = meta.thumbnail.unwrap();
        assert_eq!((thumb.width, thumb.height), (2, 2));
        assert_eq!(meta.version, Some(0x0102));
    }

    #[test]
    fn icc_segments_reassemble_in_index_order() {
        // Segment 2 arrives before segment 1.
        let data = minimal_jpeg(&[
            app_segment(marker::APP2, tag::ICC, &[2, 2, b'B', b'B']),
            app_segment(marker::APP2, tag::ICC, &[1, 2, b'A', b'A']),
        ]);
        let (_, meta) = decode(&data[..], &skip_body()).unwrap();
        assert_eq!(meta.profile_raw().unwrap(), b"AABB");
    }

    #[test]
    fn icc_count_mismatch_is_consistency_error() {
        let data = minimal_jpeg(&[
            app_segment(marker::APP2, tag::ICC, &[1, 2, b'A']),
            app_segment(marker::APP2, tag::ICC, &[2, 3, b'B']),
        ]);
        assert!(matches!(
            decode(&data[..], &skip_body()),
            Err(Error::Consistency(_))
        ));
    }

    #[test]
    fn incomplete_icc_reassembly_is_consistency_error() {
        let data = minimal_jpeg(&[app_segment(marker::APP2, tag::ICC, &[1, 2, b'A'])]);
        assert!(matches!(
            decode(&data[..], &skip_body()),
            Err(Error::Consistency(_))
        ));
    }

    #[test]
    fn unknown_app_segment_goes_to_extensions() {
        let data = minimal_jpeg(&[segment(0xE7, b"MYAPP\0stuff")]);
        let (_, meta) = decode(&data[..], &skip_body()).unwrap();
        let stored: Vec<&[u8]> = meta.extensions.get_all(&0xE7).collect();
        assert_eq!(stored, vec![&b"MYAPP\0stuff"[..]]);
    }

    #[test]
    fn comment_is_captured() {
        let data = minimal_jpeg(&[segment(marker::COM, b"shot on a potato")]);
        let (_, meta) = decode(&data[..], &skip_body()).unwrap();
        assert_eq!(meta.comments, vec!["shot on a potato".to_string()]);
    }

    #[test]
    fn exif_is_deferred_not_decoded() {
        let mut app1 = tag::EXIF.to_vec();
        app1.extend_from_slice(b"II*\0rest");
        let data = minimal_jpeg(&[segment(marker::APP1, &app1)]);
        let (_, meta) = decode(&data[..], &skip_body()).unwrap();
        assert_eq!(meta.tag_table_raw().unwrap(), b"II*\0rest");
    }
}

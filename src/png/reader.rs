//! The PNG record walker.
//!
//! Walks the chunk stream after the signature: length, type, payload,
//! CRC-32 over type plus payload. Every chunk's integrity code is verified
//! before its handler runs. Unknown ancillary chunks land in the extension
//! store; unknown critical chunks are fatal. The walk ends at IEND.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use chrono::{NaiveDate, TimeZone, Utc};
use tracing::warn;

use crate::codec::{get_codec, CodecId};
use crate::error::{Error, Result};
use crate::image::{apply_transforms, ColorModel};
use crate::meta::{Deferred, TextEntry, TextKind};
use crate::options::{Budget, ReadOption, ResolvedOptions, TransformMode};
use crate::png::body::{Body, Header, RawChunk};
use crate::png::{
    Background, Chroma, ChunkType, Metadata, PhysicalDims, SignificantBits, SrgbIntent,
    MAX_CHUNK_LEN, PACKET_KEY, SIGNATURE,
};
use crate::stream::PeekReader;

/// Decode a PNG stream.
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
    let mut sig = [0u8; 8];
    r.read_exact(&mut sig)?;
    if sig != SIGNATURE {
        return Err(Error::format("bad signature"));
    }

    let mut d = Decoder {
        meta: Metadata::default(),
        body: Body::default(),
        keep_body: !matches!(opts.image, crate::options::DecodeDepth::Skip),
        keep_meta: opts.keep_metadata(),
        meta_budget: opts.metadata_budget(),
        image_budget: opts.image_budget(),
        palette_count: 0,
        color_type: 0,
        done: false,
    };

    let mut first = true;
    while !d.done {
        opts.check_cancelled()?;
        if r.at_eof()? {
            if opts.damage.skip_damaged {
                warn!("input ended before the end-of-image record");
                break;
            }
            return Err(Error::format("unexpected end of input before IEND"));
        }

        let len = r.read_u32::<BigEndian>()? as usize;
        let mut t = [0u8; 4];
        r.read_exact(&mut t)?;
        let ctype = ChunkType(t);
        if len > MAX_CHUNK_LEN {
            return Err(Error::format(format!("chunk length {len} out of range")));
        }

        // Reject against the budget before touching the payload.
        let budget = if is_pixel_chunk(ctype) {
            &mut d.image_budget
        } else {
            &mut d.meta_budget
        };
        budget.charge(len as u64)?;

        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload)?;
        let stored = r.read_u32::<BigEndian>()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&t);
        hasher.update(&payload);
        let computed = hasher.finalize();
        if stored != computed {
            if opts.damage.skip_damaged {
                warn!(chunk = %ctype, "checksum mismatch, skipping record");
                continue;
            }
            return Err(Error::Integrity { stored, computed });
        }

        if first && ctype != ChunkType::IHDR {
            return Err(Error::format("first chunk is not IHDR"));
        }
        first = false;

        if ctype == ChunkType::PLTE && !d.body.idat.is_empty() && !opts.damage.allow_misordered {
            return Err(Error::format("palette after image data"));
        }

        match d.handle(ctype, payload, stored) {
            Ok(()) => {}
            Err(e) if e.is_skippable() && opts.damage.skip_damaged => {
                warn!(chunk = %ctype, error = %e, "skipping damaged record");
            }
            Err(e) => return Err(e),
        }
    }

    if d.done && !r.at_eof()? && !opts.damage.allow_trailing_data {
        return Err(Error::format("trailing data after IEND"));
    }

    let body = if d.keep_body { Some(d.body) } else { None };
    Ok((body, d.meta))
}

/// Eager-decode and transform steps that run once the walk is complete.
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
                apply_transforms(pixmap, &opts.transform, meta.gamma, orientation);
            }
        }
    }
    Ok(())
}

fn is_pixel_chunk(ctype: ChunkType) -> bool {
    matches!(
        ctype,
        ChunkType::IHDR | ChunkType::PLTE | ChunkType::tRNS | ChunkType::IDAT | ChunkType::IEND
    )
}

struct Decoder {
    meta: Metadata,
    body: Body,
    keep_body: bool,
    keep_meta: bool,
    meta_budget: Budget,
    image_budget: Budget,
    palette_count: usize,
    color_type: u8,
    done: bool,
}

impl Decoder {
    fn handle(&mut self, ctype: ChunkType, payload: Vec<u8>, crc: u32) -> Result<()> {
        match ctype {
            ChunkType::IHDR => self.on_ihdr(payload, crc),
            ChunkType::PLTE => self.on_plte(payload, crc),
            ChunkType::tRNS => {
                self.keep_chunk(ctype, payload, crc);
                Ok(())
            }
            ChunkType::IDAT => {
                if self.keep_body {
                    self.body.idat.push(RawChunk {
                        ctype,
                        payload,
                        crc,
                    });
                }
                Ok(())
            }
            ChunkType::IEND => {
                if !payload.is_empty() {
                    return Err(Error::format("IEND carries a payload"));
                }
                self.done = true;
                Ok(())
            }
            _ if !self.keep_meta => {
                if ctype.is_ancillary() {
                    Ok(())
                } else {
                    Err(Error::format(format!("unknown critical chunk {ctype}")))
                }
            }
            ChunkType::tIME => self.on_time(&payload),
            ChunkType::tEXt => self.on_text(&payload),
            ChunkType::zTXt => self.on_ztxt(&payload),
            ChunkType::iTXt => self.on_itxt(&payload),
            ChunkType::cHRM => self.on_chrm(&payload),
            ChunkType::gAMA => self.on_gama(&payload),
            ChunkType::sRGB => self.on_srgb(&payload),
            ChunkType::sBIT => self.on_sbit(&payload),
            ChunkType::bKGD => self.on_bkgd(&payload),
            ChunkType::pHYs => self.on_phys(&payload),
            ChunkType::hIST => self.on_hist(&payload),
            ChunkType::iCCP => self.on_iccp(&payload),
            ChunkType::eXIf => self.on_exif(payload),
            _ => self.on_unknown(ctype, payload),
        }
    }

    fn keep_chunk(&mut self, ctype: ChunkType, payload: Vec<u8>, crc: u32) {
        if !self.keep_body {
            return;
        }
        let chunk = RawChunk {
            ctype,
            payload,
            crc,
        };
        match ctype {
            ChunkType::IHDR => self.body.ihdr = Some(chunk),
            ChunkType::PLTE => self.body.plte = Some(chunk),
            ChunkType::tRNS => self.body.trns = Some(chunk),
            _ => {}
        }
    }

    fn on_ihdr(&mut self, payload: Vec<u8>, crc: u32) -> Result<()> {
        if self.meta.width != 0 {
            return Err(Error::consistency("second IHDR chunk"));
        }
        let header = Header::parse(&payload)?;
        self.color_type = header.color_type;
        self.meta.width = header.width;
        self.meta.height = header.height;
        self.meta.bit_depth = header.bit_depth;
        self.meta.color = match header.color_type {
            0 => ColorModel::Gray,
            2 => ColorModel::Rgb,
            3 => ColorModel::Indexed,
            4 => ColorModel::GrayAlpha,
            6 => ColorModel::Rgba,
            t => return Err(Error::format(format!("unknown color type {t}"))),
        };
        self.keep_chunk(ChunkType::IHDR, payload, crc);
        Ok(())
    }

    fn on_plte(&mut self, payload: Vec<u8>, crc: u32) -> Result<()> {
        if self.palette_count != 0 {
            return Err(Error::consistency("second PLTE chunk"));
        }
        if payload.is_empty() || payload.len() % 3 != 0 || payload.len() > 256 * 3 {
            return Err(Error::format(format!("bad PLTE length {}", payload.len())));
        }
        self.palette_count = payload.len() / 3;
        self.keep_chunk(ChunkType::PLTE, payload, crc);
        Ok(())
    }

    fn on_time(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.last_modified.is_some() {
            return Err(Error::consistency("second tIME chunk"));
        }
        if p.len() != 7 {
            return Err(Error::format(format!("bad tIME length {}", p.len())));
        }
        let year = i32::from(p[0]) * 256 + i32::from(p[1]);
        let naive = NaiveDate::from_ymd_opt(year, p[2] as u32, p[3] as u32)
            .and_then(|d| d.and_hms_opt(p[4] as u32, p[5] as u32, p[6] as u32))
            .ok_or_else(|| {
                Error::format(format!(
                    "impossible timestamp {year}-{:02}-{:02} {:02}:{:02}:{:02}",
                    p[2], p[3], p[4], p[5], p[6]
                ))
            })?;
        self.meta.last_modified = Some(Utc.from_utc_datetime(&naive));
        Ok(())
    }

    fn on_text(&mut self, p: &[u8]) -> Result<()> {
        let (key, value) = split_nul(p)?;
        self.meta.text.push(TextEntry {
            key: latin1(key),
            value: latin1(value),
            kind: TextKind::Plain,
            ..Default::default()
        });
        Ok(())
    }

    fn on_ztxt(&mut self, p: &[u8]) -> Result<()> {
        let (key, rest) = split_nul(p)?;
        let (&method, compressed) = rest
            .split_first()
            .ok_or_else(|| Error::format("truncated zTXt chunk"))?;
        if method != 0 {
            return Err(Error::format(format!("unknown compression method {method}")));
        }
        let value = get_codec(CodecId::Deflate)?.decompress(compressed)?;
        self.meta.text.push(TextEntry {
            key: latin1(key),
            value: latin1(&value),
            kind: TextKind::Compressed,
            ..Default::default()
        });
        Ok(())
    }

    fn on_itxt(&mut self, p: &[u8]) -> Result<()> {
        let (key, rest) = split_nul(p)?;
        if rest.len() < 2 {
            return Err(Error::format("truncated iTXt chunk"));
        }
        let (flag, method) = (rest[0], rest[1]);
        let (lang, rest) = split_nul(&rest[2..])?;
        let (translated, raw_value) = split_nul(rest)?;
        let value = match flag {
            0 => raw_value.to_vec(),
            1 => {
                if method != 0 {
                    return Err(Error::format(format!(
                        "unknown compression method {method}"
                    )));
                }
                get_codec(CodecId::Deflate)?.decompress(raw_value)?
            }
            f => return Err(Error::format(format!("unknown compression flag {f}"))),
        };

        let key = String::from_utf8(key.to_vec())
            .map_err(|_| Error::format("iTXt key is not valid UTF-8"))?;
        if key == PACKET_KEY {
            if !self.meta.packet.is_absent() {
                return Err(Error::consistency("second annotation packet"));
            }
            self.meta.packet = Deferred::Raw(value);
            return Ok(());
        }

        self.meta.text.push(TextEntry {
            key,
            value: String::from_utf8(value)
                .map_err(|_| Error::format("iTXt value is not valid UTF-8"))?,
            kind: TextKind::CompressedLocalized,
            language_tag: latin1(lang),
            translated_key: String::from_utf8(translated.to_vec())
                .map_err(|_| Error::format("iTXt translated key is not valid UTF-8"))?,
        });
        Ok(())
    }

    fn on_chrm(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.chroma.is_some() {
            return Err(Error::consistency("second cHRM chunk"));
        }
        if p.len() != 32 {
            return Err(Error::format(format!("bad cHRM length {}", p.len())));
        }
        let f = |i: usize| BigEndian::read_u32(&p[i..i + 4]);
        self.meta.chroma = Some(Chroma {
            white_x: f(0),
            white_y: f(4),
            red_x: f(8),
            red_y: f(12),
            green_x: f(16),
            green_y: f(20),
            blue_x: f(24),
            blue_y: f(28),
        });
        Ok(())
    }

    fn on_gama(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.gamma.is_some() {
            return Err(Error::consistency("second gAMA chunk"));
        }
        if p.len() != 4 {
            return Err(Error::format(format!("bad gAMA length {}", p.len())));
        }
        self.meta.gamma = Some(BigEndian::read_u32(p));
        Ok(())
    }

    fn on_srgb(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.srgb_intent.is_some() {
            return Err(Error::consistency("second sRGB chunk"));
        }
        if p.len() != 1 {
            return Err(Error::format(format!("bad sRGB length {}", p.len())));
        }
        self.meta.srgb_intent = Some(
            SrgbIntent::from_byte(p[0])
                .ok_or_else(|| Error::format(format!("unknown rendering intent {}", p[0])))?,
        );
        Ok(())
    }

    fn on_sbit(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.significant_bits.is_some() {
            return Err(Error::consistency("second sBIT chunk"));
        }
        let mut sb = SignificantBits::default();
        match (self.color_type, p.len()) {
            (0, 1) => sb.gray = p[0],
            (2 | 3, 3) => {
                sb.red = p[0];
                sb.green = p[1];
                sb.blue = p[2];
            }
            (4, 2) => {
                sb.gray = p[0];
                sb.alpha = p[1];
            }
            (6, 4) => {
                sb.red = p[0];
                sb.green = p[1];
                sb.blue = p[2];
                sb.alpha = p[3];
            }
            (_, n) => return Err(Error::format(format!("bad sBIT length {n}"))),
        }
        self.meta.significant_bits = Some(sb);
        Ok(())
    }

    fn on_bkgd(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.background.is_some() {
            return Err(Error::consistency("second bKGD chunk"));
        }
        let mut bg = Background::default();
        match (self.color_type, p.len()) {
            (0 | 4, 2) => bg.gray = BigEndian::read_u16(p),
            (2 | 6, 6) => {
                bg.red = BigEndian::read_u16(&p[0..2]);
                bg.green = BigEndian::read_u16(&p[2..4]);
                bg.blue = BigEndian::read_u16(&p[4..6]);
            }
            (3, 1) => bg.palette_index = p[0],
            (_, n) => return Err(Error::format(format!("bad bKGD length {n}"))),
        }
        self.meta.background = Some(bg);
        Ok(())
    }

    fn on_phys(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.physical_dims.is_some() {
            return Err(Error::consistency("second pHYs chunk"));
        }
        if p.len() != 9 {
            return Err(Error::format(format!("bad pHYs length {}", p.len())));
        }
        self.meta.physical_dims = Some(PhysicalDims {
            x: BigEndian::read_u32(&p[0..4]),
            y: BigEndian::read_u32(&p[4..8]),
            unit: p[8],
        });
        Ok(())
    }

    fn on_hist(&mut self, p: &[u8]) -> Result<()> {
        if self.meta.histogram.is_some() {
            return Err(Error::consistency("second hIST chunk"));
        }
        if self.palette_count == 0 {
            return Err(Error::format("hIST without a preceding palette"));
        }
        if p.len() != self.palette_count * 2 {
            return Err(Error::format(format!(
                "hIST length {} does not match palette of {} entries",
                p.len(),
                self.palette_count
            )));
        }
        self.meta.histogram = Some(
            p.chunks_exact(2)
                .map(BigEndian::read_u16)
                .collect(),
        );
        Ok(())
    }

    fn on_iccp(&mut self, p: &[u8]) -> Result<()> {
        if !self.meta.profile.is_absent() {
            return Err(Error::consistency("second embedded profile"));
        }
        let (name, rest) = split_nul(p)?;
        let (&method, compressed) = rest
            .split_first()
            .ok_or_else(|| Error::format("truncated iCCP chunk"))?;
        if method != 0 {
            return Err(Error::format(format!("unknown compression method {method}")));
        }
        let profile = get_codec(CodecId::Deflate)?.decompress(compressed)?;
        self.meta.profile_name = Some(latin1(name));
        self.meta.profile = Deferred::Raw(profile);
        Ok(())
    }

    fn on_exif(&mut self, payload: Vec<u8>) -> Result<()> {
        if !self.meta.tags.is_absent() {
            return Err(Error::consistency("second tag-table chunk"));
        }
        self.meta.tags = Deferred::Raw(payload);
        Ok(())
    }

    fn on_unknown(&mut self, ctype: ChunkType, payload: Vec<u8>) -> Result<()> {
        if !ctype.is_ancillary() {
            return Err(Error::format(format!("unknown critical chunk {ctype}")));
        }
        self.meta.extensions.push(ctype, payload);
        Ok(())
    }
}

fn split_nul(b: &[u8]) -> Result<(&[u8], &[u8])> {
    match b.iter().position(|&c| c == 0) {
        Some(i) => Ok((&b[..i], &b[i + 1..])),
        None => Err(Error::format("no text separator found")),
    }
}

fn latin1(b: &[u8]) -> String {
    b.iter().map(|&c| c as char).collect()
}

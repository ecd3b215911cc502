//! Format registry, content sniffing, and the top-level decode/encode
//! entry points.
//!
//! Formats are registered as {name, magic pattern, decode entry} tuples in
//! a process-wide list. Sniffing peeks exactly the magic's length per
//! candidate — never consuming the stream, never requiring `Seek` — and
//! the first match wins. The built-in formats are installed once, on first
//! use; nothing stops an embedder from registering more.

use std::io::{Read, Write};
use std::sync::{Once, RwLock};

use crate::error::{Error, Result};
use crate::gif;
use crate::image::{ImageConfig, Pixmap};
use crate::jpeg;
use crate::options::{
    DecodeDepth, DecodeDepthOptions, ReadOption, ResolvedOptions, WriteOption,
};
use crate::png;
use crate::stream::PeekReader;

// ── Magic patterns ───────────────────────────────────────────────────────────

/// A magic byte pattern. The byte `b'?'` matches any single input byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magic(Vec<Option<u8>>);

impl Magic {
    pub fn new(pattern: &[u8]) -> Self {
        Magic(
            pattern
                .iter()
                .map(|&b| if b == b'?' { None } else { Some(b) })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() == self.0.len()
            && self
                .0
                .iter()
                .zip(bytes)
                .all(|(pat, &b)| pat.map_or(true, |p| p == b))
    }
}

// ── The registry ─────────────────────────────────────────────────────────────

/// A registered decode entry point. Receives the stream with the magic
/// bytes still unconsumed, plus the caller's option records.
pub type DecodeFn = fn(&mut PeekReader<&mut dyn Read>, &[ReadOption]) -> Result<Decoded>;

#[derive(Clone)]
struct Format {
    name: String,
    magic: Magic,
    decode: DecodeFn,
}

static FORMATS: RwLock<Vec<Format>> = RwLock::new(Vec::new());
static BUILT_INS: Once = Once::new();

/// Register a format. No de-duplication: lookup is sequential first-match,
/// and the list is expected to stay small.
pub fn register(name: &str, magic: &[u8], decode: DecodeFn) {
    let mut formats = FORMATS.write().expect("format registry poisoned");
    formats.push(Format {
        name: name.to_owned(),
        magic: Magic::new(magic),
        decode,
    });
}

fn ensure_built_ins() {
    BUILT_INS.call_once(|| {
        register("png", &png::SIGNATURE, decode_png_entry);
        register("jpeg", &[0xFF, 0xD8], decode_jpeg_entry);
        register("gif", b"GIF8?a", decode_gif_entry);
    });
}

fn sniff(r: &mut PeekReader<&mut dyn Read>) -> Result<Format> {
    let formats = FORMATS.read().expect("format registry poisoned");
    for f in formats.iter() {
        let prefix = r.peek(f.magic.len())?;
        if f.magic.matches(prefix) {
            return Ok(f.clone());
        }
    }
    Err(Error::UnknownFormat)
}

// ── Decoded handles ──────────────────────────────────────────────────────────

/// The image body handle: verbatim pixel-bearing records per format, with
/// memoized on-demand materialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Png(png::Body),
    Jpeg(jpeg::Body),
    Gif(gif::Body),
}

impl Body {
    pub fn materialize(&mut self) -> Result<&Pixmap> {
        match self {
            Body::Png(b) => b.materialize(),
            Body::Jpeg(b) => b.materialize(),
            Body::Gif(b) => b.materialize(),
        }
    }
}

/// The metadata handle for a decoded image.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    Png(png::Metadata),
    Jpeg(jpeg::Metadata),
    Gif(gif::Metadata),
}

impl Metadata {
    pub fn format_name(&self) -> &'static str {
        match self {
            Metadata::Png(_) => "png",
            Metadata::Jpeg(_) => "jpeg",
            Metadata::Gif(_) => "gif",
        }
    }

    /// Dimensions and color model, available without any deferred decode.
    pub fn config(&self) -> ImageConfig {
        match self {
            Metadata::Png(m) => m.config(),
            Metadata::Jpeg(m) => m.config(),
            Metadata::Gif(m) => m.config(),
        }
    }

    pub fn as_png(&self) -> Option<&png::Metadata> {
        match self {
            Metadata::Png(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_png_mut(&mut self) -> Option<&mut png::Metadata> {
        match self {
            Metadata::Png(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_jpeg(&self) -> Option<&jpeg::Metadata> {
        match self {
            Metadata::Jpeg(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_jpeg_mut(&mut self) -> Option<&mut jpeg::Metadata> {
        match self {
            Metadata::Jpeg(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_gif(&self) -> Option<&gif::Metadata> {
        match self {
            Metadata::Gif(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_gif_mut(&mut self) -> Option<&mut gif::Metadata> {
        match self {
            Metadata::Gif(m) => Some(m),
            _ => None,
        }
    }
}

/// Result of a successful decode: the format's registered name, the image
/// body (absent when body decoding was skipped), and the metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub format: String,
    pub body: Option<Body>,
    pub metadata: Metadata,
}

impl Decoded {
    pub fn config(&self) -> ImageConfig {
        self.metadata.config()
    }
}

// ── Decode entry points ──────────────────────────────────────────────────────

/// Decode an image in any registered format, honoring the supplied option
/// records.
pub fn decode_with_options(r: &mut dyn Read, opts: &[ReadOption]) -> Result<Decoded> {
    ensure_built_ins();
    let mut pr = PeekReader::new(r);
    let f = sniff(&mut pr)?;
    let mut decoded = (f.decode)(&mut pr, opts)?;
    decoded.format = f.name;
    Ok(decoded)
}

/// Decode just the image body; metadata records are discarded.
pub fn decode_image(r: &mut dyn Read, opts: &[ReadOption]) -> Result<Decoded> {
    let mut opts = opts.to_vec();
    opts.push(ReadOption::Decode(DecodeDepthOptions {
        image: DecodeDepth::Decode,
        metadata: DecodeDepth::Skip,
    }));
    decode_with_options(r, &opts)
}

/// Decode just the metadata; the image body is not retained.
///
/// When both the image and its metadata are wanted, one
/// [`decode_with_options`] call is cheaper than two passes.
pub fn decode_metadata(r: &mut dyn Read, opts: &[ReadOption]) -> Result<Metadata> {
    let mut opts = opts.to_vec();
    opts.push(ReadOption::Decode(DecodeDepthOptions {
        image: DecodeDepth::Skip,
        metadata: DecodeDepth::Decode,
    }));
    Ok(decode_with_options(r, &opts)?.metadata)
}

/// Decode only dimensions and color model, touching as little of the
/// stream's contents as the format allows.
pub fn decode_config(r: &mut dyn Read) -> Result<(ImageConfig, String)> {
    let decoded = decode_with_options(
        r,
        &[ReadOption::Decode(DecodeDepthOptions {
            image: DecodeDepth::Skip,
            metadata: DecodeDepth::Defer,
        })],
    )?;
    Ok((decoded.config(), decoded.format))
}

fn decode_png_entry(r: &mut PeekReader<&mut dyn Read>, opts: &[ReadOption]) -> Result<Decoded> {
    let resolved = ResolvedOptions::from_list(opts)?;
    let (mut body, mut meta) = png::reader::decode_stream(r, &resolved)?;
    png::reader::post_process(&mut body, &mut meta, &resolved)?;
    Ok(Decoded {
        format: String::new(),
        body: body.map(Body::Png),
        metadata: Metadata::Png(meta),
    })
}

fn decode_jpeg_entry(r: &mut PeekReader<&mut dyn Read>, opts: &[ReadOption]) -> Result<Decoded> {
    let resolved = ResolvedOptions::from_list(opts)?;
    let (mut body, mut meta) = jpeg::reader::decode_stream(r, &resolved)?;
    jpeg::reader::post_process(&mut body, &mut meta, &resolved)?;
    Ok(Decoded {
        format: String::new(),
        body: body.map(Body::Jpeg),
        metadata: Metadata::Jpeg(meta),
    })
}

fn decode_gif_entry(r: &mut PeekReader<&mut dyn Read>, opts: &[ReadOption]) -> Result<Decoded> {
    let resolved = ResolvedOptions::from_list(opts)?;
    let (mut body, mut meta) = gif::reader::decode_stream(r, &resolved)?;
    gif::reader::post_process(&mut body, &mut meta, &resolved)?;
    Ok(Decoded {
        format: String::new(),
        body: body.map(Body::Gif),
        metadata: Metadata::Gif(meta),
    })
}

// ── Encode entry points ──────────────────────────────────────────────────────

/// Re-encode a decoded image, metadata included. An unmaterialized,
/// unmutated body round-trips byte-for-byte.
pub fn encode(w: &mut dyn Write, decoded: &Decoded) -> Result<()> {
    let body = decoded
        .body
        .as_ref()
        .ok_or_else(|| Error::Option("encoding requires an image body".into()))?;
    encode_parts(w, body, Some(&decoded.metadata))
}

/// Encode a body with metadata supplied as write option records. At most
/// one metadata record may be present; with none, empty metadata of the
/// body's format is written.
pub fn encode_with_options(w: &mut dyn Write, body: &Body, opts: &[WriteOption]) -> Result<()> {
    let mut meta: Option<&Metadata> = None;
    for opt in opts {
        match opt {
            WriteOption::Metadata(m) => {
                if meta.is_some() {
                    return Err(Error::Option("duplicate metadata option record".into()));
                }
                meta = Some(m);
            }
        }
    }
    encode_parts(w, body, meta)
}

fn encode_parts(w: &mut dyn Write, body: &Body, meta: Option<&Metadata>) -> Result<()> {
    match (body, meta) {
        (Body::Png(b), Some(Metadata::Png(m))) => png::writer::encode(w, b, m),
        (Body::Png(b), None) => png::writer::encode(w, b, &png::Metadata::default()),
        (Body::Jpeg(b), Some(Metadata::Jpeg(m))) => jpeg::writer::encode(w, b, m),
        (Body::Jpeg(b), None) => jpeg::writer::encode(w, b, &jpeg::Metadata::default()),
        (Body::Gif(b), Some(Metadata::Gif(m))) => gif::writer::encode(w, b, m),
        (Body::Gif(b), None) => gif::writer::encode(w, b, &gif::Metadata::default()),
        _ => Err(Error::Option(
            "metadata and body are from different formats".into(),
        )),
    }
}

//! Compression collaborator registry.
//!
//! The container layer never decompresses anything itself: every pixel or
//! text payload that needs inflating is handed to a [`Codec`] looked up by
//! [`CodecId`]. Deflate (zlib) is built in because it is the one scheme the
//! supported text records declare. The raster codecs for JPEG scans and
//! GIF LZW data ship without implementations — pixel compression is an
//! external concern — and resolving them fails with a typed unavailability
//! error unless a component registered one at load time.
//!
//! The registry is process-wide. It is expected to be populated during
//! initialization, before concurrent decodes begin, and is read-mostly
//! afterwards.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Runtime discriminant for a compression scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// zlib-wrapped DEFLATE, as used by PNG text and image data.
    Deflate,
    /// GIF raster LZW.
    Lzw,
    /// Baseline JPEG entropy-coded scan data.
    JpegBaseline,
}

impl CodecId {
    /// Human-readable name (for diagnostics only — never parsed).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Deflate => "deflate",
            CodecId::Lzw => "lzw",
            CodecId::JpegBaseline => "jpeg-baseline",
        }
    }
}

/// One compression scheme. Implementations must be stateless per call;
/// `compress` and `decompress` may be invoked concurrently on different
/// buffers.
pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

// ── Built-in codec ───────────────────────────────────────────────────────────

pub struct DeflateCodec;

impl Codec for DeflateCodec {
    fn codec_id(&self) -> CodecId {
        CodecId::Deflate
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut enc =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data)?;
        Ok(enc.finish()?)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| Error::format(format!("bad deflate stream: {e}")))?;
        Ok(out)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

static CODECS: RwLock<Option<HashMap<CodecId, Arc<dyn Codec>>>> = RwLock::new(None);

fn built_ins() -> HashMap<CodecId, Arc<dyn Codec>> {
    let mut t: HashMap<CodecId, Arc<dyn Codec>> = HashMap::new();
    t.insert(CodecId::Deflate, Arc::new(DeflateCodec));
    t
}

/// Register a codec, overwriting any prior registration for its id.
pub fn register_codec(codec: Arc<dyn Codec>) {
    let mut table = CODECS.write().expect("codec registry poisoned");
    table
        .get_or_insert_with(built_ins)
        .insert(codec.codec_id(), codec);
}

/// Resolve a codec id.
///
/// Fails with [`Error::UnavailableCompression`] when nothing is registered
/// for `id`. Callers must not fall back to another codec.
pub fn get_codec(id: CodecId) -> Result<Arc<dyn Codec>> {
    let mut table = CODECS.write().expect("codec registry poisoned");
    table
        .get_or_insert_with(built_ins)
        .get(&id)
        .cloned()
        .ok_or(Error::UnavailableCompression(id.name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_roundtrip() {
        let codec = get_codec(CodecId::Deflate).unwrap();
        let data = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let packed = codec.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(codec.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn deflate_rejects_garbage() {
        let codec = get_codec(CodecId::Deflate).unwrap();
        assert!(matches!(
            codec.decompress(b"\xff\xfe\xfd"),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn jpeg_scan_codec_is_absent() {
        assert!(matches!(
            get_codec(CodecId::JpegBaseline),
            Err(Error::UnavailableCompression("jpeg-baseline"))
        ));
    }
}

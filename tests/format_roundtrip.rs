use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use imagemeta::codec::{Codec, CodecId};
use imagemeta::options::DamageOptions;
use imagemeta::png::ChunkType;
use imagemeta::{
    decode_config, decode_metadata, decode_with_options, encode, png, CancelToken, ColorModel,
    DecodeDepth, DecodeDepthOptions, Error, LimitOptions, MetadataKind, PixelLayout, Pixmap,
    ReadOption, TagTable, TextEntry, TextKind,
};
use proptest::prelude::*;

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn skip_image() -> Vec<ReadOption> {
    vec![ReadOption::Decode(DecodeDepthOptions {
        image: DecodeDepth::Skip,
        metadata: DecodeDepth::Defer,
    })]
}

/// A PNG with one of everything, produced by our own writer so later
/// re-encodes are byte-comparable.
fn rich_png() -> Vec<u8> {
    let mut body = png::Body::default();
    let pixels: Vec<u8> = (0..4u32 * 3 * 3).map(|i| (i * 5 % 251) as u8).collect();
    body.set_image(Pixmap::new(4, 3, PixelLayout::Rgb8, pixels).unwrap());

    let mut meta = png::Metadata::default();
    meta.width = 4;
    meta.height = 3;
    meta.color = ColorModel::Rgb;
    meta.gamma = Some(45455);
    meta.chroma = Some(png::Chroma {
        white_x: 31270,
        white_y: 32900,
        red_x: 64000,
        red_y: 33000,
        green_x: 30000,
        green_y: 60000,
        blue_x: 15000,
        blue_y: 6000,
    });
    meta.last_modified = Some(Utc.with_ymd_and_hms(2024, 3, 9, 8, 7, 6).unwrap());
    meta.text.push(TextEntry::plain("Composer", "Test"));
    meta.text.push(TextEntry {
        key: "Description".into(),
        value: "a tiny gradient".into(),
        kind: TextKind::Compressed,
        ..Default::default()
    });
    meta.profile_name = Some("test-profile".into());
    meta.set_profile_raw(b"fake profile bytes, long enough to matter".to_vec());
    meta.set_tag_table_raw(b"II*\0fake tag table".to_vec());
    meta.set_packet_raw(b"<x:xmpmeta xmlns:x='adobe:ns:meta/'/>".to_vec());
    meta.extensions.push(ChunkType(*b"veNd"), vec![1, 2, 3]);
    meta.extensions.push(ChunkType(*b"veNd"), vec![4, 5]);

    let mut out = Vec::new();
    png::writer::encode(&mut out, &body, &meta).unwrap();
    out
}

// ── PNG round trips ──────────────────────────────────────────────────────────

#[test]
fn png_metadata_survives_a_full_roundtrip() {
    let original = rich_png();
    let mut decoded = decode_with_options(&mut &original[..], &[]).unwrap();
    assert_eq!(decoded.format, "png");

    let meta = decoded.metadata.as_png().unwrap();
    assert_eq!(meta.config().width, 4);
    assert_eq!(meta.gamma, Some(45455));
    assert_eq!(meta.text.len(), 2);
    assert_eq!(meta.text[0].key, "Composer");
    assert_eq!(meta.text[0].value, "Test");
    assert_eq!(meta.text[0].kind, TextKind::Plain);
    assert_eq!(meta.text[1].kind, TextKind::Compressed);
    assert_eq!(
        meta.profile_raw().unwrap(),
        b"fake profile bytes, long enough to matter"
    );
    assert_eq!(meta.tag_table_raw().unwrap(), b"II*\0fake tag table");
    assert_eq!(meta.profile_name.as_deref(), Some("test-profile"));
    let vend = ChunkType(*b"veNd");
    let exts: Vec<&[u8]> = meta.extensions.get_all(&vend).collect();
    assert_eq!(exts, vec![&[1u8, 2, 3][..], &[4u8, 5][..]]);

    // Pixels survive decode.
    let pixels: Vec<u8> = (0..4u32 * 3 * 3).map(|i| (i * 5 % 251) as u8).collect();
    assert_eq!(
        decoded.body.as_mut().unwrap().materialize().unwrap().data,
        pixels
    );

    // Decode of an encode of a decode is byte-identical: the verbatim
    // body is replayed and every metadata record re-derives identically.
    let mut second = Vec::new();
    encode(&mut second, &decoded).unwrap();
    let decoded_again = decode_with_options(&mut &second[..], &skip_image()).unwrap();
    let mut third = Vec::new();
    let mut with_body = decoded.clone();
    with_body.metadata = decoded_again.metadata;
    encode(&mut third, &with_body).unwrap();
    assert_eq!(second, third);
}

#[test]
fn png_timestamp_roundtrip() {
    let original = rich_png();
    let meta = decode_metadata(&mut &original[..], &[]).unwrap();
    let t = meta.as_png().unwrap().last_modified.unwrap();
    assert_eq!(t, Utc.with_ymd_and_hms(2024, 3, 9, 8, 7, 6).unwrap());
}

#[test]
fn png_on_disk_roundtrip() {
    let original = rich_png();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.png");
    std::fs::write(&path, &original).unwrap();

    let mut f = std::fs::File::open(&path).unwrap();
    let decoded = decode_with_options(&mut f, &skip_image()).unwrap();
    assert_eq!(decoded.format, "png");
    assert_eq!(decoded.config().width, 4);
}

// ── Damage tolerance ─────────────────────────────────────────────────────────

/// Find a chunk and flip a bit in its integrity code.
fn corrupt_chunk_crc(data: &mut [u8], ctype: &[u8; 4]) {
    let pos = data
        .windows(4)
        .position(|w| w == ctype)
        .expect("chunk present");
    let len = u32::from_be_bytes(data[pos - 4..pos].try_into().unwrap()) as usize;
    data[pos + 4 + len] ^= 0xFF;
}

#[test]
fn corrupted_record_fails_without_tolerance() {
    let mut data = rich_png();
    corrupt_chunk_crc(&mut data, b"tEXt");
    assert!(matches!(
        decode_with_options(&mut &data[..], &[]),
        Err(Error::Integrity { .. })
    ));
}

#[test]
fn corrupted_record_is_skipped_with_tolerance() {
    let mut data = rich_png();
    corrupt_chunk_crc(&mut data, b"tEXt");
    let mut opts = skip_image();
    opts.push(ReadOption::Damage(DamageOptions {
        skip_damaged: true,
        ..Default::default()
    }));
    let decoded = decode_with_options(&mut &data[..], &opts).unwrap();
    let meta = decoded.metadata.as_png().unwrap();
    // The plain entry was in the damaged record; the compressed one survives.
    assert_eq!(meta.text.len(), 1);
    assert_eq!(meta.text[0].kind, TextKind::Compressed);
    assert_eq!(meta.gamma, Some(45455));
}

#[test]
fn trailing_data_needs_the_trailing_option() {
    let mut data = rich_png();
    data.extend_from_slice(b"junk after the end");
    assert!(matches!(
        decode_with_options(&mut &data[..], &skip_image()),
        Err(Error::Format(_))
    ));

    let mut opts = skip_image();
    opts.push(ReadOption::Damage(DamageOptions {
        allow_trailing_data: true,
        ..Default::default()
    }));
    assert!(decode_with_options(&mut &data[..], &opts).is_ok());
}

// ── Resource limits ──────────────────────────────────────────────────────────

struct CountingReader<R> {
    inner: R,
    read: Arc<AtomicUsize>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read.fetch_add(n, Ordering::Relaxed);
        Ok(n)
    }
}

#[test]
fn oversized_record_is_rejected_before_its_payload_is_read() {
    // Signature + IHDR, then a tEXt chunk declaring a 10 KiB payload.
    let mut data = png::SIGNATURE.to_vec();
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&1u32.to_be_bytes());
    ihdr.extend_from_slice(&1u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 0, 0, 0, 0]);
    data.extend_from_slice(&png_chunk(b"IHDR", &ihdr));
    let big = vec![b'x'; 10 * 1024];
    let mut text = b"key\0".to_vec();
    text.extend_from_slice(&big);
    let header_end = data.len() + 8;
    data.extend_from_slice(&png_chunk(b"tEXt", &text));

    let read = Arc::new(AtomicUsize::new(0));
    let mut counting = CountingReader {
        inner: Cursor::new(data),
        read: read.clone(),
    };
    let opts = [ReadOption::Limits(LimitOptions {
        max_metadata_bytes: Some(64),
        max_image_bytes: None,
    })];
    let err = decode_with_options(&mut counting, &opts).unwrap_err();
    assert!(matches!(err, Error::ResourceLimit { declared, .. } if declared == text.len() as u64));
    assert!(
        read.load(Ordering::Relaxed) <= header_end,
        "no payload byte may be read: read {} of a possible {}",
        read.load(Ordering::Relaxed),
        header_end
    );
}

fn png_chunk(ctype: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(ctype);
    out.extend_from_slice(payload);
    let mut h = crc32fast::Hasher::new();
    h.update(ctype);
    h.update(payload);
    out.extend_from_slice(&h.finalize().to_be_bytes());
    out
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[test]
fn fired_token_cancels_between_records() {
    let data = rich_png();
    let token = CancelToken::new();
    token.cancel();
    let mut opts = skip_image();
    opts.push(ReadOption::Cancel(token));
    assert!(matches!(
        decode_with_options(&mut &data[..], &opts),
        Err(Error::Cancelled)
    ));
}

// ── Sub-codec registry behavior ──────────────────────────────────────────────

#[test]
fn missing_profile_codec_fails_the_field_not_the_decode() {
    let original = rich_png();
    let mut decoded = decode_with_options(&mut &original[..], &skip_image()).unwrap();
    let meta = decoded.metadata.as_png_mut().unwrap();

    // No profile sub-codec is registered in this test binary.
    assert_eq!(
        meta.profile().unwrap_err(),
        Error::UnavailableCodec(MetadataKind::Profile)
    );
    // The surrounding decode was unaffected.
    assert_eq!(meta.text.len(), 2);
    // The failure is cached and returned again.
    assert_eq!(
        meta.profile().unwrap_err(),
        Error::UnavailableCodec(MetadataKind::Profile)
    );
}

static TAG_DECODES: AtomicUsize = AtomicUsize::new(0);

fn counting_tag_decode(_: &[u8]) -> imagemeta::Result<TagTable> {
    TAG_DECODES.fetch_add(1, Ordering::SeqCst);
    Ok(TagTable {
        creator: Some("counted".into()),
        orientation: Some(1),
    })
}

fn tag_encode(_: &TagTable) -> imagemeta::Result<Vec<u8>> {
    Ok(b"II*\0re-encoded".to_vec())
}

#[test]
fn deferred_field_decodes_at_most_once() {
    imagemeta::register_tag_table_codec(counting_tag_decode, tag_encode);

    let original = rich_png();
    let mut decoded = decode_with_options(&mut &original[..], &skip_image()).unwrap();
    let meta = decoded.metadata.as_png_mut().unwrap();

    let before = TAG_DECODES.load(Ordering::SeqCst);
    let first = meta.tag_table().unwrap().unwrap().clone();
    let second = meta.tag_table().unwrap().unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(first.creator.as_deref(), Some("counted"));
    assert_eq!(
        TAG_DECODES.load(Ordering::SeqCst),
        before + 1,
        "second access must hit the cache"
    );
}

// ── JPEG ─────────────────────────────────────────────────────────────────────

fn jpeg_segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn sample_jpeg() -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    // JFIF header.
    let mut jfif = b"JFIF\0".to_vec();
    jfif.extend_from_slice(&[0x01, 0x02, 1, 0, 72, 0, 72, 0, 0]);
    out.extend_from_slice(&jpeg_segment(0xE0, &jfif));
    // EXIF, deferred.
    let mut exif = b"Exif\0\0".to_vec();
    exif.extend_from_slice(b"II*\0tagtable");
    out.extend_from_slice(&jpeg_segment(0xE1, &exif));
    // ICC profile split in two, delivered out of order.
    let mut icc2 = b"ICC_PROFILE\0".to_vec();
    icc2.extend_from_slice(&[2, 2]);
    icc2.extend_from_slice(b"-half-two");
    out.extend_from_slice(&jpeg_segment(0xE2, &icc2));
    let mut icc1 = b"ICC_PROFILE\0".to_vec();
    icc1.extend_from_slice(&[1, 2]);
    icc1.extend_from_slice(b"half-one");
    out.extend_from_slice(&jpeg_segment(0xE2, &icc1));
    // Comment.
    out.extend_from_slice(&jpeg_segment(0xFE, b"integration sample"));
    // Tables, frame, scan.
    let mut dqt = vec![0u8];
    dqt.extend_from_slice(&[16u8; 64]);
    out.extend_from_slice(&jpeg_segment(0xDB, &dqt));
    out.extend_from_slice(&jpeg_segment(
        0xC0,
        &[8, 0, 2, 0, 2, 3, 1, 0x22, 0, 2, 0x11, 0, 3, 0x11, 0],
    ));
    out.extend_from_slice(&jpeg_segment(0xDA, &[3, 1, 0, 2, 0x11, 3, 0x11, 0, 63, 0]));
    out.extend_from_slice(&[0x55, 0xAA, 0xFF, 0x00, 0x11]);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

#[test]
fn jpeg_profile_reassembles_by_index_and_resplits_on_write() {
    let original = sample_jpeg();
    let mut decoded = decode_with_options(&mut &original[..], &skip_image()).unwrap();
    assert_eq!(decoded.format, "jpeg");
    {
        let meta = decoded.metadata.as_jpeg().unwrap();
        assert_eq!(meta.profile_raw().unwrap(), b"half-one-half-two");
        assert_eq!(meta.comments, vec!["integration sample".to_string()]);
        assert_eq!(meta.version, Some(0x0102));
        assert_eq!((meta.width, meta.height), (2, 2));
    }

    // Body was skipped above, so decode again keeping the verbatim
    // records for the write side. The default depth never materializes.
    let decoded = decode_with_options(&mut &original[..], &[]).unwrap();
    let mut out = Vec::new();
    encode(&mut out, &decoded).unwrap();
    let second = decode_with_options(&mut &out[..], &skip_image()).unwrap();
    let meta = second.metadata.as_jpeg().unwrap();
    assert_eq!(meta.profile_raw().unwrap(), b"half-one-half-two");
    assert_eq!(meta.tag_table_raw().unwrap(), b"II*\0tagtable");
}

// ── GIF ──────────────────────────────────────────────────────────────────────

struct StubLzw;

impl Codec for StubLzw {
    fn codec_id(&self) -> CodecId {
        CodecId::Lzw
    }
    fn compress(&self, _: &[u8]) -> imagemeta::Result<Vec<u8>> {
        Ok(vec![])
    }
    fn decompress(&self, _: &[u8]) -> imagemeta::Result<Vec<u8>> {
        // Two indexed pixels, enough for the 2x1 sample.
        Ok(vec![0, 1])
    }
}

fn sample_gif() -> Vec<u8> {
    let mut out = b"GIF89a".to_vec();
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&[0x80, 0, 0]);
    out.extend_from_slice(&[10, 20, 30, 200, 210, 220]);
    // Loop count.
    out.extend_from_slice(&[0x21, 0xFF, 11]);
    out.extend_from_slice(b"NETSCAPE2.0");
    out.extend_from_slice(&[3, 1, 5, 0, 0]);
    // Annotation packet.
    out.extend_from_slice(&[0x21, 0xFF, 11]);
    out.extend_from_slice(b"XMP DataXMP");
    out.extend_from_slice(&[4]);
    out.extend_from_slice(b"<x/>");
    out.push(0);
    // Comment.
    out.extend_from_slice(&[0x21, 0xFE, 3]);
    out.extend_from_slice(b"gif");
    out.push(0);
    // Frame.
    out.push(0x2C);
    out.extend_from_slice(&[0, 0, 0, 0, 2, 0, 1, 0, 0]);
    out.push(2);
    out.extend_from_slice(&[2, 0x4C, 0x01, 0]);
    out.push(0x3B);
    out
}

#[test]
fn gif_metadata_roundtrip_is_byte_exact() {
    let original = sample_gif();
    let decoded = decode_with_options(&mut &original[..], &[]).unwrap();
    assert_eq!(decoded.format, "gif");
    let meta = decoded.metadata.as_gif().unwrap();
    assert_eq!(meta.loop_count, Some(5));
    assert_eq!(meta.comments, vec!["gif".to_string()]);
    assert_eq!(meta.packet_raw().unwrap(), b"<x/>");

    let mut out = Vec::new();
    encode(&mut out, &decoded).unwrap();
    assert_eq!(out, original, "canonical-order input must round-trip byte-exact");
}

#[test]
fn gif_materializes_through_a_registered_collaborator() {
    imagemeta::register_codec(std::sync::Arc::new(StubLzw));
    let original = sample_gif();
    let mut decoded = decode_with_options(&mut &original[..], &[]).unwrap();
    let pixmap = decoded.body.as_mut().unwrap().materialize().unwrap();
    assert_eq!(pixmap.layout, PixelLayout::Indexed8);
    assert_eq!(pixmap.data, vec![0, 1]);
    let palette = pixmap.palette.as_ref().unwrap();
    assert_eq!((palette[0].r, palette[0].g, palette[0].b), (10, 20, 30));
}

// ── Sniffing and config ──────────────────────────────────────────────────────

#[test]
fn sniffing_dispatches_all_three_formats() {
    for (data, name) in [
        (rich_png(), "png"),
        (sample_jpeg(), "jpeg"),
        (sample_gif(), "gif"),
    ] {
        let decoded = decode_with_options(&mut &data[..], &skip_image()).unwrap();
        assert_eq!(decoded.format, name);
        assert!(decoded.body.is_none());
    }
}

#[test]
fn decode_config_reports_dimensions_only() {
    let data = sample_jpeg();
    let (config, name) = decode_config(&mut &data[..]).unwrap();
    assert_eq!(name, "jpeg");
    assert_eq!((config.width, config.height), (2, 2));
    assert_eq!(config.color, ColorModel::YCbCr);
}

#[test]
fn duplicate_option_records_are_rejected() {
    let data = rich_png();
    let opts = [
        ReadOption::Limits(LimitOptions::default()),
        ReadOption::Limits(LimitOptions::default()),
    ];
    assert!(matches!(
        decode_with_options(&mut &data[..], &opts),
        Err(Error::Option(_))
    ));
}

// ── Reassembly property ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn reassembly_is_index_ordered_for_any_arrival_order(
        order in Just((1u8..=6).collect::<Vec<u8>>()).prop_shuffle()
    ) {
        use imagemeta::meta::segments::SegmentReassembler;

        let count = order.len() as u8;
        let mut r = SegmentReassembler::new();
        let mut complete = None;
        for &index in &order {
            let payload = vec![index; index as usize];
            if let Some(done) = r.push(index, count, &payload).unwrap() {
                complete = Some(done);
            }
        }
        let expected: Vec<u8> = (1u8..=count).flat_map(|i| vec![i; i as usize]).collect();
        prop_assert_eq!(complete.unwrap(), expected);
    }
}

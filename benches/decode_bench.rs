use criterion::{black_box, criterion_group, criterion_main, Criterion};
use imagemeta::{png, PixelLayout, Pixmap, TextEntry};

fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let mut body = png::Body::default();
    let pixels: Vec<u8> = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
    body.set_image(Pixmap::new(width, height, PixelLayout::Rgb8, pixels).unwrap());

    let mut meta = png::Metadata::default();
    meta.gamma = Some(45455);
    for i in 0..16 {
        meta.text
            .push(TextEntry::plain(format!("key{i}"), "value".repeat(32)));
    }
    meta.set_tag_table_raw(vec![0x49; 4 * 1024]);

    let mut out = Vec::new();
    png::writer::encode(&mut out, &body, &meta).unwrap();
    out
}

fn bench_decode(c: &mut Criterion) {
    let small = sample_png(64, 64);
    let large = sample_png(512, 512);

    c.bench_function("decode_metadata_64px", |b| {
        b.iter(|| imagemeta::decode_with_options(&mut black_box(&small[..]), &[]).unwrap())
    });
    c.bench_function("decode_metadata_512px", |b| {
        b.iter(|| imagemeta::decode_with_options(&mut black_box(&large[..]), &[]).unwrap())
    });
}

fn bench_materialize(c: &mut Criterion) {
    let data = sample_png(256, 256);

    c.bench_function("materialize_256px", |b| {
        b.iter(|| {
            let mut decoded = imagemeta::decode_with_options(&mut &data[..], &[]).unwrap();
            decoded.body.as_mut().unwrap().materialize().unwrap().data[0]
        })
    });
}

fn bench_metadata_only_rewrite(c: &mut Criterion) {
    let data = sample_png(256, 256);

    c.bench_function("metadata_only_rewrite_256px", |b| {
        b.iter(|| {
            let mut decoded = imagemeta::decode_with_options(&mut &data[..], &[]).unwrap();
            if let imagemeta::Metadata::Png(m) = &mut decoded.metadata {
                m.text.push(TextEntry::plain("Edited", "yes"));
            }
            let mut out = Vec::new();
            imagemeta::encode(&mut out, &decoded).unwrap();
            out.len()
        })
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_materialize,
    bench_metadata_only_rewrite
);
criterion_main!(benches);

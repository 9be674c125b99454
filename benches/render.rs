//! Per-frame processing cost at full canvas size

use camcanvas::canvas::{PixelCanvas, Surface};
use camcanvas::filters::FilterParameters;
use camcanvas::geometry::Rect;
use camcanvas::processing::{self, Rgb};
use camcanvas::types::{Frame, Resolution};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn gradient(size: Resolution) -> Frame {
    let mut frame = Frame::new(size.width, size.height);
    for (i, px) in frame.data.chunks_exact_mut(4).enumerate() {
        let x = (i as u32 % size.width) as u8;
        let y = (i as u32 / size.width) as u8;
        px.copy_from_slice(&[x, y, x ^ y, 255]);
    }
    frame
}

fn bench_filter_chain(c: &mut Criterion) {
    let size = Resolution::FHD_1080P;
    let frame = gradient(size);
    let chain = FilterParameters::DEFAULT.chain();

    c.bench_function("filter_chain_1080p", |b| {
        b.iter(|| {
            let mut data = frame.data.clone();
            processing::apply_chain(&mut data, size.width, size.height, black_box(&chain));
            data
        })
    });
}

fn bench_colorize(c: &mut Criterion) {
    let frame = gradient(Resolution::FHD_1080P);

    c.bench_function("colorize_1080p", |b| {
        b.iter(|| {
            let mut data = frame.data.clone();
            processing::colorize(&mut data, black_box(Rgb::new(245, 27, 58)));
            data
        })
    });
}

fn bench_cover_draw(c: &mut Criterion) {
    let size = Resolution::FHD_1080P;
    let camera = gradient(Resolution::new(640, 480));
    let mut canvas = PixelCanvas::new(size).unwrap();

    c.bench_function("cover_draw_640x480_to_1080p", |b| {
        b.iter(|| {
            let dst = Rect::full(size);
            if let Some(p) = camcanvas::geometry::cover(dst, 640.0, 480.0, Default::default()) {
                canvas.draw_image(black_box(&camera), p.src, p.dst);
            }
        })
    });
}

criterion_group!(benches, bench_filter_chain, bench_colorize, bench_cover_draw);
criterion_main!(benches);

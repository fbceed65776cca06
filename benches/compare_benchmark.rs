use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{Rgba, RgbaImage};
use visreg::compare::Comparator;

fn page_like(width: u32, height: u32, shift: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if (y + shift) % 40 < 18 && x % 300 < 260 {
            Rgba([30, 30, 30, 255])
        } else {
            Rgba([250, 250, 250, 255])
        }
    })
}

fn benchmark_compare(c: &mut Criterion) {
    let comparator = Comparator::default();
    let baseline = page_like(1440, 2400, 0);
    let identical = baseline.clone();
    let shifted = page_like(1440, 2600, 3);

    c.bench_function("compare_identical_1440", |b| {
        b.iter(|| {
            let result = comparator.compare_images(black_box(&baseline), black_box(&identical));
            assert_eq!(result.unwrap().differing_pixels, 0);
        })
    });

    c.bench_function("compare_shifted_padded_1440", |b| {
        b.iter(|| {
            let result = comparator.compare_images(black_box(&baseline), black_box(&shifted));
            assert!(result.unwrap().differing_pixels > 0);
        })
    });
}

criterion_group!(benches, benchmark_compare);
criterion_main!(benches);

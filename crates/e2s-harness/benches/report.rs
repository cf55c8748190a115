#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use e2s_block::MemByteDevice;
use e2s_core::{Ext2Image, ScanOptions};
use e2s_harness::ImageBuilder;

fn populated_image() -> Vec<u8> {
    ImageBuilder::new()
        .blocks_count(8000)
        .blocks_per_group(2048)
        .inodes_per_group(256)
        .add_file("big", 1500)
        .add_sparse_file("sparse", &[0, 100, 5000])
        .add_dir("links", 400)
        .add_symlink("fast", "big")
        .build()
        .expect("build image")
        .bytes
}

fn bench_full_report(c: &mut Criterion) {
    let bytes = populated_image();

    c.bench_function("report_records", |b| {
        b.iter(|| {
            let image = Ext2Image::from_device(
                Box::new(MemByteDevice::new(bytes.clone())),
                ScanOptions::default(),
            )
            .expect("open");
            black_box(image.records().expect("records").len())
        });
    });
}

fn bench_csv_render(c: &mut Criterion) {
    let image = Ext2Image::from_device(
        Box::new(MemByteDevice::new(populated_image())),
        ScanOptions::default(),
    )
    .expect("open");
    let records = image.records().expect("records");

    c.bench_function("report_csv_render", |b| {
        b.iter(|| {
            let mut total = 0_usize;
            for record in black_box(&records) {
                total += record.to_string().len();
            }
            black_box(total)
        });
    });
}

criterion_group!(benches, bench_full_report, bench_csv_render);
criterion_main!(benches);

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e2s_harness::{
    ImageBuilder, extract_ext2_superblock, extract_region, validate_dir_block_fixture,
    validate_inode_fixture, validate_superblock_fixture,
};
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("make-image") => make_image(&args[1..]),
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("check-fixtures") => {
            let dir = Path::new("conformance/fixtures");
            let sb = validate_superblock_fixture(&dir.join("ext2_superblock_1k.json"))?;
            let root = validate_inode_fixture(&dir.join("ext2_inode_root.json"))?;
            let entries = validate_dir_block_fixture(&dir.join("ext2_dir_block_root.json"))?;
            println!(
                "superblock: blocks={} inodes={} volume={}",
                sb.blocks_count, sb.inodes_count, sb.volume_name
            );
            println!("root inode: mode={:o} links={}", root.mode, root.links_count);
            println!("root dir block: {} entries", entries.len());
            Ok(())
        }
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn make_image(args: &[String]) -> Result<()> {
    let Some(path) = args.first() else {
        bail!("usage: e2s-harness make-image <path> [--multi-group]");
    };
    let mut builder = ImageBuilder::new()
        .add_file("small", 3)
        .add_file("indirect", 40)
        .add_sparse_file("sparse", &[0, 5, 300])
        .add_dir("links", 4)
        .add_symlink("fast", "small")
        .add_symlink("slow", &"long/".repeat(16));
    for flag in &args[1..] {
        match flag.as_str() {
            "--multi-group" => {
                builder = builder
                    .blocks_count(4000)
                    .blocks_per_group(1024)
                    .inodes_per_group(64);
            }
            other => bail!("unknown make-image option: {other}"),
        }
    }

    let image = builder.build()?;
    image.write_to(Path::new(path))?;
    eprintln!(
        "wrote {} ({} groups, {} bytes)",
        path,
        image.groups,
        image.bytes.len()
    );
    Ok(())
}

fn generate_fixture(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: e2s-harness generate-fixture <image> [superblock|region <offset> <len>]");
    }

    let image_path = Path::new(&args[0]);
    let image_data =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let kind = args.get(1).map_or("superblock", String::as_str);
    let fixture = match kind {
        "superblock" => extract_ext2_superblock(&image_data)?,
        "region" => {
            let offset: usize = args
                .get(2)
                .context("region requires <offset>")?
                .parse()
                .context("invalid offset")?;
            let len: usize = args
                .get(3)
                .context("region requires <len>")?
                .parse()
                .context("invalid len")?;
            extract_region(&image_data, offset, len)?
        }
        _ => bail!("unknown fixture kind: {kind}"),
    };

    println!("{}", serde_json::to_string_pretty(&fixture)?);
    Ok(())
}

fn print_usage() {
    println!("e2s-harness: synthetic images and fixtures for e2s");
    println!();
    println!("USAGE:");
    println!("  e2s-harness make-image <path> [--multi-group]");
    println!("  e2s-harness generate-fixture <image> [superblock|region <offset> <len>]");
    println!("  e2s-harness check-fixtures");
}

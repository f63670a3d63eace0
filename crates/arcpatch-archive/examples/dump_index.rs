#![allow(clippy::expect_used, clippy::panic)]

//! Dump the bundled and live-update indices of a resource archive.
//!
//! Usage:
//!   ARCPATCH_RESOURCE_PATH=/path/to/resources cargo run --example dump_index \
//!       -p arcpatch-archive

use std::path::PathBuf;

use arcpatch_archive::{
    ArchiveConfig, ArchiveIndex, ContentHash, LoadMode, ResourceArchive, Store,
};

/// Read the resource directory from `ARCPATCH_RESOURCE_PATH`.
fn resource_path() -> PathBuf {
    let path = std::env::var("ARCPATCH_RESOURCE_PATH").expect(
        "ARCPATCH_RESOURCE_PATH environment variable not set.\n\
         Set it to a directory holding game.arci and game.arcd",
    );
    assert!(!path.is_empty(), "ARCPATCH_RESOURCE_PATH is empty");
    PathBuf::from(path)
}

fn dump(name: &str, index: &ArchiveIndex) {
    let header = index.header();
    println!("=== {name} ===");
    println!("  version:        {}", header.format_version);
    println!("  user tag:       0x{:016x}", header.user_tag);
    println!("  entries:        {}", header.entry_count);
    println!("  hash length:    {}", header.hash_length);
    println!("  hash section:   0x{:x}", header.hash_section_offset);
    println!("  entry section:  0x{:x}", header.entry_section_offset);
    println!("  digest:         {}", index.digest());

    for (hash, entry) in index.iter().take(10) {
        let hash = ContentHash::from_slice(hash).expect("hash length checked on load");
        println!(
            "    {} offset={:>10} stored={:>8} size={:>8} flags={:?}",
            hash,
            entry.data_offset,
            entry.stored_size(),
            entry.uncompressed_size,
            entry.flags,
        );
    }
    if index.entry_count() > 10 {
        println!("    ... and {} more", index.entry_count() - 10);
    }
    println!();
}

fn main() {
    let config = ArchiveConfig::new(resource_path()).with_load_mode(LoadMode::Mapped);
    println!("Opening archive at: {}\n", config.base_path.display());

    let archive = ResourceArchive::open(config).expect("failed to open archive");
    dump("Bundled index", &archive.bundled().snapshot());

    if let Some(live) = archive.live_update_container() {
        dump("Live-update index", &live.snapshot());

        let cache = archive.live_update_entries();
        println!(
            "Live-update store serves {} resources ({} shadow bundled), generation {}",
            cache.len(),
            cache.shadowed(),
            cache.generation()
        );
    }

    // Every entry must resolve and read back at its declared size
    println!("\n=== Read Verification ===");
    let index = archive.live_update_container().map_or_else(
        || archive.bundled().snapshot(),
        |live| live.snapshot(),
    );
    let mut pass = 0u32;
    let mut fail = 0u32;
    for (hash, _) in index.iter() {
        let store = archive.find(hash).map_or(Store::Bundled, |r| r.store);
        match archive.read_resource(hash) {
            Ok(_) => pass += 1,
            Err(e) => {
                fail += 1;
                if fail <= 5 {
                    println!("  FAIL {} ({store}): {e}", hex::encode(hash));
                }
            }
        }
    }
    println!("  {pass} readable, {fail} failed");
}

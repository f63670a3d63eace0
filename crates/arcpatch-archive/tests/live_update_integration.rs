//! Integration tests for live-update patching of a bundled archive

#![allow(clippy::expect_used)]

use std::sync::Arc;

use arcpatch_archive::codec::{Arc4Decryptor, compress_zlib};
use arcpatch_archive::{
    ArchiveBuilder, ArchiveConfig, ArchiveError, ArchiveIndex, EntryFlags, FORMAT_VERSION,
    LoadMode, PatchMeta, ResourceArchive, ResourceCodec, Store,
};
use arcpatch_crypto::{Arc4Cipher, resource_hash};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const KEY: &[u8] = b"integration-key";

fn bundled_resources() -> Vec<&'static [u8]> {
    vec![
        b"main.collectionc".as_slice(),
        b"player.spritec".as_slice(),
        b"level1.tilemapc".as_slice(),
    ]
}

fn build_bundled(temp: &TempDir) -> ArchiveConfig {
    let config = ArchiveConfig::new(temp.path());
    let mut builder = ArchiveBuilder::new(16).expect("builder");
    for payload in bundled_resources() {
        builder
            .add_raw(&resource_hash(payload), payload)
            .expect("add resource");
    }
    builder
        .build(&config.index_path(), &config.data_path(), 0xDEF0)
        .expect("build bundled archive");
    config
}

fn codec() -> ResourceCodec {
    ResourceCodec::new().with_decryptor(Arc::new(Arc4Decryptor::new(KEY).expect("key")))
}

#[test]
fn test_patch_survives_reopen() {
    let temp = TempDir::new().expect("temp dir");
    let config = build_bundled(&temp);

    let level2 = b"level2 tiles ".repeat(64);
    let level2_hash = resource_hash(&level2);
    let stored = Arc4Cipher::new(KEY)
        .expect("cipher")
        .encrypt(&compress_zlib(&level2).expect("compress"));
    let meta = PatchMeta::compressed(u32::try_from(level2.len()).expect("size")).encrypted();

    {
        let archive = ResourceArchive::open(config.clone())
            .expect("open")
            .with_codec(codec());
        let entry = archive
            .apply_patch(&level2_hash, meta, &stored)
            .expect("patch");
        assert_eq!(
            entry.flags,
            EntryFlags::ENCRYPTED | EntryFlags::COMPRESSED | EntryFlags::LIVE_UPDATE
        );
        assert_eq!(archive.read_resource(&level2_hash).expect("read"), level2);
    }

    for mode in [LoadMode::Mapped, LoadMode::File] {
        let archive = ResourceArchive::open(config.clone().with_load_mode(mode))
            .expect("reopen")
            .with_codec(codec());

        assert_eq!(archive.entry_count(), 4);
        assert_eq!(
            archive.find(&level2_hash).map(|r| r.store),
            Some(Store::LiveUpdate)
        );
        assert_eq!(archive.read_resource(&level2_hash).expect("read"), level2);

        for payload in bundled_resources() {
            let hash = resource_hash(payload);
            assert_eq!(archive.find(&hash).map(|r| r.store), Some(Store::Bundled));
            assert_eq!(archive.read_resource(&hash).expect("read"), payload);
        }
    }
}

#[test]
fn test_readers_keep_old_snapshot() {
    let temp = TempDir::new().expect("temp dir");
    let archive = ResourceArchive::open(build_bundled(&temp)).expect("open");

    archive
        .apply_patch(&resource_hash(b"one"), PatchMeta::raw(3), b"one")
        .expect("first patch");
    let live = archive.live_update_container().expect("live update");
    let before = live.snapshot();
    let generation = live.generation();

    archive
        .apply_patch(&resource_hash(b"two"), PatchMeta::raw(3), b"two")
        .expect("second patch");

    assert_eq!(live.generation(), generation + 1);
    assert_eq!(before.entry_count(), 4);
    assert!(before.lookup(&resource_hash(b"two")).is_none());
    assert_eq!(live.snapshot().entry_count(), 5);
    assert_eq!(archive.read_resource(&resource_hash(b"two")).expect("read"), b"two");
}

#[test]
fn test_concurrent_readers_during_patch() {
    let temp = TempDir::new().expect("temp dir");
    let archive = ResourceArchive::open(build_bundled(&temp)).expect("open");
    let bundled_hash = resource_hash(b"player.spritec");

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..200 {
                    let bytes = archive.read_resource(&bundled_hash).expect("bundled read");
                    assert_eq!(bytes, b"player.spritec");
                }
            });
        }
        scope.spawn(|| {
            for i in 0..20u32 {
                let payload = format!("patch-{i}");
                let size = u32::try_from(payload.len()).expect("size");
                archive
                    .apply_patch(&resource_hash(payload.as_bytes()), PatchMeta::raw(size), payload.as_bytes())
                    .expect("patch");
            }
        });
    });

    assert_eq!(archive.entry_count(), 23);
    assert_eq!(archive.live_update_entries().len(), 20);
    assert_eq!(archive.read_resource(&resource_hash(b"patch-7")).expect("read"), b"patch-7");
}

#[test]
fn test_raw_index_bytes_reload() {
    let temp = TempDir::new().expect("temp dir");
    let archive = ResourceArchive::open(build_bundled(&temp)).expect("open");
    archive
        .apply_patch(&resource_hash(b"extra"), PatchMeta::raw(5), b"extra")
        .expect("patch");

    let bytes = archive.raw_index_bytes().expect("bytes");
    let index = ArchiveIndex::parse(&bytes, true).expect("parse");
    assert_eq!(index.entry_count(), 4);
    assert_eq!(index.user_tag(), 0xDEF0);
    assert!(index.lookup(&resource_hash(b"extra")).expect("patched").is_live_update());
}

#[test]
fn test_old_format_version_fails_open() {
    let temp = TempDir::new().expect("temp dir");
    let config = build_bundled(&temp);

    let mut bytes = std::fs::read(config.index_path()).expect("index");
    bytes[0..4].copy_from_slice(&(FORMAT_VERSION - 1).to_be_bytes());
    std::fs::write(config.index_path(), bytes).expect("rewrite");

    let err = ResourceArchive::open(config).expect_err("old version");
    assert!(matches!(
        err,
        ArchiveError::VersionMismatch {
            found,
            expected: FORMAT_VERSION,
        } if found == FORMAT_VERSION - 1
    ));
}

#[test]
fn test_corrupt_live_update_index_fails_open() {
    let temp = TempDir::new().expect("temp dir");
    let config = build_bundled(&temp);
    {
        let archive = ResourceArchive::open(config.clone()).expect("open");
        archive
            .apply_patch(&resource_hash(b"x"), PatchMeta::raw(1), b"x")
            .expect("patch");
    }

    let path = config.live_update_index_path();
    let mut bytes = std::fs::read(&path).expect("index");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5A;
    std::fs::write(&path, bytes).expect("rewrite");

    let err = ResourceArchive::open(config).expect_err("corrupt");
    assert!(matches!(err, ArchiveError::CorruptIndex(_)));
}

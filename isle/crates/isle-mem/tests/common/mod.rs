//! Shared fixtures for the loader integration tests

#![allow(dead_code)]

use isle_mem::resolver::{decode_signing_key, public_key_hex};
use isle_mem::{ByteOrder, ImageBuilder, LoaderConfig, ObjectMemoryLoader, BYTES_PER_WORD};
use k256::ecdsa::SigningKey;
use std::path::Path;
use tempfile::TempDir;

pub const WORD: usize = BYTES_PER_WORD;

/// Bootstrap canonical range is `[0, BOOTSTRAP_SIZE)`
pub const BOOTSTRAP_SIZE: usize = 16 * WORD;
pub const LIBRARY_SIZE: usize = 8 * WORD;

/// Secret scalars for suite signing
pub const DEVICE_SECRET: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const STRANGER_SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000007";

pub fn signing_key(secret: &str) -> SigningKey {
    decode_signing_key(secret).expect("valid secret")
}

/// Hex public key that verifies suites signed with `secret`
pub fn public_key(secret: &str) -> String {
    public_key_hex(&signing_key(secret))
}

pub fn config() -> LoaderConfig {
    LoaderConfig {
        byte_order: ByteOrder::Little,
        ..LoaderConfig::default()
    }
}

/// Loader plus a scratch directory for `file://` and `suite://` images
pub struct LoaderFixture {
    pub loader: ObjectMemoryLoader,
    pub dir: TempDir,
}

impl LoaderFixture {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    pub fn with(adjust: impl FnOnce(&mut LoaderConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = config();
        config.suite_dir = dir.path().to_path_buf();
        config.file_path = vec![dir.path().to_path_buf()];
        adjust(&mut config);
        let loader = ObjectMemoryLoader::new(config).expect("valid config");
        Self { loader, dir }
    }

    /// Register `image` under a `memory:` URI
    pub fn register(&self, uri: &str, image: &ImageBuilder) {
        let bytes = image.to_bytes().expect("serializable image");
        self.loader.resolver().register(uri, bytes).expect("memory URI");
    }

    /// Write `bytes` into the scratch directory, returning its `file://` URI
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).expect("write image");
        file_uri(&path)
    }
}

pub fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Bootstrap image: word 0 points at word 2, word 1 is null, word 3 at word 15
pub fn bootstrap() -> ImageBuilder {
    bootstrap_at(0)
}

/// `bootstrap()` built against canonical base `base`
pub fn bootstrap_at(base: u64) -> ImageBuilder {
    let mut image = ImageBuilder::new(BOOTSTRAP_SIZE, WORD, ByteOrder::Little).root(2 * WORD as u32);
    image.pointer(0, base + 2 * WORD as u64).unwrap();
    image.pointer(WORD, 0).unwrap();
    image.word(2 * WORD, 0x1234).unwrap();
    image.pointer(3 * WORD, base + 15 * WORD as u64).unwrap();
    image
}

/// Library on top of `bootstrap()`: one pointer into the parent, one into itself
pub fn library(parent_hash: i32) -> ImageBuilder {
    let base = BOOTSTRAP_SIZE as u64;
    let mut image = ImageBuilder::new(LIBRARY_SIZE, WORD, ByteOrder::Little)
        .parent("memory:bootstrap", parent_hash)
        .root(WORD as u32);
    image.pointer(0, 2 * WORD as u64).unwrap();
    image.pointer(WORD, base + 4 * WORD as u64).unwrap();
    image.word(2 * WORD, 0xabcd).unwrap();
    image
}

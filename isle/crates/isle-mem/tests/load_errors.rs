//! Load Failures - Format, Integrity and Resolution Errors
//!
//! Each test feeds the loader a broken or mismatched image and checks the
//! error kind and its message. Nothing from a failed load may be registered.

mod common;

use common::{bootstrap, config, library, public_key, signing_key, LoaderFixture, DEVICE_SECRET, STRANGER_SECRET, WORD};
use isle_mem::resolver::seal;
use isle_mem::{ByteOrder, ErrorCategory, ImageBuilder, MemError, BOOTSTRAP_URI, LIBRARY_URI};
use isle_mem::heap::SimulatedHeap;
use isle_mem::ObjectMemoryLoader;
use std::io::Cursor;
use std::sync::Arc;

#[test]
fn test_bad_magic() {
    let fixture = LoaderFixture::new();
    let mut bytes = bootstrap().to_bytes().unwrap();
    bytes[..4].copy_from_slice(&0xCAFE_BABEu32.to_be_bytes());
    let uri = fixture.write_file("bad.image", &bytes);

    let err = fixture.loader.load_uri(&uri, false).unwrap_err();
    assert!(matches!(err, MemError::BadMagic { found: 0xCAFE_BABE, .. }));
    let message = err.to_string();
    assert!(message.contains("magic"), "{}", message);
    assert!(message.contains("bad.image"), "{}", message);
    assert_eq!(err.category(), ErrorCategory::Format);
}

#[test]
fn test_truncated_memory() {
    let fixture = LoaderFixture::new();
    let mut bytes = bootstrap().to_bytes().unwrap();
    bytes.truncate(bytes.len() - 3);

    let err = fixture.loader.load(Cursor::new(bytes), BOOTSTRAP_URI, false).unwrap_err();
    assert!(matches!(err, MemError::Truncated { ref field, .. } if field == "memory"), "{:?}", err);
}

#[test]
fn test_parent_hash_mismatch_for_bootstrap() {
    let boot = bootstrap();
    let fixture = LoaderFixture::new();
    fixture.register(BOOTSTRAP_URI, &boot);
    fixture.register("memory:library", &library(boot.hash().wrapping_add(1)));

    let err = fixture.loader.load_uri("memory:library", true).unwrap_err();
    let MemError::ParentHashMismatch { expected, actual, .. } = &err else {
        panic!("unexpected error {:?}", err);
    };
    assert_eq!(*expected, boot.hash().wrapping_add(1));
    assert_eq!(*actual, boot.hash());

    let message = err.to_string();
    assert!(message.starts_with("The installed library was not built against the installed version of the VM\n"));
    assert!(message.ends_with(&format!(
        "invalid hash for parent (memory:bootstrap): expected {}, received {}",
        boot.hash().wrapping_add(1),
        boot.hash()
    )));

    // the parent itself loaded fine, the child did not
    assert_eq!(fixture.loader.registry().uris(), vec![BOOTSTRAP_URI.to_string()]);
}

#[test]
fn test_parent_hash_mismatch_for_library_suite() {
    let boot = bootstrap();
    let lib = library(boot.hash());
    let fixture = LoaderFixture::new();
    fixture.register(BOOTSTRAP_URI, &boot);
    std::fs::write(
        fixture.dir.path().join("library.suite"),
        seal(&signing_key(DEVICE_SECRET), &lib.to_bytes().unwrap()).unwrap(),
    )
    .unwrap();

    let mut app = ImageBuilder::new(2 * WORD, WORD, ByteOrder::Little).parent(LIBRARY_URI, lib.hash() ^ 0x55);
    app.word(0, 7).unwrap();
    let bytes = app.to_bytes().unwrap();

    let err = fixture.loader.load(Cursor::new(bytes), "memory:app", false).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with(
        "The application you are trying to run was not built against the library that is installed\n\
         Either rebuild your application and re-deploy, or install the correct library\n"
    ));
    assert_eq!(err.category(), ErrorCategory::Integrity);
}

#[test]
fn test_suite_signature_checked_with_key() {
    let boot = bootstrap();
    let lib = library(boot.hash());
    let fixture = LoaderFixture::with(|c| c.suite_public_key = Some(public_key(DEVICE_SECRET)));
    fixture.register(BOOTSTRAP_URI, &boot);
    let path = fixture.dir.path().join("library.suite");

    // signed, but by a key this device does not trust
    let payload = lib.to_bytes().unwrap();
    std::fs::write(&path, seal(&signing_key(STRANGER_SECRET), &payload).unwrap()).unwrap();
    let err = fixture.loader.load_uri(LIBRARY_URI, true).unwrap_err();
    assert!(matches!(err, MemError::SignatureInvalid { .. }), "{:?}", err);
    assert!(fixture.loader.registry().lookup(LIBRARY_URI).is_none());

    std::fs::write(&path, seal(&signing_key(DEVICE_SECRET), &payload).unwrap()).unwrap();
    let file = fixture.loader.load_uri(LIBRARY_URI, true).unwrap();
    assert_eq!(file.memory().unwrap().hash(), lib.hash());
}

#[test]
fn test_stray_pointer_is_incomplete() {
    let mut image = ImageBuilder::new(2 * WORD, WORD, ByteOrder::Little);
    // points past the end of its own canonical range, no parent to catch it
    image.pointer(0, 64 * WORD as u64).unwrap();
    let bytes = image.to_bytes().unwrap();

    let fixture = LoaderFixture::new();
    let err = fixture.loader.load(Cursor::new(bytes), BOOTSTRAP_URI, true).unwrap_err();
    assert!(matches!(err, MemError::RelocationIncomplete { remaining: 1, .. }), "{:?}", err);
    assert!(fixture.loader.registry().is_empty());
}

#[test]
fn test_failed_read_only_loads_keep_no_memory() {
    let mut image = ImageBuilder::new(2 * WORD, WORD, ByteOrder::Little);
    image.pointer(0, 64 * WORD as u64).unwrap();
    let bytes = image.to_bytes().unwrap();

    let config = config();
    let heap = Arc::new(SimulatedHeap::new(&config).unwrap());
    let loader = ObjectMemoryLoader::with_space(config, heap.clone()).unwrap();
    for _ in 0..3 {
        let err = loader.load(Cursor::new(&bytes), BOOTSTRAP_URI, true).unwrap_err();
        assert!(matches!(err, MemError::RelocationIncomplete { .. }), "{:?}", err);
    }
    assert_eq!(heap.read_only_used(), 0);
    assert_eq!(heap.live_buffers(), 0);

    // the space is still there for a good image
    let good = bootstrap().to_bytes().unwrap();
    let file = loader.load(Cursor::new(good), BOOTSTRAP_URI, true).unwrap();
    assert_eq!(file.memory().unwrap().start().to_u64(), loader.config().read_only_base);
}

#[test]
fn test_missing_parent() {
    let fixture = LoaderFixture::new();
    let bytes = library(0).to_bytes().unwrap();

    let err = fixture.loader.load(Cursor::new(bytes), "memory:library", false).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io);
}

#[test]
fn test_cyclic_parent_chain() {
    let fixture = LoaderFixture::new();
    let image = ImageBuilder::new(2 * WORD, WORD, ByteOrder::Little).parent("memory:loop", 0);
    fixture.register("memory:loop", &image);

    let err = fixture.loader.load_uri("memory:loop", true).unwrap_err();
    assert!(err.to_string().contains("cyclic"), "{}", err);
}

#[test]
fn test_unsupported_scheme() {
    let fixture = LoaderFixture::new();
    let err = fixture.loader.load_uri("http://example.com/a.image", false).unwrap_err();
    assert!(matches!(err, MemError::UnsupportedUri(_)));
}

//! Property tests for relocation and the on-disk layout

mod common;

use common::{LoaderFixture, WORD};
use isle_mem::format::{calculate_memory_padding, header_length};
use isle_mem::{ByteOrder, ImageBuilder, BOOTSTRAP_URI};
use proptest::prelude::*;
use std::io::Cursor;

/// Image of `words` words with pointers at `pointers` into its own range
fn image(words: usize, pointers: &[(usize, usize)], order: ByteOrder) -> ImageBuilder {
    let mut image = ImageBuilder::new(words * WORD, WORD, order);
    for &(at, target) in pointers {
        image.pointer(at * WORD, (target * WORD) as u64).unwrap();
    }
    image
}

fn pointers() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..64).prop_flat_map(|words| {
        (Just(words), prop::collection::vec((0..words, 0..words), 0..words))
    })
}

proptest! {
    #[test]
    fn relocated_pointers_keep_their_offsets((words, pointers) in pointers(), big in any::<bool>(), read_only in any::<bool>()) {
        let order = if big { ByteOrder::Big } else { ByteOrder::Little };
        let image = image(words, &pointers, order);
        let fixture = LoaderFixture::new();
        let file = fixture.loader.load(Cursor::new(image.to_bytes().unwrap()), BOOTSTRAP_URI, read_only).unwrap();
        let memory = file.memory().unwrap();

        prop_assert_eq!(memory.hash(), image.hash());
        for index in image.oop_map().iter() {
            let value = memory.read_word(index * WORD).unwrap();
            let canonical = isle_mem::object_memory::read_word(image.memory(), index * WORD, WORD, order).unwrap();
            if canonical == 0 {
                prop_assert_eq!(value, 0);
            } else {
                prop_assert_eq!(value - memory.start().to_u64(), canonical);
            }
        }
    }

    #[test]
    fn memory_starts_word_aligned(uri in "[a-z:/]{0,40}", size in 0usize..4096) {
        let padding = calculate_memory_padding(&uri, size, WORD);
        prop_assert!(padding < WORD);
        prop_assert_eq!((header_length(&uri, size) + padding) % WORD, 0);
    }
}

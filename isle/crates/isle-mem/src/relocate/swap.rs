//! Byte order conversion of a whole memory component
//!
//! Runs after relocation as a separate pass over every word.

/// Reverse the bytes of each `bytes_per_word` word in `buffer`
///
/// Trailing bytes that do not form a whole word are left alone.
/// Returns the number of words swapped.
pub fn swap_words(buffer: &mut [u8], bytes_per_word: usize) -> usize {
    let mut count = 0;
    for word in buffer.chunks_exact_mut(bytes_per_word) {
        word.reverse();
        count += 1;
    }
    count
}

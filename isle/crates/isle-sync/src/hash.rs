//! Hash codes of shared objects and their mapping to manager cores

use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_HASH_CODE: AtomicU32 = AtomicU32::new(1);

/// Fresh identity hash code for a lock or monitor
///
/// Never returns 0.
pub fn next_hash_code() -> u32 {
    loop {
        let code = NEXT_HASH_CODE.fetch_add(1, Ordering::Relaxed);
        if code != 0 {
            return code;
        }
    }
}

/// Thomas Wang's 32-bit integer hash
pub fn hashint(mut key: u32) -> u32 {
    key = (!key).wrapping_add(key << 15);
    key ^= key >> 12;
    key = key.wrapping_add(key << 2);
    key ^= key >> 4;
    key = key.wrapping_mul(2057);
    key ^= key >> 16;
    key
}

/// Index of the manager responsible for `hash`
pub fn manager_index(hash: u32, managers: usize) -> usize {
    hashint(hash) as usize % managers.max(1)
}

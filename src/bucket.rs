//! The bucket array: a flat, stride-`(8 + size_of::<V>())` slab in the
//! original; a `Vec<Slot<V>>` here, which gives the same cache-local,
//! index-addressed layout without hand-computed byte offsets.

use crate::token::KeyToken;

/// One bucket: a key token and its value, stored inline for cache locality
/// on probe walks. `V` must be `Copy`, the engine treats values as opaque
/// payloads, byte-copied on displacement and resize, never interpreted.
#[derive(Debug, Clone, Copy)]
pub struct Slot<V> {
    pub token: KeyToken,
    pub value: V,
}

impl<V: Default> Default for Slot<V> {
    fn default() -> Self {
        Self {
            token: KeyToken::EMPTY,
            value: V::default(),
        }
    }
}

impl<V: Copy + Default> Slot<V> {
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Allocates a zeroed (all-EMPTY) bucket slab of `capacity` slots, falling
/// back to `Err` if the allocator cannot satisfy the request (the only
/// fallible step in the resize path).
pub fn try_new_slab<V: Copy + Default>(capacity: usize) -> Result<Vec<Slot<V>>, ()> {
    let mut slab = Vec::new();
    slab.try_reserve_exact(capacity).map_err(|_| ())?;
    slab.resize_with(capacity, Slot::empty);
    Ok(slab)
}

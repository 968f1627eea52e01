//! City-hash based [std::hash::Hasher] plus the deterministic index-name
//! derivation built on top of it.

use std::hash::{BuildHasher, Hash, Hasher};

/// Hasher built on Google's CityHash, used wherever this crate needs a
/// deterministic (non-randomized) digest — notably deriving an index name
/// from its field list when the caller doesn't supply one.
#[derive(Clone, Copy, Default)]
pub struct CityHasher {
    digest: u128,
}

impl CityHasher {
    pub fn new() -> CityHasher {
        CityHasher::default()
    }
}

impl BuildHasher for CityHasher {
    type Hasher = Self;

    #[inline]
    fn build_hasher(&self) -> Self {
        *self
    }
}

impl Hasher for CityHasher {
    fn finish(&self) -> u64 {
        ((self.digest >> 64) as u64) ^ ((self.digest & 0xFFFF_FFFF_FFFF_FFFF) as u64)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.digest = cityhash_rs::cityhash_110_128(bytes);
    }
}

/// Derive a deterministic index name from its definition, used by
/// `ensureIndexed` when the caller doesn't supply one. Sorted field names
/// keep the digest stable across field-order-only variations; `kind` and
/// `tokenize` are folded in so differently-shaped indexes over the same
/// fields never collide.
pub fn derive_index_name(fields: &[String], kind: &str, tokenize: Option<&str>) -> String {
    let mut sorted: Vec<&str> = fields.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = CityHasher::new();
    for field in sorted.iter() {
        field.hash(&mut hasher);
        0u8.hash(&mut hasher); // separator, avoids "ab","c" colliding with "a","bc"
    }
    kind.hash(&mut hasher);
    if let Some(t) = tokenize {
        t.hash(&mut hasher);
    }

    format!("idx_{:016x}", hasher.finish())
}

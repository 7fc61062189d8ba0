//! Collection type aliases.
//!
//! We use `rustc_hash::FxHashMap` and `FxHashSet` throughout the journal
//! crates for their performance characteristics on short string keys.

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<T> = rustc_hash::FxHashSet<T>;

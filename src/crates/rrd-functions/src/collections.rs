//! Collection type aliases.
//!
//! Registry keys are short strings that are hashed on every lookup, so we
//! use `rustc_hash::FxHashMap` like the rest of the tree.

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<T> = rustc_hash::FxHashSet<T>;

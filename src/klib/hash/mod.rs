//! Estruturas de hash

pub mod hashtable;

pub use hashtable::{FnvHasher, HashTable};

//! Hash Table
//!
//! Mapeia Chaves -> Valores com acesso O(1) médio.
//!
//! - Encadeamento para colisões (Vec de Buckets)
//! - Hash FNV-1a próprio (sem `BuildHasherDefault` em no_std)
//! - Número de buckets fixo na criação (sem rehash)

use alloc::vec::Vec;
use core::hash::{Hash, Hasher};

/// Hasher FNV-1a de 64 bits
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.state
    }
}

struct Entry<K, V> {
    key: K,
    value: V,
}

pub struct HashTable<K, V> {
    buckets: Vec<Vec<Entry<K, V>>>,
    len: usize,
}

impl<K: Hash + Eq, V> HashTable<K, V> {
    /// Cria tabela com `capacity` buckets (mínimo 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buckets = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buckets.push(Vec::new());
        }
        Self { buckets, len: 0 }
    }

    fn bucket_index(&self, key: &K) -> usize {
        let mut hasher = FnvHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.buckets.len()
    }

    /// Insere se a chave ainda não existe.
    ///
    /// Com a chave já presente, nada é alterado e o valor volta em `Err`.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), V> {
        let index = self.bucket_index(&key);
        let bucket = &mut self.buckets[index];

        if bucket.iter().any(|entry| entry.key == key) {
            return Err(value);
        }

        bucket.push(Entry { key, value });
        self.len += 1;
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.bucket_index(key);
        self.buckets[index]
            .iter()
            .find(|entry| entry.key == *key)
            .map(|entry| &entry.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.bucket_index(key);
        let bucket = &mut self.buckets[index];

        let pos = bucket.iter().position(|entry| entry.key == *key)?;
        self.len -= 1;
        Some(bucket.swap_remove(pos).value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Número de buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Itera todas as entradas (ordem indefinida)
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|entry| (&entry.key, &entry.value)))
    }
}

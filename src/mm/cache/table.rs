//! # Page Cache Table
//!
//! Índice global `(cache, índice da página) → página` de todas as páginas
//! residentes. Fica atrás de um `Spinlock` no `VmSystem`, cada operação é uma
//! única seção crítica curta com interrupções desabilitadas.

use alloc::sync::Arc;

use super::page::{CacheId, VmPage};
use crate::klib::HashTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub cache: CacheId,
    pub index: u64,
}

impl PageKey {
    pub const fn new(cache: CacheId, index: u64) -> Self {
        Self { cache, index }
    }
}

pub struct PageCacheTable {
    table: HashTable<PageKey, Arc<VmPage>>,
}

impl PageCacheTable {
    pub fn new(buckets: usize) -> Self {
        Self {
            table: HashTable::new(buckets),
        }
    }

    /// Registra a página. Recusa chave já ocupada devolvendo a página.
    pub fn insert(&mut self, cache: CacheId, index: u64, page: Arc<VmPage>) -> Result<(), Arc<VmPage>> {
        self.table.insert(PageKey::new(cache, index), page)
    }

    pub fn lookup(&self, cache: CacheId, index: u64) -> Option<Arc<VmPage>> {
        self.table.get(&PageKey::new(cache, index)).cloned()
    }

    pub fn remove(&mut self, cache: CacheId, index: u64) -> Option<Arc<VmPage>> {
        self.table.remove(&PageKey::new(cache, index))
    }

    /// Páginas residentes
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let mut table = PageCacheTable::new(16);
        let page = Arc::new(VmPage::new(5));

        assert!(table.insert(1, 0, page.clone()).is_ok());
        assert!(table.insert(1, 0, page.clone()).is_err());
        assert!(table.insert(2, 0, page.clone()).is_ok());
        assert_eq!(table.len(), 2);

        assert!(Arc::ptr_eq(&table.lookup(1, 0).unwrap(), &page));
        assert!(table.lookup(1, 1).is_none());

        assert!(table.remove(1, 0).is_some());
        assert!(table.remove(1, 0).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_many_keys_share_buckets() {
        let mut table = PageCacheTable::new(4);
        for index in 0..64 {
            table.insert(3, index, Arc::new(VmPage::new(index))).unwrap();
        }
        assert_eq!(table.bucket_count(), 4);
        for index in 0..64 {
            assert_eq!(table.lookup(3, index).unwrap().physical_page_number(), index);
        }
    }
}

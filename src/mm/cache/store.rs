//! # Backing Stores
//!
//! O store é o que está "atrás" de um cache: swap, arquivo ou nada
//! (memória anônima). O cache só precisa de commit, destruição, write-back e
//! dos ganchos de referência.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::page::{CacheId, VmPage, NO_CACHE};
use crate::mm::error::{MmError, MmResult};

pub trait VmStore: Send + Sync {
    /// Informa o cache dono (chamado uma vez, na criação do cache)
    fn attach(&self, cache: CacheId);

    /// Reserva memória para `size` bytes do cache
    fn commit(&self, size: u64) -> MmResult<()>;

    fn committed_size(&self) -> u64;

    /// O cache dono morreu
    fn destroy(&self);

    /// Acompanha cada referência de trabalho do cache
    fn acquire_ref(&self) {}

    fn release_ref(&self) {}

    /// Escreve a página `index` no armazenamento
    fn write_page(&self, index: u64, page: &VmPage) -> MmResult<()>;
}

/// Memória anônima (temporária) com limite de commit opcional
pub struct AnonymousStore {
    cache: AtomicU64,
    committed: AtomicU64,
    limit: Option<u64>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    destroyed: AtomicUsize,
    written: AtomicUsize,
}

impl AnonymousStore {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Commit acima de `limit` bytes falha com `QuotaExceeded`
    pub fn with_limit(limit: u64) -> Self {
        Self::build(Some(limit))
    }

    fn build(limit: Option<u64>) -> Self {
        Self {
            cache: AtomicU64::new(NO_CACHE),
            committed: AtomicU64::new(0),
            limit,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            written: AtomicUsize::new(0),
        }
    }

    pub fn owner(&self) -> Option<CacheId> {
        match self.cache.load(Ordering::Acquire) {
            NO_CACHE => None,
            id => Some(id),
        }
    }

    /// Quantas vezes `destroy` foi chamado (deve ser no máximo 1)
    pub fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::Acquire)
    }

    /// (acquire_ref, release_ref) recebidos
    pub fn ref_events(&self) -> (usize, usize) {
        (
            self.acquired.load(Ordering::Acquire),
            self.released.load(Ordering::Acquire),
        )
    }

    pub fn pages_written(&self) -> usize {
        self.written.load(Ordering::Acquire)
    }
}

impl Default for AnonymousStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VmStore for AnonymousStore {
    fn attach(&self, cache: CacheId) {
        self.cache.store(cache, Ordering::Release);
    }

    fn commit(&self, size: u64) -> MmResult<()> {
        if let Some(limit) = self.limit {
            if size > limit {
                crate::kwarn!("(VmCache) Commit acima do limite do store, pedido=", size);
                return Err(MmError::QuotaExceeded);
            }
        }
        self.committed.store(size, Ordering::Release);
        Ok(())
    }

    fn committed_size(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::AcqRel);
        self.committed.store(0, Ordering::Release);
    }

    fn acquire_ref(&self) {
        self.acquired.fetch_add(1, Ordering::AcqRel);
    }

    fn release_ref(&self) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    fn write_page(&self, _index: u64, _page: &VmPage) -> MmResult<()> {
        // Sem swap: a página anônima só é dada como escrita
        self.written.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

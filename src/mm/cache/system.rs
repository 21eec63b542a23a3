//! # VmSystem
//!
//! Estado compartilhado por todos os caches de VM: a Page Cache Table, o pool
//! para onde vão as páginas liberadas e a fase de boot.
//!
//! Um kernel instala exatamente um (`mm::cache::init`). Testes criam
//! instâncias privadas com `VmSystem::new`.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use spin::Once;

use super::page::{CacheId, PagePool, VmPage};
use super::table::PageCacheTable;
use crate::mm::config::PAGE_CACHE_TABLE_SIZE;
use crate::sync::Spinlock;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    /// Locks dos caches ainda não podem ser criados
    Bootstrapping = 0,
    Normal = 1,
}

/// Estatísticas do cache de páginas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub resident_pages: usize,
    pub collapses: u64,
    pub teardowns: u64,
    /// Páginas migradas para o consumer em merges
    pub pages_moved: u64,
}

pub struct VmSystem {
    table: Spinlock<PageCacheTable>,
    pool: Arc<dyn PagePool>,
    phase: AtomicU8,
    collapses: AtomicU64,
    teardowns: AtomicU64,
    pages_moved: AtomicU64,
}

impl VmSystem {
    /// Sistema já na fase normal
    pub fn new(pool: Arc<dyn PagePool>) -> Self {
        Self::with_phase(pool, BootPhase::Normal)
    }

    /// Sistema no early boot: `VmCacheRef::create` falha até `finish_boot`
    pub fn bootstrapping(pool: Arc<dyn PagePool>) -> Self {
        Self::with_phase(pool, BootPhase::Bootstrapping)
    }

    fn with_phase(pool: Arc<dyn PagePool>, phase: BootPhase) -> Self {
        Self {
            table: Spinlock::new(PageCacheTable::new(PAGE_CACHE_TABLE_SIZE)),
            pool,
            phase: AtomicU8::new(phase as u8),
            collapses: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
            pages_moved: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> BootPhase {
        if self.phase.load(Ordering::Acquire) == BootPhase::Normal as u8 {
            BootPhase::Normal
        } else {
            BootPhase::Bootstrapping
        }
    }

    /// Única transição Bootstrapping → Normal
    pub fn finish_boot(&self) {
        let old = self.phase.swap(BootPhase::Normal as u8, Ordering::AcqRel);
        if old == BootPhase::Bootstrapping as u8 {
            crate::kinfo!("(VmCache) Fim do boot, páginas residentes=", self.table.lock().len());
        }
    }

    /// Consulta direta na Page Cache Table
    pub fn lookup(&self, cache: CacheId, index: u64) -> Option<Arc<VmPage>> {
        self.table.lock().lookup(cache, index)
    }

    pub(crate) fn table_insert(&self, cache: CacheId, index: u64, page: Arc<VmPage>) {
        let result = self.table.lock().insert(cache, index, page);
        if result.is_err() {
            crate::kerror!("(PageTable) Entrada duplicada, índice=", index);
            panic!("page cache table: ({}, {}) already present", cache, index);
        }
    }

    pub(crate) fn table_remove(&self, cache: CacheId, index: u64) {
        if self.table.lock().remove(cache, index).is_none() {
            crate::kerror!("(PageTable) Entrada ausente, índice=", index);
            panic!("page cache table: ({}, {}) not present", cache, index);
        }
    }

    /// Troca o dono da entrada numa única seção crítica
    pub(crate) fn table_move(&self, from: CacheId, to: CacheId, index: u64) {
        let mut table = self.table.lock();
        let page = match table.remove(from, index) {
            Some(page) => page,
            None => {
                crate::kerror!("(PageTable) Migração sem entrada, índice=", index);
                panic!("page cache table: ({}, {}) not present", from, index);
            }
        };
        if table.insert(to, index, page).is_err() {
            crate::kerror!("(PageTable) Migração para entrada ocupada, índice=", index);
            panic!("page cache table: ({}, {}) already present", to, index);
        }
    }

    pub(crate) fn free_page(&self, page: Arc<VmPage>) {
        self.pool.free_page(page);
    }

    pub(crate) fn note_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_collapse(&self, moved: u64) {
        self.collapses.fetch_add(1, Ordering::Relaxed);
        self.pages_moved.fetch_add(moved, Ordering::Relaxed);
    }

    pub fn stats(&self) -> VmStats {
        VmStats {
            resident_pages: self.table.lock().len(),
            collapses: self.collapses.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            pages_moved: self.pages_moved.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// INSTÂNCIA GLOBAL
// =============================================================================

static SYSTEM: Once<Arc<VmSystem>> = Once::new();

/// Instala o sistema do kernel (fase Bootstrapping). Chamadas repetidas
/// devolvem a instância já instalada.
pub fn init(pool: Arc<dyn PagePool>) -> &'static Arc<VmSystem> {
    SYSTEM.call_once(|| {
        crate::kinfo!("(VmCache) Page Cache Table com buckets=", PAGE_CACHE_TABLE_SIZE);
        Arc::new(VmSystem::bootstrapping(pool))
    })
}

/// Sistema instalado, se `init` já rodou
pub fn system() -> Option<&'static Arc<VmSystem>> {
    SYSTEM.get()
}

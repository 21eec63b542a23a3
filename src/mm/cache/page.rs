//! # VmPage
//!
//! Descritor de uma página física vista pelo cache de páginas.
//!
//! Todos os campos são atômicos: o dono (cache + índice) só muda sob o lock
//! do `VmCacheRef` dono, mas leitores de diagnóstico e o pool podem olhar
//! sem lock nenhum.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::sync::Spinlock;

/// Identidade de um cache de VM (0 = nenhum)
pub type CacheId = u64;

/// Sem cache dono
pub const NO_CACHE: CacheId = 0;

// =============================================================================
// PAGE STATE
// =============================================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Active = 0,
    Inactive = 1,
    /// Em I/O ou em transição; não pode ser mexida por terceiros
    Busy = 2,
    /// Suja, precisa ir para o store antes de sair
    Modified = 3,
    Free = 4,
    /// Livre e zerada
    Clear = 5,
    Wired = 6,
    Unused = 7,
}

impl PageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Inactive,
            2 => Self::Busy,
            3 => Self::Modified,
            4 => Self::Free,
            5 => Self::Clear,
            6 => Self::Wired,
            _ => Self::Unused,
        }
    }
}

// =============================================================================
// VM PAGE
// =============================================================================

pub struct VmPage {
    physical_page_number: u64,
    cache: AtomicU64,
    /// Índice da página dentro do cache dono
    cache_offset: AtomicU64,
    state: AtomicU8,
    mappings: AtomicU32,
    wired_count: AtomicU32,
}

impl VmPage {
    pub fn new(physical_page_number: u64) -> Self {
        Self {
            physical_page_number,
            cache: AtomicU64::new(NO_CACHE),
            cache_offset: AtomicU64::new(0),
            state: AtomicU8::new(PageState::Free as u8),
            mappings: AtomicU32::new(0),
            wired_count: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn physical_page_number(&self) -> u64 {
        self.physical_page_number
    }

    /// Cache dono, se houver
    #[inline]
    pub fn cache_id(&self) -> Option<CacheId> {
        match self.cache.load(Ordering::Acquire) {
            NO_CACHE => None,
            id => Some(id),
        }
    }

    #[inline]
    pub fn cache_offset(&self) -> u64 {
        self.cache_offset.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> PageState {
        PageState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: PageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn mappings(&self) -> u32 {
        self.mappings.load(Ordering::Acquire)
    }

    pub fn map(&self) {
        self.mappings.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unmap(&self) {
        let old = self.mappings.fetch_sub(1, Ordering::AcqRel);
        if old == 0 {
            crate::kerror!("(VmCache) unmap sem mapeamento, ppn=", self.physical_page_number);
            panic!("page {:#x}: mapping count underflow", self.physical_page_number);
        }
    }

    pub fn wired_count(&self) -> u32 {
        self.wired_count.load(Ordering::Acquire)
    }

    pub fn wire(&self) {
        self.wired_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unwire(&self) {
        let old = self.wired_count.fetch_sub(1, Ordering::AcqRel);
        if old == 0 {
            crate::kerror!("(VmCache) unwire sem wire, ppn=", self.physical_page_number);
            panic!("page {:#x}: wired count underflow", self.physical_page_number);
        }
    }

    /// Ainda mapeada ou presa em memória?
    #[inline]
    pub fn is_mapped_or_wired(&self) -> bool {
        self.mappings() != 0 || self.wired_count() != 0
    }

    pub(crate) fn set_owner(&self, cache: CacheId, index: u64) {
        self.cache_offset.store(index, Ordering::Release);
        self.cache.store(cache, Ordering::Release);
    }

    pub(crate) fn clear_owner(&self) {
        self.cache.store(NO_CACHE, Ordering::Release);
    }
}

impl core::fmt::Debug for VmPage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmPage")
            .field("ppn", &self.physical_page_number)
            .field("cache", &self.cache_id())
            .field("offset", &self.cache_offset())
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// PAGE POOL
// =============================================================================

/// Destino das páginas que saem de um cache
pub trait PagePool: Send + Sync {
    fn free_page(&self, page: Arc<VmPage>);
}

/// Pool simples: pilha de páginas livres + números físicos novos sob demanda
pub struct FreePageList {
    free: Spinlock<Vec<Arc<VmPage>>>,
    next_ppn: AtomicU64,
    freed: AtomicU64,
}

impl FreePageList {
    pub fn new(first_ppn: u64) -> Self {
        Self {
            free: Spinlock::new(Vec::new()),
            next_ppn: AtomicU64::new(first_ppn),
            freed: AtomicU64::new(0),
        }
    }

    /// Entrega uma página sem dono, já no estado `Active`
    pub fn allocate_page(&self) -> Arc<VmPage> {
        let page = match self.free.lock().pop() {
            Some(page) => page,
            None => Arc::new(VmPage::new(self.next_ppn.fetch_add(1, Ordering::Relaxed))),
        };
        page.set_state(PageState::Active);
        page
    }

    /// Páginas paradas na lista
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Total de páginas devolvidas desde a criação
    pub fn freed_total(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }
}

impl PagePool for FreePageList {
    fn free_page(&self, page: Arc<VmPage>) {
        if let Some(cache) = page.cache_id() {
            crate::kerror!("(VmCache) Página livre ainda pertence ao cache=", cache);
            panic!("freeing page {:#x} still owned by cache {}", page.physical_page_number(), cache);
        }
        page.set_state(PageState::Free);
        self.freed.fetch_add(1, Ordering::Relaxed);
        self.free.lock().push(page);
    }
}

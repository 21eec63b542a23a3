//! # VM Cache
//!
//! Um `VmCache` guarda as páginas residentes de um objeto de memória
//! (anônimo ou arquivo), indexadas pelo índice de página. Caches formam
//! cadeias copy-on-write: cada cache pode ter um `source` (cache de baixo,
//! cujas páginas ele enxerga) e vários consumers (caches de cima).
//!
//! ```text
//!            Base            <- source
//!             ^
//!             |  (1 referência por consumer)
//!             S
//!           ^   ^
//!           A   B            <- consumers
//! ```
//!
//! O `VmCacheRef` é o dono do cache: contador lógico de referências, mutex
//! e áreas que mapeiam o cache. Quando o contador chega a zero o cache é
//! destruído (store destruído, páginas de volta ao pool) e a referência que
//! ele segurava no source é solta. Essa cascata roda numa lista de trabalho,
//! nunca por recursão.
//!
//! ## Regras de lock
//!
//! - A Page Cache Table (spinlock) só é tocada com o mutex do cache dono
//!   seguro, e nunca o contrário.
//! - `add_consumer`: source → consumer.
//! - Merge (`detach_source`): consumer → source → source do source, com
//!   revalidação completa depois de soltar o lock do cache.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::page::{CacheId, PageState, VmPage};
use super::store::VmStore;
use super::system::{BootPhase, VmSystem};
use crate::mm::config::{page_index, pages_for};
use crate::mm::error::{MmError, MmResult};
use crate::sync::{Mutex, MutexGuard};

/// Identidade de uma área de endereçamento que mapeia o cache
pub type AreaId = u64;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// VM CACHE
// =============================================================================

pub struct VmCache {
    id: CacheId,
    pub(super) store: Arc<dyn VmStore>,
    pub(super) pages: BTreeMap<u64, Arc<VmPage>>,
    virtual_base: u64,
    pub(super) virtual_size: u64,
    /// Cache de baixo; seguramos uma referência nele
    pub(super) source: Option<Arc<VmCacheRef>>,
    /// Caches de cima. Não seguramos referência neles.
    pub(super) consumers: Vec<(CacheId, Weak<VmCacheRef>)>,
    temporary: bool,
    /// Marcado durante a janela do merge
    pub(super) busy: bool,
}

impl VmCache {
    /// Cria um cache vazio e o apresenta ao store
    pub fn new(store: Arc<dyn VmStore>, temporary: bool) -> Self {
        let id = NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed);
        store.attach(id);
        Self {
            id,
            store,
            pages: BTreeMap::new(),
            virtual_base: 0,
            virtual_size: 0,
            source: None,
            consumers: Vec::new(),
            temporary,
            busy: false,
        }
    }

    #[inline]
    pub fn id(&self) -> CacheId {
        self.id
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl fmt::Debug for VmCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmCache")
            .field("id", &self.id)
            .field("pages", &self.pages.len())
            .field("virtual_size", &self.virtual_size)
            .field("temporary", &self.temporary)
            .finish()
    }
}

// =============================================================================
// VM CACHE REF
// =============================================================================

pub(super) struct CacheState {
    pub cache: VmCache,
    pub areas: Vec<AreaId>,
}

/// Falha de `VmCacheRef::create`; o cache volta para o chamador
#[derive(Debug)]
pub struct CreateRefError {
    pub error: MmError,
    pub cache: VmCache,
}

pub struct VmCacheRef {
    id: CacheId,
    store: Arc<dyn VmStore>,
    ref_count: AtomicUsize,
    pub(super) system: Arc<VmSystem>,
    pub(super) inner: Mutex<CacheState>,
}

/// Cache cuja última referência caiu: falta tirá-lo da lista do source
pub(super) struct Unlink {
    pub source: Arc<VmCacheRef>,
    pub consumer: CacheId,
}

impl VmCacheRef {
    /// Embrulha o cache com contador 1 (a referência de criação).
    ///
    /// Durante o early boot o lock do cache não pode ser criado: falha com
    /// `EarlyBoot` e devolve o cache intacto.
    pub fn create(system: &Arc<VmSystem>, cache: VmCache) -> Result<Arc<VmCacheRef>, CreateRefError> {
        if system.phase() == BootPhase::Bootstrapping {
            crate::kwarn!("(VmCache) create durante o boot, cache=", cache.id());
            return Err(CreateRefError {
                error: MmError::EarlyBoot,
                cache,
            });
        }

        crate::ktrace!("(VmCache) Novo cache id=", cache.id());
        Ok(Arc::new(VmCacheRef {
            id: cache.id(),
            store: cache.store.clone(),
            ref_count: AtomicUsize::new(1),
            system: system.clone(),
            inner: Mutex::new(CacheState {
                cache,
                areas: Vec::new(),
            }),
        }))
    }

    #[inline]
    pub fn id(&self) -> CacheId {
        self.id
    }

    pub fn store(&self) -> &Arc<dyn VmStore> {
        &self.store
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Mais uma referência. Fatal num cache já morto.
    pub fn acquire_ref(&self) {
        self.store.acquire_ref();
        let old = self.ref_count.fetch_add(1, Ordering::AcqRel);
        if old == 0 {
            crate::kerror!("(VmCache) acquire_ref em cache morto id=", self.id);
            panic!("vm cache {}: acquire_ref on a dead cache", self.id);
        }
    }

    /// Como `acquire_ref`, mas falha limpo se o contador já chegou a zero
    pub fn try_acquire_ref(&self) -> bool {
        let mut current = self.ref_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.ref_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.store.acquire_ref();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Solta uma referência; na última o cache (e quem mais cair junto na
    /// cadeia) é destruído.
    pub fn release_ref(&self) {
        if !self.drop_ref() {
            return;
        }
        let mut work = Vec::new();
        self.teardown(&mut work);
        Self::run_unlinks(work);
    }

    /// Decrementa. `true` quando era a última referência.
    ///
    /// O gancho do store acompanha as referências de trabalho, não a de
    /// criação (a que cai por último).
    pub(super) fn drop_ref(&self) -> bool {
        let old = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        if old == 0 {
            crate::kerror!("(VmCache) Underflow de referências id=", self.id);
            panic!("vm cache {}: reference count underflow", self.id);
        }
        if old > 1 {
            self.store.release_ref();
            return false;
        }
        true
    }

    pub(super) fn run_unlinks(mut work: Vec<Unlink>) {
        while let Some(Unlink { source, consumer }) = work.pop() {
            source.unlink_consumer(consumer, &mut work);
        }
    }

    /// Destrói o cache morto. Se ele tinha source, deixa o desligamento
    /// pendente em `work`.
    pub(super) fn teardown(&self, work: &mut Vec<Unlink>) {
        let (pages, source) = {
            let mut state = self.inner.lock();
            if !state.areas.is_empty() {
                crate::kerror!("(VmCache) Cache destruído ainda tem áreas, id=", self.id);
                panic!("vm cache {}: deleted while it still has areas", self.id);
            }
            if !state.cache.consumers.is_empty() {
                crate::kerror!("(VmCache) Cache destruído ainda tem consumers, id=", self.id);
                panic!("vm cache {}: deleted while it still has consumers", self.id);
            }
            (
                mem::take(&mut state.cache.pages),
                state.cache.source.take(),
            )
        };

        self.store.destroy();

        for (index, page) in pages {
            if page.is_mapped_or_wired() {
                crate::kerror!("(VmCache) Página ainda mapeada no teardown, ppn=", page.physical_page_number());
                panic!(
                    "remove page {:#x} from cache {}: page still has mappings",
                    page.physical_page_number(),
                    self.id
                );
            }
            self.system.table_remove(self.id, index);
            page.clear_owner();
            self.system.free_page(page);
        }

        self.system.note_teardown();
        crate::ktrace!("(VmCache) Cache destruído id=", self.id);

        if let Some(source) = source {
            work.push(Unlink {
                source,
                consumer: self.id,
            });
        }
    }

    /// Trava o cache
    pub fn lock(self: &Arc<Self>) -> LockedCache<'_> {
        LockedCache {
            cache_ref: self,
            state: self.inner.lock(),
        }
    }

    /// Escreve no store todas as páginas `Modified`. Retorna quantas.
    pub fn write_modified(&self) -> MmResult<usize> {
        let state = self.inner.lock();
        let mut written = 0;
        for (&index, page) in &state.cache.pages {
            if page.state() != PageState::Modified {
                continue;
            }
            self.store.write_page(index, page)?;
            page.set_state(PageState::Active);
            written += 1;
        }
        Ok(written)
    }

    /// Desliga uma área. `false` se ela não mapeava este cache.
    pub fn remove_area(&self, area: AreaId) -> bool {
        let mut state = self.inner.lock();
        match state.areas.iter().position(|&a| a == area) {
            Some(position) => {
                state.areas.swap_remove(position);
                true
            }
            None => false,
        }
    }

    pub fn area_count(&self) -> usize {
        self.inner.lock().areas.len()
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().cache.pages.len()
    }

    pub fn virtual_size(&self) -> u64 {
        self.inner.lock().cache.virtual_size
    }

    pub fn source_id(&self) -> Option<CacheId> {
        self.inner.lock().cache.source.as_ref().map(|source| source.id())
    }

    pub fn consumer_ids(&self) -> Vec<CacheId> {
        self.inner
            .lock()
            .cache
            .consumers
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().cache.busy
    }

    pub fn is_temporary(&self) -> bool {
        self.inner.lock().cache.is_temporary()
    }
}

impl fmt::Debug for VmCacheRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmCacheRef")
            .field("id", &self.id)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

// =============================================================================
// LOCKED CACHE
// =============================================================================

/// Guard do mutex do cache. As operações de página exigem o lock.
pub struct LockedCache<'a> {
    cache_ref: &'a Arc<VmCacheRef>,
    state: MutexGuard<'a, CacheState>,
}

impl LockedCache<'_> {
    #[inline]
    pub fn id(&self) -> CacheId {
        self.cache_ref.id
    }

    /// Página no offset (bytes), via Page Cache Table
    pub fn lookup_page(&self, offset: u64) -> Option<Arc<VmPage>> {
        let page = self.cache_ref.system.lookup(self.id(), page_index(offset))?;
        if page.cache_id() != Some(self.id()) {
            crate::kerror!("(VmCache) Página da tabela com outro dono, ppn=", page.physical_page_number());
            panic!("page {:#x} not in cache {}", page.physical_page_number(), self.id());
        }
        Some(page)
    }

    /// Insere uma página sem dono no offset (bytes)
    pub fn insert_page(&mut self, page: Arc<VmPage>, offset: u64) {
        let id = self.id();
        if let Some(owner) = page.cache_id() {
            crate::kerror!("(VmCache) Inserindo página com dono=", owner);
            panic!(
                "insert page {:#x} into cache {}: page already belongs to cache {}",
                page.physical_page_number(),
                id,
                owner
            );
        }

        let index = page_index(offset);
        if self.state.cache.pages.contains_key(&index) {
            crate::kerror!("(VmCache) Offset já ocupado, índice=", index);
            panic!("insert page into cache {}: offset {:#x} already occupied", id, offset);
        }

        page.set_owner(id, index);
        self.state.cache.pages.insert(index, page.clone());
        self.cache_ref.system.table_insert(id, index, page);
    }

    /// Tira a página do cache (ela fica sem dono)
    pub fn remove_page(&mut self, page: &Arc<VmPage>) {
        let id = self.id();
        if page.cache_id() != Some(id) {
            crate::kerror!("(VmCache) remove_page de cache errado, ppn=", page.physical_page_number());
            panic!(
                "remove page {:#x} from cache {}: page cache is {:?}",
                page.physical_page_number(),
                id,
                page.cache_id()
            );
        }

        let index = page.cache_offset();
        self.cache_ref.system.table_remove(id, index);
        self.state.cache.pages.remove(&index);
        page.clear_owner();
    }

    /// Novo tamanho virtual. Faz commit primeiro; ao encolher, páginas a
    /// partir da nova contagem vão para o pool sem write-back.
    pub fn resize(&mut self, new_size: u64) -> MmResult<()> {
        self.state.cache.store.commit(new_size)?;

        let old_pages = pages_for(self.state.cache.virtual_size);
        let new_pages = pages_for(new_size);

        if new_pages < old_pages {
            let doomed: Vec<Arc<VmPage>> = self
                .state
                .cache
                .pages
                .range(new_pages..)
                .map(|(_, page)| page.clone())
                .collect();
            crate::kdebug!("(VmCache) resize liberando páginas=", doomed.len());
            for page in doomed {
                self.remove_page(&page);
                self.cache_ref.system.free_page(page);
            }
        }

        self.state.cache.virtual_size = new_size;
        Ok(())
    }

    /// Commit só se o store ainda não cobre `commitment` bytes
    pub fn set_minimal_commitment(&mut self, commitment: u64) -> MmResult<()> {
        let store = &self.state.cache.store;
        if store.committed_size() < commitment {
            store.commit(commitment)?;
        }
        Ok(())
    }

    pub fn insert_area(&mut self, area: AreaId) {
        self.state.areas.push(area);
    }

    /// Liga `consumer` a este cache. Os dois locks já estão seguros.
    pub fn add_consumer_locked(&mut self, consumer: &mut LockedCache<'_>) {
        if let Some(source) = &consumer.state.cache.source {
            crate::kerror!("(VmCache) Consumer já tem source id=", source.id());
            panic!("vm cache {}: already consumer of cache {}", consumer.id(), source.id());
        }

        consumer.state.cache.source = Some(self.cache_ref.clone());
        self.state
            .cache
            .consumers
            .push((consumer.id(), Arc::downgrade(consumer.cache_ref)));
        self.cache_ref.acquire_ref();
    }

    pub fn page_count(&self) -> usize {
        self.state.cache.pages.len()
    }

    pub fn virtual_base(&self) -> u64 {
        self.state.cache.virtual_base
    }

    pub fn set_virtual_base(&mut self, base: u64) {
        self.state.cache.virtual_base = base;
    }

    pub fn virtual_size(&self) -> u64 {
        self.state.cache.virtual_size
    }

    /// Páginas residentes em ordem de índice
    pub fn pages(&self) -> impl Iterator<Item = (u64, &Arc<VmPage>)> + '_ {
        self.state.cache.pages.iter().map(|(&index, page)| (index, page))
    }

    pub fn is_busy(&self) -> bool {
        self.state.cache.busy
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use super::*;
    use crate::mm::cache::page::FreePageList;
    use crate::mm::cache::store::AnonymousStore;
    use crate::mm::config::PAGE_SIZE;

    #[test]
    fn test_insert_lookup_remove() {
        let fx = Fixture::new();
        let (cache, _) = fx.cache();
        let page = fx.pool.allocate_page();

        let mut locked = cache.lock();
        locked.insert_page(page.clone(), 3 * PAGE_SIZE as u64);
        assert_eq!(page.cache_id(), Some(cache.id()));
        assert_eq!(page.cache_offset(), 3);

        let found = locked.lookup_page(3 * PAGE_SIZE as u64 + 17).unwrap();
        assert!(Arc::ptr_eq(&found, &page));
        assert!(locked.lookup_page(0).is_none());

        locked.remove_page(&page);
        assert_eq!(page.cache_id(), None);
        assert!(locked.lookup_page(3 * PAGE_SIZE as u64).is_none());
        assert_eq!(locked.page_count(), 0);
        drop(locked);
        assert_eq!(fx.system.stats().resident_pages, 0);
    }

    #[test]
    #[should_panic(expected = "already belongs")]
    fn test_insert_owned_page_panics() {
        let fx = Fixture::new();
        let (a, _) = fx.cache();
        let (b, _) = fx.cache();
        let page = fx.populate(&a, &[0]).remove(0);
        b.lock().insert_page(page, PAGE_SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "already occupied")]
    fn test_insert_occupied_offset_panics() {
        let fx = Fixture::new();
        let (cache, _) = fx.cache();
        fx.populate(&cache, &[2]);
        let page = fx.pool.allocate_page();
        cache.lock().insert_page(page, 2 * PAGE_SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "page cache is")]
    fn test_remove_foreign_page_panics() {
        let fx = Fixture::new();
        let (a, _) = fx.cache();
        let (b, _) = fx.cache();
        let page = fx.populate(&a, &[0]).remove(0);
        b.lock().remove_page(&page);
    }

    #[test]
    fn test_resize_shrink_frees_tail() {
        let fx = Fixture::new();
        let (cache, store) = fx.cache();
        cache.lock().resize(4 * PAGE_SIZE as u64).unwrap();
        fx.populate(&cache, &[0, 1, 2, 3]);

        cache.lock().resize(2 * PAGE_SIZE as u64 - 1).unwrap();
        assert_eq!(cache.page_count(), 2);
        assert_eq!(cache.virtual_size(), 2 * PAGE_SIZE as u64 - 1);
        assert_eq!(store.committed_size(), 2 * PAGE_SIZE as u64 - 1);
        assert_eq!(fx.pool.free_count(), 2);
        assert!(fx.system.lookup(cache.id(), 2).is_none());
        assert!(fx.system.lookup(cache.id(), 1).is_some());

        cache.lock().resize(8 * PAGE_SIZE as u64).unwrap();
        assert_eq!(cache.page_count(), 2);
    }

    #[test]
    fn test_resize_to_huge_size_keeps_pages() {
        let fx = Fixture::new();
        let (cache, store) = fx.cache();
        cache.lock().resize(3 * PAGE_SIZE as u64).unwrap();
        let pages = fx.populate(&cache, &[0, 1, 2]);

        cache.lock().resize(u64::MAX).unwrap();
        assert_eq!(cache.virtual_size(), u64::MAX);
        assert_eq!(store.committed_size(), u64::MAX);
        assert_eq!(cache.page_count(), 3);
        assert_eq!(fx.pool.free_count(), 0);
        assert!(pages.iter().all(|page| page.cache_id() == Some(cache.id())));

        // Voltar do tamanho máximo só corta o que passa do novo fim
        cache.lock().resize(2 * PAGE_SIZE as u64).unwrap();
        assert_eq!(cache.page_count(), 2);
        assert_eq!(fx.pool.free_count(), 1);
    }

    #[test]
    fn test_resize_commit_failure_keeps_size() {
        let fx = Fixture::new();
        let (cache, _) = fx.cache_with(AnonymousStore::with_limit(4 * PAGE_SIZE as u64));
        cache.lock().resize(2 * PAGE_SIZE as u64).unwrap();

        let result = cache.lock().resize(8 * PAGE_SIZE as u64);
        assert_eq!(result, Err(MmError::QuotaExceeded));
        assert_eq!(cache.virtual_size(), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_minimal_commitment() {
        let fx = Fixture::new();
        let (cache, store) = fx.cache();
        cache.lock().set_minimal_commitment(PAGE_SIZE as u64).unwrap();
        assert_eq!(store.committed_size(), PAGE_SIZE as u64);

        // Já coberto: nada muda
        cache.lock().set_minimal_commitment(10).unwrap();
        assert_eq!(store.committed_size(), PAGE_SIZE as u64);
    }

    #[test]
    fn test_release_last_ref_frees_pages() {
        let fx = Fixture::new();
        let (cache, store) = fx.cache();
        fx.populate(&cache, &[0, 5, 9]);
        assert_eq!(fx.system.stats().resident_pages, 3);

        cache.acquire_ref();
        cache.release_ref();
        assert_eq!(store.destroy_count(), 0);
        assert_eq!(store.ref_events(), (1, 1));

        cache.release_ref();
        assert_eq!(cache.ref_count(), 0);
        assert_eq!(store.destroy_count(), 1);
        // A referência de criação não passa pelo gancho do store
        assert_eq!(store.ref_events(), (1, 1));
        assert_eq!(fx.pool.free_count(), 3);
        assert_eq!(fx.system.stats().resident_pages, 0);
        assert_eq!(fx.system.stats().teardowns, 1);
    }

    #[test]
    #[should_panic(expected = "still has mappings")]
    fn test_teardown_of_mapped_page_panics() {
        let fx = Fixture::new();
        let (cache, _) = fx.cache();
        fx.populate(&cache, &[0])[0].map();
        cache.release_ref();
    }

    #[test]
    #[should_panic(expected = "still has areas")]
    fn test_teardown_with_area_panics() {
        let fx = Fixture::new();
        let (cache, _) = fx.cache();
        cache.lock().insert_area(7);
        cache.release_ref();
    }

    #[test]
    fn test_areas() {
        let fx = Fixture::new();
        let (cache, _) = fx.cache();
        cache.lock().insert_area(1);
        cache.lock().insert_area(2);
        assert_eq!(cache.area_count(), 2);
        assert!(cache.remove_area(1));
        assert!(!cache.remove_area(1));
        assert!(cache.remove_area(2));
        cache.release_ref();
    }

    #[test]
    fn test_try_acquire_fails_at_zero() {
        let fx = Fixture::new();
        let (cache, _) = fx.cache();
        assert!(cache.try_acquire_ref());
        assert_eq!(cache.ref_count(), 2);
        cache.release_ref();
        cache.release_ref();
        assert!(!cache.try_acquire_ref());
        assert_eq!(cache.ref_count(), 0);
    }

    #[test]
    fn test_create_during_boot_hands_cache_back() {
        let system = Arc::new(VmSystem::bootstrapping(Arc::new(FreePageList::new(0))));
        let cache = VmCache::new(Arc::new(AnonymousStore::new()), false);
        let id = cache.id();

        let err = VmCacheRef::create(&system, cache).unwrap_err();
        assert_eq!(err.error, MmError::EarlyBoot);
        assert_eq!(err.cache.id(), id);

        system.finish_boot();
        let cache_ref = VmCacheRef::create(&system, err.cache).unwrap();
        assert_eq!(cache_ref.id(), id);
        assert!(!cache_ref.is_temporary());
    }

    #[test]
    fn test_write_modified() {
        let fx = Fixture::new();
        let (cache, store) = fx.cache();
        let pages = fx.populate(&cache, &[0, 1, 2]);
        pages[0].set_state(PageState::Modified);
        pages[2].set_state(PageState::Modified);

        assert_eq!(cache.write_modified(), Ok(2));
        assert_eq!(store.pages_written(), 2);
        assert!(pages.iter().all(|page| page.state() == PageState::Active));
    }

    #[test]
    fn test_concurrent_refs_teardown_once() {
        let fx = Fixture::new();
        let (cache, store) = fx.cache();
        fx.populate(&cache, &[0, 1]);

        let mut handles = std::vec::Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    cache.acquire_ref();
                    cache.release_ref();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.ref_count(), 1);
        assert_eq!(store.destroy_count(), 0);
        cache.release_ref();
        assert_eq!(store.destroy_count(), 1);
        assert_eq!(store.ref_events(), (2000, 2000));
        assert_eq!(fx.pool.free_count(), 2);
    }
}

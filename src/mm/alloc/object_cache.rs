//! # Object Cache (Slab Allocator)
//!
//! Alocador de objetos de tamanho fixo cortados de slabs alinhados a página.
//!
//! ## 🏗️ Arquitetura
//!
//! ```text
//!  allocate()/free()
//!        │
//!        ▼
//!  ObjectDepot (só com >1 CPU) ── despejo ──┐
//!        │ miss                              │
//!        ▼                                   ▼
//!  Mutex<CacheInner>: partial → empty → novo slab (lock solto no pedido de páginas)
//!        │
//!        ▼
//!  SlabPageSource: área do kernel (normal) ou reserva de boot (early)
//! ```
//!
//! ## Listas de slabs
//!
//! Todo slab está em exatamente uma lista:
//! - **empty**: todos os objetos livres (retidos até `pressure`)
//! - **partial**: alguns livres, alguns em uso (fonte preferida)
//! - **full**: nenhum livre
//!
//! As listas são intrusivas por índice (`SlabId`) sobre uma arena de slabs.
//!
//! ## Fases
//!
//! `CacheFlags::DURING_BOOT` começa em `PageStrategy::Early`. A única transição
//! para `Normal` é `commit_early_slabs()`, que registra cada slab early como área.
//! Liberar páginas ainda na fase early é fatal.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr::NonNull;

use super::depot::{DepotStats, ObjectDepot};
use super::flags::{AllocFlags, CacheFlags};
use super::pages::{truncated_name, SlabPageSource};
use super::slab::{ObjectLink, Slab, SlabId, SlabLink, SlabState};
use crate::klib::{align_up, is_power_of_two};
use crate::mm::config::{
    CACHE_COLOR_PERIOD, DEPOT_MAGAZINE_CAPACITY, DEPOT_MAX_MAGAZINES, LARGE_OBJECTS_PER_SLAB,
    PAGE_SIZE, SMALL_OBJECT_DIVISOR,
};
use crate::mm::error::{MmError, MmResult};
use crate::sync::{Mutex, MutexGuard};

// =============================================================================
// HOOKS
// =============================================================================

/// Callbacks por objeto e de reclaim.
///
/// O próprio objeto de hooks faz o papel de "cookie" do cache.
/// A última palavra de um objeto é sobrescrita enquanto ele está livre.
pub trait ObjectHooks: Send + Sync {
    /// Prepara o objeto antes do construtor
    fn prepare(&self, _object: NonNull<u8>) -> MmResult<()> {
        Ok(())
    }

    fn construct(&self, _object: NonNull<u8>) -> MmResult<()> {
        Ok(())
    }

    fn destruct(&self, _object: NonNull<u8>) {}

    /// Desfaz `prepare`
    fn unprepare(&self, _object: NonNull<u8>) {}

    /// Pressão de memória: o dono do cache pode soltar objetos próprios
    fn reclaim(&self, _level: LowMemoryLevel) {}
}

/// Cache sem construtor/destrutor
pub struct NoHooks;

impl ObjectHooks for NoHooks {}

/// Gravidade de uma notificação de pouca memória
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowMemoryLevel {
    /// Manter no máximo `pressure / 2 + 1` slabs vazios
    Note,
    /// Cortar `pressure` pela metade e soltar todos os slabs vazios
    Warning,
    /// Zerar `pressure` e soltar todos os slabs vazios
    Critical,
}

// =============================================================================
// CONFIGURAÇÃO
// =============================================================================

/// Parâmetros de criação de um `ObjectCache` (estilo builder)
#[derive(Debug, Clone)]
pub struct ObjectCacheConfig {
    name: String,
    object_size: usize,
    alignment: usize,
    maximum: usize,
    flags: CacheFlags,
    slab_size: Option<usize>,
    magazine_capacity: usize,
    max_magazines: usize,
    cpu_count: Option<usize>,
}

impl ObjectCacheConfig {
    pub fn new(name: &str, object_size: usize) -> Self {
        Self {
            name: truncated_name(name),
            object_size,
            alignment: 0,
            maximum: 0,
            flags: CacheFlags::empty(),
            slab_size: None,
            magazine_capacity: DEPOT_MAGAZINE_CAPACITY,
            max_magazines: DEPOT_MAX_MAGAZINES,
            cpu_count: None,
        }
    }

    /// Alinhamento dos objetos (0 = sem exigência)
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Quota em bytes de slabs (0 = ilimitado)
    pub fn maximum(mut self, bytes: usize) -> Self {
        self.maximum = bytes;
        self
    }

    pub fn flags(mut self, flags: CacheFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Força o tamanho do slab (potência de dois, >= uma página)
    pub fn slab_size(mut self, bytes: usize) -> Self {
        self.slab_size = Some(bytes);
        self
    }

    pub fn magazine_capacity(mut self, objects: usize) -> Self {
        self.magazine_capacity = objects;
        self
    }

    pub fn max_magazines(mut self, magazines: usize) -> Self {
        self.max_magazines = magazines;
        self
    }

    /// Número de CPUs a considerar (padrão: `arch::active_cpus()`)
    pub fn cpu_count(mut self, cpus: usize) -> Self {
        self.cpu_count = Some(cpus);
        self
    }
}

/// De onde vêm as páginas dos novos slabs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    /// Reserva de boot, sem áreas
    Early,
    /// Áreas do kernel
    Normal,
}

// =============================================================================
// ESTADO PROTEGIDO
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct SlabList {
    head: Option<SlabId>,
    tail: Option<SlabId>,
    len: usize,
}

struct CacheInner {
    /// Arena de slabs, indexada por `SlabId`
    slabs: Vec<Option<Slab>>,
    free_ids: Vec<SlabId>,
    empty: SlabList,
    partial: SlabList,
    full: SlabList,
    /// Início do bloco → slab
    by_base: BTreeMap<usize, SlabId>,
    total_objects: usize,
    used_count: usize,
    empty_count: usize,
    color_cycle: usize,
    pressure: usize,
    min_object_reserve: usize,
    /// Bytes de slabs (inclui pedidos em andamento)
    usage: usize,
    strategy: PageStrategy,
}

impl CacheInner {
    fn new(strategy: PageStrategy) -> Self {
        Self {
            slabs: Vec::new(),
            free_ids: Vec::new(),
            empty: SlabList::default(),
            partial: SlabList::default(),
            full: SlabList::default(),
            by_base: BTreeMap::new(),
            total_objects: 0,
            used_count: 0,
            empty_count: 0,
            color_cycle: 0,
            pressure: 0,
            min_object_reserve: 0,
            usage: 0,
            strategy,
        }
    }

    fn slab(&self, id: SlabId) -> &Slab {
        match self.slabs.get(id.0 as usize) {
            Some(Some(slab)) => slab,
            _ => panic!("object cache: stale slab id {}", id.0),
        }
    }

    fn slab_mut(&mut self, id: SlabId) -> &mut Slab {
        match self.slabs.get_mut(id.0 as usize) {
            Some(Some(slab)) => slab,
            _ => panic!("object cache: stale slab id {}", id.0),
        }
    }

    fn list_mut(&mut self, state: SlabState) -> &mut SlabList {
        match state {
            SlabState::Empty => &mut self.empty,
            SlabState::Partial => &mut self.partial,
            SlabState::Full => &mut self.full,
        }
    }

    fn list(&self, state: SlabState) -> &SlabList {
        match state {
            SlabState::Empty => &self.empty,
            SlabState::Partial => &self.partial,
            SlabState::Full => &self.full,
        }
    }

    /// Guarda o slab na arena, fora de qualquer lista
    fn insert_slab(&mut self, slab: Slab) -> SlabId {
        let base = slab.base();
        let id = match self.free_ids.pop() {
            Some(id) => {
                self.slabs[id.0 as usize] = Some(slab);
                id
            }
            None => {
                self.slabs.push(Some(slab));
                SlabId((self.slabs.len() - 1) as u32)
            }
        };
        self.by_base.insert(base, id);
        id
    }

    /// Tira o slab da arena (já fora das listas)
    fn take_slab(&mut self, id: SlabId) -> Slab {
        let slab = match self.slabs.get_mut(id.0 as usize).and_then(Option::take) {
            Some(slab) => slab,
            None => panic!("object cache: stale slab id {}", id.0),
        };
        self.by_base.remove(&slab.base());
        self.free_ids.push(id);
        slab
    }

    /// Coloca no fim da lista `state`
    fn list_push(&mut self, state: SlabState, id: SlabId) {
        let tail = self.list(state).tail;
        {
            let slab = self.slab_mut(id);
            slab.state = state;
            slab.link = SlabLink { prev: tail, next: None };
        }
        match tail {
            Some(tail) => self.slab_mut(tail).link.next = Some(id),
            None => self.list_mut(state).head = Some(id),
        }
        let list = self.list_mut(state);
        list.tail = Some(id);
        list.len += 1;
    }

    /// Remove da lista em que está
    fn list_remove(&mut self, id: SlabId) {
        let (state, link) = {
            let slab = self.slab(id);
            (slab.state, slab.link)
        };
        match link.prev {
            Some(prev) => self.slab_mut(prev).link.next = link.next,
            None => self.list_mut(state).head = link.next,
        }
        match link.next {
            Some(next) => self.slab_mut(next).link.prev = link.prev,
            None => self.list_mut(state).tail = link.prev,
        }
        self.list_mut(state).len -= 1;
        self.slab_mut(id).link = SlabLink::default();
    }

    fn list_move(&mut self, id: SlabId, state: SlabState) {
        self.list_remove(id);
        self.list_push(state, id);
    }

    /// Slab que contém `addr`
    fn object_slab(&self, addr: usize) -> Option<SlabId> {
        let (_, &id) = self.by_base.range(..=addr).next_back()?;
        self.slab(id).contains(addr).then_some(id)
    }

    fn ids_in(&self, state: SlabState) -> Vec<SlabId> {
        let mut ids = Vec::with_capacity(self.list(state).len);
        let mut cursor = self.list(state).head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.slab(id).link.next;
        }
        ids
    }

    fn all_ids(&self) -> Vec<SlabId> {
        let mut ids = self.ids_in(SlabState::Full);
        ids.extend(self.ids_in(SlabState::Partial));
        ids.extend(self.ids_in(SlabState::Empty));
        ids
    }
}

// =============================================================================
// INFORMAÇÕES PÚBLICAS
// =============================================================================

/// Snapshot de um slab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabInfo {
    pub id: SlabId,
    pub base: usize,
    pub size: usize,
    pub free: usize,
    pub color_offset: usize,
    pub state: SlabState,
}

impl SlabInfo {
    fn of(id: SlabId, slab: &Slab) -> Self {
        Self {
            id,
            base: slab.base(),
            size: slab.size(),
            free: slab.free_count(),
            color_offset: slab.color_offset(),
            state: slab.state,
        }
    }
}

/// Estatísticas do cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub object_size: usize,
    pub slab_size: usize,
    pub total_objects: usize,
    pub used_objects: usize,
    pub empty_slabs: usize,
    pub partial_slabs: usize,
    pub full_slabs: usize,
    pub usage: usize,
    pub maximum: usize,
    pub pressure: usize,
    pub min_object_reserve: usize,
    pub depot: Option<DepotStats>,
}

// =============================================================================
// OBJECT CACHE
// =============================================================================

pub struct ObjectCache {
    name: String,
    object_size: usize,
    slab_size: usize,
    /// Alinhamento pedido para blocos do caminho normal
    slab_align: usize,
    maximum: usize,
    flags: CacheFlags,
    hooks: Arc<dyn ObjectHooks>,
    source: Arc<dyn SlabPageSource>,
    depot: Option<ObjectDepot>,
    inner: Mutex<CacheInner>,
}

impl ObjectCache {
    /// Cria um cache.
    ///
    /// Falha com `InvalidParameter` (alinhamento ou slab inválido) ou
    /// `DepotInitFailed`.
    pub fn new(
        config: ObjectCacheConfig,
        hooks: Arc<dyn ObjectHooks>,
        source: Arc<dyn SlabPageSource>,
    ) -> MmResult<Self> {
        if config.alignment != 0 && !is_power_of_two(config.alignment) {
            crate::kwarn!("(Slab) Alinhamento inválido=", config.alignment);
            return Err(MmError::InvalidParameter);
        }

        let mut object_size = config.object_size.max(size_of::<ObjectLink>());
        if config.alignment > 0 {
            object_size = align_up(object_size, config.alignment);
        }

        let slab_size = match config.slab_size {
            Some(size) => {
                if !is_power_of_two(size) || size < PAGE_SIZE || size < object_size {
                    crate::kwarn!("(Slab) Tamanho de slab inválido=", size);
                    return Err(MmError::InvalidParameter);
                }
                size
            }
            None => default_slab_size(object_size),
        };

        let mut flags = config.flags;
        let cpu_count = config.cpu_count.unwrap_or_else(crate::arch::active_cpus);
        // Sem ganho com depot em uma CPU
        if cpu_count <= 1 {
            flags |= CacheFlags::NO_DEPOT;
        }

        let depot = if flags.contains(CacheFlags::NO_DEPOT) {
            None
        } else {
            Some(ObjectDepot::new(
                cpu_count,
                config.magazine_capacity,
                config.max_magazines,
            )?)
        };

        let strategy = if flags.contains(CacheFlags::DURING_BOOT) {
            PageStrategy::Early
        } else {
            PageStrategy::Normal
        };

        let slab_align = if flags.contains(CacheFlags::ALIGN_ON_SIZE) {
            slab_size
        } else {
            PAGE_SIZE
        };

        crate::kinfo!("(Slab) Cache criado, objeto=", object_size);
        crate::kdebug!("(Slab) Tamanho do slab=", slab_size);

        Ok(Self {
            name: config.name,
            object_size,
            slab_size,
            slab_align,
            maximum: config.maximum,
            flags,
            hooks,
            source,
            depot,
            inner: Mutex::new(CacheInner::new(strategy)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tamanho efetivo do objeto (com link e alinhamento)
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    pub fn flags(&self) -> CacheFlags {
        self.flags
    }

    pub fn has_depot(&self) -> bool {
        self.depot.is_some()
    }

    pub fn strategy(&self) -> PageStrategy {
        self.inner.lock().strategy
    }

    // -------------------------------------------------------------------------
    // Objetos
    // -------------------------------------------------------------------------

    /// Aloca um objeto (já construído)
    pub fn allocate(&self, flags: AllocFlags) -> MmResult<NonNull<u8>> {
        if let Some(depot) = &self.depot {
            if let Some(object) = depot.pop() {
                return Ok(object);
            }
        }

        let mut inner = self.inner.lock();
        loop {
            let candidate = inner.partial.head.or(inner.empty.head);
            if let Some(id) = candidate {
                return Ok(self.take_object(&mut inner, id));
            }
            inner = self.grow(inner, flags)?;
        }
    }

    /// Devolve um objeto. Fatal para objeto desconhecido ou double free.
    pub fn free(&self, object: NonNull<u8>) {
        if let Some(depot) = &self.depot {
            if let Some(mut evicted) = depot.push(object) {
                let mut inner = self.inner.lock();
                for object in evicted.drain() {
                    self.return_object(&mut inner, object);
                }
            }
            return;
        }

        let mut inner = self.inner.lock();
        self.return_object(&mut inner, object);
    }

    /// Slab dono do endereço
    pub fn object_slab(&self, object: NonNull<u8>) -> Option<SlabInfo> {
        let inner = self.inner.lock();
        let id = inner.object_slab(object.as_ptr() as usize)?;
        Some(SlabInfo::of(id, inner.slab(id)))
    }

    /// Snapshot de todos os slabs (full, partial, empty)
    pub fn slabs(&self) -> Vec<SlabInfo> {
        let inner = self.inner.lock();
        inner
            .all_ids()
            .into_iter()
            .map(|id| SlabInfo::of(id, inner.slab(id)))
            .collect()
    }

    fn take_object(&self, inner: &mut CacheInner, id: SlabId) -> NonNull<u8> {
        if inner.slab(id).state == SlabState::Empty {
            inner.empty_count -= 1;
            inner.list_move(id, SlabState::Partial);
        }

        let object = match inner.slab_mut(id).pop() {
            Some(object) => object,
            None => panic!("object cache {}: slab on free list has no objects", self.name),
        };
        inner.used_count += 1;

        if inner.slab(id).is_full() {
            inner.list_move(id, SlabState::Full);
        }

        crate::ktrace!("(Slab) Objeto entregue=", object.as_ptr() as usize);
        object
    }

    fn return_object(&self, inner: &mut CacheInner, object: NonNull<u8>) {
        let addr = object.as_ptr() as usize;
        match inner.object_slab(addr) {
            Some(id) => self.return_object_to_slab(inner, id, object),
            None => {
                crate::kerror!("(Slab) Objeto liberado sem slab=", addr);
                panic!("object cache {}: free'd object {:#x} has no slab", self.name, addr);
            }
        }
    }

    /// Devolve o objeto ao seu slab e ajusta as listas. Sempre sob o lock.
    fn return_object_to_slab(&self, inner: &mut CacheInner, id: SlabId, object: NonNull<u8>) {
        inner.slab_mut(id).push(object);
        inner.used_count -= 1;

        let (free, size) = {
            let slab = inner.slab(id);
            (slab.free_count(), slab.size())
        };

        if free == size {
            inner.list_remove(id);

            // Retido só abaixo de `pressure` e se, mesmo sem ele, a reserva fica coberta
            let spare_without_slab = inner.total_objects - inner.used_count - size;
            if inner.empty_count < inner.pressure && spare_without_slab >= inner.min_object_reserve {
                inner.empty_count += 1;
                inner.list_push(SlabState::Empty, id);
            } else {
                self.return_slab(inner, id);
            }
        } else if free == 1 {
            inner.list_move(id, SlabState::Partial);
        }
    }

    // -------------------------------------------------------------------------
    // Slabs
    // -------------------------------------------------------------------------

    /// Cria um slab novo (lista empty). O lock é solto durante o pedido de páginas.
    fn grow<'a>(
        &'a self,
        mut inner: MutexGuard<'a, CacheInner>,
        flags: AllocFlags,
    ) -> MmResult<MutexGuard<'a, CacheInner>> {
        if self.maximum != 0 && inner.usage + self.slab_size > self.maximum {
            crate::kwarn!("(Slab) Quota excedida, uso=", inner.usage);
            return Err(MmError::QuotaExceeded);
        }

        // Reserva o uso antes de soltar o lock
        inner.usage += self.slab_size;
        let strategy = inner.strategy;
        drop(inner);

        let pages = match strategy {
            PageStrategy::Early => self.source.allocate_early(self.slab_size, self.slab_size),
            PageStrategy::Normal => {
                self.source
                    .allocate_area(&self.name, self.slab_size, self.slab_align, flags)
            }
        };

        let mut inner = self.inner.lock();
        let pages = match pages {
            Ok(pages) => pages,
            Err(err) => {
                inner.usage -= self.slab_size;
                return Err(err);
            }
        };

        // commit_early_slabs() rodou enquanto o lock estava solto
        if strategy == PageStrategy::Early && inner.strategy == PageStrategy::Normal {
            self.commit_slab(pages);
        }

        match self.init_slab(&mut inner, pages) {
            Ok(id) => {
                inner.empty_count += 1;
                inner.list_push(SlabState::Empty, id);
                crate::kdebug!("(Slab) Novo slab em=", pages.as_ptr() as usize);
                Ok(inner)
            }
            Err(err) => {
                let strategy = inner.strategy;
                self.free_pages(&mut inner, strategy, pages);
                Err(err)
            }
        }
    }

    /// Corta e constrói os objetos do bloco. Nada fica visível em caso de falha.
    fn init_slab(&self, inner: &mut CacheInner, pages: NonNull<u8>) -> MmResult<SlabId> {
        let capacity = self.slab_size / self.object_size;
        let spare = self.slab_size - capacity * self.object_size;

        let mut offset = inner.color_cycle;
        if offset > spare {
            offset = 0;
            inner.color_cycle = 0;
        } else {
            inner.color_cycle += CACHE_COLOR_PERIOD;
        }

        crate::ktrace!("(Slab) init_slab, cor=", offset);

        let mut slab = Slab::new(pages, self.slab_size, self.object_size, offset);
        for index in 0..slab.size() {
            let object = slab.object_at(index);

            let status = match self.hooks.prepare(object) {
                Ok(()) => self.hooks.construct(object).map_err(|err| {
                    self.hooks.unprepare(object);
                    err
                }),
                Err(err) => Err(err),
            };

            if let Err(err) = status {
                // Desfaz em ordem reversa
                for done in (0..index).rev() {
                    let object = slab.object_at(done);
                    self.hooks.destruct(object);
                    self.hooks.unprepare(object);
                }
                crate::kwarn!("(Slab) Construtor falhou no objeto=", index);
                return Err(err);
            }

            slab.add_constructed(index);
        }

        inner.total_objects += slab.size();
        Ok(inner.insert_slab(slab))
    }

    /// Destrói os objetos de um slab vazio
    fn uninit_slab(&self, slab: &Slab) {
        if !slab.is_empty() {
            crate::kerror!("(Slab) Destruindo slab não vazio em=", slab.base());
            panic!("object cache {}: destroying a slab which isn't empty", self.name);
        }

        for index in 0..slab.size() {
            let object = slab.object_at(index);
            self.hooks.destruct(object);
            self.hooks.unprepare(object);
        }
    }

    /// Solta um slab (já fora das listas) de volta à fonte de páginas
    fn return_slab(&self, inner: &mut CacheInner, id: SlabId) {
        let slab = inner.take_slab(id);
        self.uninit_slab(&slab);
        inner.total_objects -= slab.size();
        let strategy = inner.strategy;
        self.free_pages(inner, strategy, slab.pages());
    }

    fn free_pages(&self, inner: &mut CacheInner, strategy: PageStrategy, pages: NonNull<u8>) {
        match strategy {
            PageStrategy::Early => {
                crate::kerror!("(Slab) Liberando páginas early em=", pages.as_ptr() as usize);
                panic!("memory pressure on bootup?");
            }
            PageStrategy::Normal => {
                self.source.free_area(pages, self.slab_size);
                inner.usage -= self.slab_size;
            }
        }
    }

    fn commit_slab(&self, pages: NonNull<u8>) {
        if self.source.commit_early(&self.name, pages, self.slab_size).is_err() {
            crate::kerror!("(Slab) commit de slab early falhou em=", pages.as_ptr() as usize);
            panic!("failed to create area for early slab of cache {}", self.name);
        }
    }

    // -------------------------------------------------------------------------
    // Políticas
    // -------------------------------------------------------------------------

    /// Bootstrapping → Normal: todo slab early vira área no endereço exato
    pub fn commit_early_slabs(&self) {
        let mut inner = self.inner.lock();
        if inner.strategy != PageStrategy::Early {
            return;
        }

        let ids = inner.all_ids();
        for &id in &ids {
            self.commit_slab(inner.slab(id).pages());
        }
        inner.strategy = PageStrategy::Normal;

        crate::kinfo!("(Slab) Slabs early registrados como áreas=", ids.len());
    }

    /// Objetos livres abaixo dos quais nenhum slab vazio é solto
    pub fn set_minimum_reserve(&self, objects: usize) {
        self.inner.lock().min_object_reserve = objects;
    }

    /// Quantos slabs vazios podem ficar retidos
    pub fn set_pressure(&self, slabs: usize) {
        self.inner.lock().pressure = slabs;
    }

    /// Cresce até existirem pelo menos `objects` objetos livres
    pub fn reserve(&self, objects: usize, flags: AllocFlags) -> MmResult<()> {
        let mut inner = self.inner.lock();
        while inner.total_objects - inner.used_count < objects {
            inner = self.grow(inner, flags)?;
        }
        Ok(())
    }

    /// Reação a pouca memória: reclaimer, depot e slabs vazios
    pub fn low_memory(&self, level: LowMemoryLevel) {
        self.hooks.reclaim(level);

        let drained = self.depot.as_ref().map(ObjectDepot::drain);

        let mut inner = self.inner.lock();
        for object in drained.into_iter().flatten() {
            self.return_object(&mut inner, object);
        }

        let minimum_allowed = match level {
            LowMemoryLevel::Note => inner.pressure / 2 + 1,
            LowMemoryLevel::Warning => {
                inner.pressure /= 2;
                0
            }
            LowMemoryLevel::Critical => {
                inner.pressure = 0;
                0
            }
        };

        if inner.strategy == PageStrategy::Early {
            return;
        }

        let mut released = 0usize;
        while inner.empty_count > minimum_allowed {
            let Some(id) = inner.empty.head else { break };
            let per_slab = inner.slab(id).size();
            let free_objects = inner.total_objects - inner.used_count;
            if free_objects < inner.min_object_reserve + per_slab {
                break;
            }
            inner.list_remove(id);
            inner.empty_count -= 1;
            self.return_slab(&mut inner, id);
            released += 1;
        }

        crate::kdebug!("(Slab) low_memory soltou slabs=", released);
    }

    /// Destrói o cache. Fatal se ainda houver objetos em uso.
    pub fn destroy(self) {
        let drained = self.depot.as_ref().map(ObjectDepot::drain);

        let mut inner = self.inner.lock();
        for object in drained.into_iter().flatten() {
            self.return_object(&mut inner, object);
        }

        if inner.used_count != 0 {
            crate::kerror!("(Slab) destroy com objetos em uso=", inner.used_count);
            panic!(
                "object cache {}: destroyed with {} objects in use",
                self.name, inner.used_count
            );
        }

        for id in inner.all_ids() {
            inner.list_remove(id);
            self.return_slab(&mut inner, id);
        }
        inner.empty_count = 0;

        crate::kinfo!("(Slab) Cache destruído");
    }

    pub fn stats(&self) -> CacheStats {
        let depot = self.depot.as_ref().map(ObjectDepot::stats);
        let inner = self.inner.lock();
        CacheStats {
            object_size: self.object_size,
            slab_size: self.slab_size,
            total_objects: inner.total_objects,
            used_objects: inner.used_count,
            empty_slabs: inner.empty.len,
            partial_slabs: inner.partial.len,
            full_slabs: inner.full.len,
            usage: inner.usage,
            maximum: self.maximum,
            pressure: inner.pressure,
            min_object_reserve: inner.min_object_reserve,
            depot,
        }
    }

    /// Verifica todos os invariantes das listas (diagnóstico, O(objetos))
    pub fn check_invariants(&self) -> bool {
        let inner = self.inner.lock();
        if inner.used_count > inner.total_objects || inner.empty_count != inner.empty.len {
            return false;
        }

        let mut listed = 0;
        let mut total = 0;
        let mut used = 0;
        for state in [SlabState::Empty, SlabState::Partial, SlabState::Full] {
            let ids = inner.ids_in(state);
            if ids.len() != inner.list(state).len {
                return false;
            }
            for id in ids {
                let slab = inner.slab(id);
                let state_ok = match state {
                    SlabState::Empty => slab.is_empty(),
                    SlabState::Partial => !slab.is_empty() && !slab.is_full(),
                    SlabState::Full => slab.is_full(),
                };
                if slab.state != state || !state_ok || !slab.is_consistent() {
                    return false;
                }
                listed += 1;
                total += slab.size();
                used += slab.used();
            }
        }

        // Objetos parados no depot contam como usados nos slabs
        let live = inner.slabs.iter().filter(|slab| slab.is_some()).count();
        listed == live
            && listed == inner.by_base.len()
            && total == inner.total_objects
            && used == inner.used_count
    }
}

/// Um slab de 1 página para objetos pequenos; senão ~8 objetos por slab,
/// arredondado para uma potência de dois de páginas
fn default_slab_size(object_size: usize) -> usize {
    if object_size <= PAGE_SIZE / SMALL_OBJECT_DIVISOR {
        PAGE_SIZE
    } else {
        let pages = (object_size * LARGE_OBJECTS_PER_SLAB).div_ceil(PAGE_SIZE);
        pages.next_power_of_two() * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::alloc::pages::testing::leaked_source;
    use crate::mm::alloc::pages::KernelPageSource;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn plain_cache(
        config: ObjectCacheConfig,
        pages: usize,
    ) -> (ObjectCache, Arc<KernelPageSource>) {
        let source = leaked_source(pages * PAGE_SIZE, 0);
        let cache = ObjectCache::new(config.cpu_count(1), Arc::new(NoHooks), source.clone()).unwrap();
        (cache, source)
    }

    #[test]
    fn test_object_size_rounding() {
        let (cache, _) = plain_cache(ObjectCacheConfig::new("min", 1), 4);
        assert_eq!(cache.object_size(), size_of::<ObjectLink>());

        let (cache, _) = plain_cache(ObjectCacheConfig::new("align", 40).alignment(32), 4);
        assert_eq!(cache.object_size(), 64);
        assert!(!cache.has_depot());
        assert!(cache.flags().contains(CacheFlags::NO_DEPOT));
    }

    #[test]
    fn test_invalid_alignment() {
        let source = leaked_source(4 * PAGE_SIZE, 0);
        let config = ObjectCacheConfig::new("bad", 64).alignment(24).cpu_count(1);
        assert!(matches!(
            ObjectCache::new(config, Arc::new(NoHooks), source),
            Err(MmError::InvalidParameter)
        ));
    }

    #[test]
    fn test_default_slab_size() {
        assert_eq!(default_slab_size(64), PAGE_SIZE);
        assert_eq!(default_slab_size(512), PAGE_SIZE);
        // 8 * 1024 = 2 páginas
        assert_eq!(default_slab_size(1024), 2 * PAGE_SIZE);
        // 8 * 1536 = 3 páginas → 4
        assert_eq!(default_slab_size(1536), 4 * PAGE_SIZE);
    }

    #[test]
    fn test_sixty_five_objects_need_two_slabs() {
        let (cache, source) = plain_cache(ObjectCacheConfig::new("obj-64", 64), 32);
        cache.set_pressure(1);

        let mut objects = Vec::new();
        for _ in 0..64 {
            objects.push(cache.allocate(AllocFlags::empty()).unwrap());
        }
        let stats = cache.stats();
        assert_eq!(stats.total_objects, 64);
        assert_eq!(stats.full_slabs, 1);

        let first_slab = cache.object_slab(objects[0]).unwrap();
        assert_eq!(first_slab.size, 64);
        assert!(first_slab.color_offset < PAGE_SIZE - 64 * 64 + 1);

        objects.push(cache.allocate(AllocFlags::empty()).unwrap());
        let stats = cache.stats();
        assert_eq!(stats.total_objects, 128);
        assert_eq!(stats.used_objects, 65);
        assert_eq!(stats.partial_slabs, 1);
        assert_eq!(source.area_count(), 2);
        assert_ne!(cache.object_slab(objects[64]).unwrap().id, first_slab.id);
        assert!(cache.check_invariants());

        // Esvaziar o primeiro slab: fica retido (pressure = 1)
        for object in objects.drain(..64) {
            cache.free(object);
            assert!(cache.check_invariants());
        }
        let stats = cache.stats();
        assert_eq!(stats.empty_slabs, 1);
        assert_eq!(stats.used_objects, 1);
        assert_eq!(source.area_count(), 2);
    }

    #[test]
    fn test_empty_slab_released_without_pressure() {
        let (cache, source) = plain_cache(ObjectCacheConfig::new("obj-64", 64), 32);
        let objects: Vec<_> = (0..65).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();
        assert_eq!(source.area_count(), 2);

        for &object in &objects[..64] {
            cache.free(object);
        }
        let stats = cache.stats();
        assert_eq!(stats.empty_slabs, 0);
        assert_eq!(stats.total_objects, 64);
        assert_eq!(stats.usage, PAGE_SIZE);
        assert_eq!(source.area_count(), 1);
        assert!(cache.check_invariants());
    }

    #[test]
    fn test_minimum_reserve_respected_by_retention_and_reclaim() {
        let (cache, source) = plain_cache(ObjectCacheConfig::new("obj-64", 64), 32);
        cache.set_pressure(4);
        cache.set_minimum_reserve(63);
        let objects: Vec<_> = (0..65).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();

        for &object in &objects[..64] {
            cache.free(object);
        }
        // Sem o slab vazio ainda sobram 63 livres: pode ser retido
        assert_eq!(cache.stats().empty_slabs, 1);
        assert_eq!(source.area_count(), 2);

        // Soltar agora deixaria 63 livres (< 64)
        cache.set_minimum_reserve(64);
        cache.low_memory(LowMemoryLevel::Critical);
        assert_eq!(cache.stats().empty_slabs, 1);

        cache.set_minimum_reserve(0);
        cache.low_memory(LowMemoryLevel::Critical);
        assert_eq!(cache.stats().empty_slabs, 0);
        assert_eq!(source.area_count(), 1);
    }

    #[test]
    fn test_empty_slab_released_when_reserve_would_not_hold() {
        let (cache, source) = plain_cache(ObjectCacheConfig::new("obj-64", 64), 32);
        cache.set_pressure(4);
        cache.set_minimum_reserve(64);
        let objects: Vec<_> = (0..65).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();

        for &object in &objects[..64] {
            cache.free(object);
        }
        assert_eq!(cache.stats().empty_slabs, 0);
        assert_eq!(source.area_count(), 1);
        cache.free(objects[64]);
    }

    #[test]
    fn test_retention_bounded_by_pressure() {
        let (cache, source) = plain_cache(ObjectCacheConfig::new("obj-64", 64), 32);
        cache.set_minimum_reserve(10_000);
        let objects: Vec<_> = (0..320).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();
        assert_eq!(source.area_count(), 5);

        for &object in &objects {
            cache.free(object);
        }
        // pressure = 0: nenhum slab vazio fica, com ou sem reserva
        assert_eq!(cache.stats().empty_slabs, 0);
        assert_eq!(source.area_count(), 0);

        cache.set_pressure(2);
        let objects: Vec<_> = (0..320).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();
        cache.set_minimum_reserve(0);
        for &object in &objects {
            cache.free(object);
        }
        assert_eq!(cache.stats().empty_slabs, 2);
        assert_eq!(source.area_count(), 2);
    }

    #[test]
    fn test_allocate_free_roundtrip_restores_lists() {
        let (cache, _) = plain_cache(ObjectCacheConfig::new("rt", 128), 16);
        let keep: Vec<_> = (0..5).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();
        let before = cache.stats();
        let before_slab = cache.object_slab(keep[0]).unwrap();

        let object = cache.allocate(AllocFlags::empty()).unwrap();
        assert_eq!(cache.object_slab(object).unwrap().id, before_slab.id);
        cache.free(object);

        assert_eq!(cache.stats(), before);
        assert_eq!(cache.object_slab(keep[0]).unwrap(), before_slab);
    }

    #[test]
    fn test_color_offsets_advance_and_wrap() {
        // 96 bytes: 42 objetos por página, 64 bytes de sobra
        let (cache, _) = plain_cache(ObjectCacheConfig::new("cor", 96), 64);
        cache.set_pressure(usize::MAX);
        cache.reserve(42 * 11, AllocFlags::empty()).unwrap();

        // Depois de 64 o ciclo volta a zero: 0 aparece três vezes em 11 slabs
        let mut offsets: Vec<_> = cache.slabs().iter().map(|slab| slab.color_offset).collect();
        offsets.sort();
        assert_eq!(offsets, vec![0, 0, 0, 8, 16, 24, 32, 40, 48, 56, 64]);
        for offset in &offsets {
            assert!(*offset <= 64);
            assert_eq!(offset % CACHE_COLOR_PERIOD, 0);
        }
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let (cache, _) = plain_cache(ObjectCacheConfig::new("df", 64), 8);
        let keep = cache.allocate(AllocFlags::empty()).unwrap();
        let object = cache.allocate(AllocFlags::empty()).unwrap();
        cache.free(object);
        let _ = keep;
        cache.free(object);
    }

    #[test]
    #[should_panic(expected = "has no slab")]
    fn test_free_unknown_object_is_fatal() {
        let (cache, _) = plain_cache(ObjectCacheConfig::new("unknown", 64), 8);
        let mut local = 0u64;
        cache.free(NonNull::from(&mut local).cast());
    }

    #[test]
    fn test_quota_exceeded() {
        let (cache, source) =
            plain_cache(ObjectCacheConfig::new("quota", 64).maximum(2 * PAGE_SIZE), 16);
        let objects: Vec<_> = (0..128).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();
        assert_eq!(cache.allocate(AllocFlags::empty()), Err(MmError::QuotaExceeded));
        assert_eq!(cache.stats().usage, 2 * PAGE_SIZE);
        assert_eq!(source.area_count(), 2);
        assert_eq!(objects.len(), 128);
    }

    #[test]
    fn test_out_of_memory_leaves_no_slab() {
        let (cache, _) = plain_cache(ObjectCacheConfig::new("oom", 64).slab_size(16 * PAGE_SIZE), 8);
        assert_eq!(
            cache.allocate(AllocFlags::DONT_WAIT_FOR_MEMORY),
            Err(MmError::OutOfMemory)
        );
        let stats = cache.stats();
        assert_eq!(stats.usage, 0);
        assert_eq!(stats.total_objects, 0);
        assert!(cache.check_invariants());
    }

    struct CountingHooks {
        fail_after: usize,
        prepared: AtomicUsize,
        constructed: AtomicUsize,
        destructed: AtomicUsize,
        unprepared: AtomicUsize,
        reclaims: AtomicUsize,
    }

    impl CountingHooks {
        fn new(fail_after: usize) -> Self {
            Self {
                fail_after,
                prepared: AtomicUsize::new(0),
                constructed: AtomicUsize::new(0),
                destructed: AtomicUsize::new(0),
                unprepared: AtomicUsize::new(0),
                reclaims: AtomicUsize::new(0),
            }
        }
    }

    impl ObjectHooks for CountingHooks {
        fn prepare(&self, _object: NonNull<u8>) -> MmResult<()> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn construct(&self, object: NonNull<u8>) -> MmResult<()> {
            if self.constructed.load(Ordering::SeqCst) == self.fail_after {
                return Err(MmError::OutOfMemory);
            }
            // SAFETY: objeto pertence ao slab em construção
            unsafe { object.as_ptr().write(0xA5) };
            self.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destruct(&self, _object: NonNull<u8>) {
            self.destructed.fetch_add(1, Ordering::SeqCst);
        }

        fn unprepare(&self, _object: NonNull<u8>) {
            self.unprepared.fetch_add(1, Ordering::SeqCst);
        }

        fn reclaim(&self, _level: LowMemoryLevel) {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_constructor_failure_unwinds_slab() {
        let hooks = Arc::new(CountingHooks::new(10));
        let source = leaked_source(8 * PAGE_SIZE, 0);
        let cache = ObjectCache::new(
            ObjectCacheConfig::new("ctor", 64).cpu_count(1),
            hooks.clone(),
            source.clone(),
        )
        .unwrap();

        assert_eq!(cache.allocate(AllocFlags::empty()), Err(MmError::OutOfMemory));
        assert_eq!(hooks.prepared.load(Ordering::SeqCst), 11);
        assert_eq!(hooks.destructed.load(Ordering::SeqCst), 10);
        assert_eq!(hooks.unprepared.load(Ordering::SeqCst), 11);
        assert_eq!(source.area_count(), 0);
        assert_eq!(cache.stats().total_objects, 0);
        assert_eq!(cache.stats().usage, 0);
    }

    #[test]
    fn test_destroy_runs_destructors() {
        let hooks = Arc::new(CountingHooks::new(usize::MAX));
        let source = leaked_source(8 * PAGE_SIZE, 0);
        let cache = ObjectCache::new(
            ObjectCacheConfig::new("dtor", 64).cpu_count(1),
            hooks.clone(),
            source.clone(),
        )
        .unwrap();
        cache.set_pressure(4);

        let object = cache.allocate(AllocFlags::empty()).unwrap();
        // SAFETY: objeto construído pelo hook
        assert_eq!(unsafe { object.as_ptr().read() }, 0xA5);
        cache.free(object);
        assert_eq!(cache.stats().empty_slabs, 1);

        cache.low_memory(LowMemoryLevel::Note);
        assert_eq!(hooks.reclaims.load(Ordering::SeqCst), 1);

        cache.destroy();
        assert_eq!(hooks.destructed.load(Ordering::SeqCst), 64);
        assert_eq!(source.area_count(), 0);
    }

    #[test]
    #[should_panic(expected = "objects in use")]
    fn test_destroy_with_live_objects_is_fatal() {
        let (cache, _) = plain_cache(ObjectCacheConfig::new("live", 64), 8);
        let _object = cache.allocate(AllocFlags::empty()).unwrap();
        cache.destroy();
    }

    #[test]
    fn test_early_slabs_committed_once() {
        let source = leaked_source(16 * PAGE_SIZE, 16 * PAGE_SIZE);
        let cache = ObjectCache::new(
            ObjectCacheConfig::new("boot", 256)
                .flags(CacheFlags::DURING_BOOT)
                .cpu_count(1),
            Arc::new(NoHooks),
            source.clone(),
        )
        .unwrap();
        assert_eq!(cache.strategy(), PageStrategy::Early);

        let objects: Vec<_> = (0..20).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();
        assert_eq!(source.area_count(), 0);
        let early_used = source.early_used();
        assert!(early_used >= 2 * PAGE_SIZE);

        source.finish_boot();
        cache.commit_early_slabs();
        cache.commit_early_slabs();
        assert_eq!(cache.strategy(), PageStrategy::Normal);
        assert_eq!(source.area_count(), 2);

        // Agora liberar slabs é permitido (bytes early ficam encalhados)
        for object in objects {
            cache.free(object);
        }
        assert_eq!(source.area_count(), 0);
        assert_eq!(source.stranded_bytes(), 2 * PAGE_SIZE);

        // Novos slabs vêm da arena
        let _object = cache.allocate(AllocFlags::empty()).unwrap();
        assert_eq!(source.area_count(), 1);
        assert_eq!(source.early_used(), early_used);
    }

    #[test]
    #[should_panic(expected = "memory pressure on bootup")]
    fn test_early_free_pages_is_fatal() {
        let source = leaked_source(0, 8 * PAGE_SIZE);
        let cache = ObjectCache::new(
            ObjectCacheConfig::new("boot", 64)
                .flags(CacheFlags::DURING_BOOT)
                .cpu_count(1),
            Arc::new(NoHooks),
            source,
        )
        .unwrap();
        let object = cache.allocate(AllocFlags::empty()).unwrap();
        cache.free(object);
    }

    #[test]
    fn test_depot_front_end() {
        let source = leaked_source(32 * PAGE_SIZE, 0);
        let cache = ObjectCache::new(
            ObjectCacheConfig::new("smp", 64)
                .cpu_count(4)
                .magazine_capacity(4)
                .max_magazines(1),
            Arc::new(NoHooks),
            source,
        )
        .unwrap();
        assert!(cache.has_depot());

        let objects: Vec<_> = (0..20).map(|_| cache.allocate(AllocFlags::empty()).unwrap()).collect();
        for &object in &objects {
            cache.free(object);
        }

        // 4 loaded + 4 previous + 4 no depot = 12 retidos, 8 despejados
        let stats = cache.stats();
        assert_eq!(stats.depot.unwrap().cached_objects, 12);
        assert_eq!(stats.used_objects, 12);
        assert!(cache.check_invariants());

        // Reaproveita o que está no depot sem tocar nos slabs
        let again = cache.allocate(AllocFlags::empty()).unwrap();
        assert!(objects.contains(&again));
        assert_eq!(cache.stats().used_objects, 12);
        cache.free(again);

        cache.low_memory(LowMemoryLevel::Critical);
        let stats = cache.stats();
        assert_eq!(stats.used_objects, 0);
        assert_eq!(stats.depot.unwrap().cached_objects, 0);
        assert!(cache.check_invariants());
    }

    #[test]
    fn test_depot_invalid_magazines_fail_creation() {
        let source = leaked_source(4 * PAGE_SIZE, 0);
        let config = ObjectCacheConfig::new("smp", 64).cpu_count(2).magazine_capacity(0);
        assert!(matches!(
            ObjectCache::new(config, Arc::new(NoHooks), source),
            Err(MmError::DepotInitFailed)
        ));
    }

    #[test]
    fn test_random_sequence_keeps_invariants() {
        let (cache, _) = plain_cache(ObjectCacheConfig::new("rand", 200), 128);
        cache.set_pressure(2);

        let mut live: Vec<(NonNull<u8>, SlabId)> = Vec::new();
        let mut seed = 0x2545_f491u64;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            if (seed >> 33) % 3 != 0 || live.is_empty() {
                let object = cache.allocate(AllocFlags::empty()).unwrap();
                let id = cache.object_slab(object).unwrap().id;
                live.push((object, id));
            } else {
                let index = (seed >> 40) as usize % live.len();
                let (object, _) = live.swap_remove(index);
                cache.free(object);
            }

            let stats = cache.stats();
            assert!(stats.used_objects <= stats.total_objects);
            assert_eq!(stats.used_objects, live.len());
        }

        for &(object, id) in &live {
            assert_eq!(cache.object_slab(object).unwrap().id, id);
        }
        assert!(cache.check_invariants());
    }

    #[test]
    fn test_concurrent_allocate_free() {
        let source = leaked_source(256 * PAGE_SIZE, 0);
        let cache = Arc::new(
            ObjectCache::new(
                ObjectCacheConfig::new("mt", 128).cpu_count(1),
                Arc::new(NoHooks),
                source,
            )
            .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let batch: Vec<usize> = (0..16)
                        .map(|_| cache.allocate(AllocFlags::empty()).unwrap().as_ptr() as usize)
                        .collect();
                    for addr in batch {
                        cache.free(NonNull::new(addr as *mut u8).unwrap());
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.stats().used_objects, 0);
        assert!(cache.check_invariants());
    }
}

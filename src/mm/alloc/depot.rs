//! # Object Depot (magazines per-CPU)
//!
//! Front-end opcional do `ObjectCache` para sistemas com mais de uma CPU.
//!
//! ## 🏗️ Arquitetura
//!
//! Cada CPU mantém dois magazines (pilhas LIFO de objetos livres):
//! `loaded` (em uso) e `previous` (reserva). O depot global guarda até
//! `max_magazines` magazines cheios.
//!
//! 1. pop()  → loaded → troca com previous → pega magazine cheio do depot
//! 2. push() → loaded → troca com previous → manda loaded cheio ao depot
//! 3. Depot no limite → o magazine cheio é despejado de volta ao cache
//!
//! Objetos parados no depot continuam contados como "usados" no cache.
//! O lock por CPU é sempre adquirido antes do lock do depot global.

use alloc::vec::Vec;
use core::mem;
use core::ptr::NonNull;

use crate::arch::{Cpu, CpuOps};
use crate::mm::config::MAX_CPUS;
use crate::mm::error::{MmError, MmResult};
use crate::sync::Spinlock;

/// Pilha LIFO de objetos livres com capacidade fixa
pub struct Magazine {
    rounds: Vec<NonNull<u8>>,
    capacity: usize,
}

// SAFETY: ponteiros são objetos livres, acessados só sob o lock do dono
unsafe impl Send for Magazine {}

impl Magazine {
    fn new(capacity: usize) -> Self {
        Self {
            rounds: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    fn pop(&mut self) -> Option<NonNull<u8>> {
        self.rounds.pop()
    }

    #[inline]
    fn push(&mut self, object: NonNull<u8>) -> bool {
        if self.rounds.len() < self.capacity {
            self.rounds.push(object);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rounds.len() == self.capacity
    }

    /// Esvazia o magazine entregando os objetos
    pub fn drain(&mut self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.rounds.drain(..)
    }
}

/// Magazines de uma CPU
struct CpuStore {
    loaded: Magazine,
    previous: Magazine,
    hits: u64,
    misses: u64,
}

impl CpuStore {
    fn new(capacity: usize) -> Self {
        Self {
            loaded: Magazine::new(capacity),
            previous: Magazine::new(capacity),
            hits: 0,
            misses: 0,
        }
    }
}

/// Estatísticas do depot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepotStats {
    /// Objetos parados nos magazines per-CPU e no depot global
    pub cached_objects: usize,
    /// Magazines cheios no depot global
    pub full_magazines: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ObjectDepot {
    stores: Vec<Spinlock<CpuStore>>,
    full: Spinlock<Vec<Magazine>>,
    capacity: usize,
    max_magazines: usize,
}

impl ObjectDepot {
    /// Cria depot para `cpu_count` CPUs.
    ///
    /// Falha com `DepotInitFailed` para parâmetros de magazine inválidos.
    pub fn new(cpu_count: usize, capacity: usize, max_magazines: usize) -> MmResult<Self> {
        if cpu_count == 0 || cpu_count > MAX_CPUS || capacity == 0 || max_magazines == 0 {
            crate::kwarn!("(Depot) Parâmetros inválidos, capacidade=", capacity);
            return Err(MmError::DepotInitFailed);
        }

        let mut stores = Vec::new();
        stores
            .try_reserve_exact(cpu_count)
            .map_err(|_| MmError::DepotInitFailed)?;
        for _ in 0..cpu_count {
            stores.push(Spinlock::new(CpuStore::new(capacity)));
        }

        crate::kdebug!("(Depot) Criado para CPUs=", cpu_count);
        Ok(Self {
            stores,
            full: Spinlock::new(Vec::new()),
            capacity,
            max_magazines,
        })
    }

    #[inline]
    fn local_store(&self) -> &Spinlock<CpuStore> {
        let cpu = Cpu::current_core_id() as usize % self.stores.len();
        &self.stores[cpu]
    }

    /// Tenta obter um objeto livre sem passar pelo cache
    pub fn pop(&self) -> Option<NonNull<u8>> {
        let mut store = self.local_store().lock();
        loop {
            if let Some(object) = store.loaded.pop() {
                store.hits += 1;
                return Some(object);
            }

            if !store.previous.is_empty() {
                let store = &mut *store;
                mem::swap(&mut store.loaded, &mut store.previous);
                continue;
            }

            // loaded e previous vazios: trocar loaded por um magazine cheio
            match self.full.lock().pop() {
                Some(magazine) => store.loaded = magazine,
                None => {
                    store.misses += 1;
                    return None;
                }
            }
        }
    }

    /// Guarda um objeto livre.
    ///
    /// Com o depot global no limite, devolve um magazine cheio que o chamador
    /// precisa esvaziar de volta nos slabs.
    pub fn push(&self, object: NonNull<u8>) -> Option<Magazine> {
        let mut store = self.local_store().lock();

        if store.loaded.push(object) {
            return None;
        }

        if !store.previous.is_full() {
            let store = &mut *store;
            mem::swap(&mut store.loaded, &mut store.previous);
            // previous não estava cheio, agora é o loaded
            let _ = store.loaded.push(object);
            return None;
        }

        // loaded e previous cheios: loaded vai para o depot global
        let spilled = mem::replace(&mut store.loaded, Magazine::new(self.capacity));
        let _ = store.loaded.push(object);

        let mut full = self.full.lock();
        if full.len() < self.max_magazines {
            full.push(spilled);
            None
        } else {
            crate::ktrace!("(Depot) Depot cheio, despejando objetos=", spilled.len());
            Some(spilled)
        }
    }

    /// Esvazia tudo (todas as CPUs + depot global)
    pub fn drain(&self) -> Vec<NonNull<u8>> {
        let mut objects = Vec::new();
        for store in &self.stores {
            let mut store = store.lock();
            objects.extend(store.loaded.drain());
            objects.extend(store.previous.drain());
        }
        for mut magazine in self.full.lock().drain(..) {
            objects.extend(magazine.drain());
        }
        crate::kdebug!("(Depot) Drenado, objetos=", objects.len());
        objects
    }

    pub fn stats(&self) -> DepotStats {
        let mut stats = DepotStats::default();
        for store in &self.stores {
            let store = store.lock();
            stats.cached_objects += store.loaded.len() + store.previous.len();
            stats.hits += store.hits;
            stats.misses += store.misses;
        }
        let full = self.full.lock();
        stats.full_magazines = full.len();
        stats.cached_objects += full.iter().map(Magazine::len).sum::<usize>();
        stats
    }
}

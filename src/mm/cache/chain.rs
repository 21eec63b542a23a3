//! # Cadeias de Caches (consumers e merge)
//!
//! Quando um cache sem áreas fica com um único consumer, ele não serve para
//! mais nada além de guardar páginas para esse consumer. Nesse caso o cache
//! é colapsado: o consumer herda as páginas que ele ainda não sombreia e
//! passa a apontar direto para o source do cache.
//!
//! ```text
//!   antes                  depois
//!   Base                   Base
//!    ^                      ^
//!    S    (0 áreas)  ==>    A    (páginas de S não sombreadas)
//!    ^
//!    A
//! ```
//!
//! O merge solta o lock do cache para travar consumer → cache (ordem de
//! cima para baixo), então tudo é revalidado antes de mexer em qualquer
//! coisa. O cache fica `busy` nessa janela.
//!
//! O desligamento parte sempre do consumer (`detach_source`): quem troca o
//! `source` de um cache precisa do lock dele, então o consumer nunca desliga
//! um source que já não é o seu.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::page::{CacheId, PageState};
use super::vm_cache::{Unlink, VmCacheRef};

impl VmCacheRef {
    /// Faz `consumer` enxergar este cache como source.
    ///
    /// Trava este cache e depois o consumer; pega uma referência neste cache.
    pub fn add_consumer(self: &Arc<Self>, consumer: &Arc<VmCacheRef>) {
        let mut source = self.lock();
        let mut upper = consumer.lock();
        source.add_consumer_locked(&mut upper);
        crate::ktrace!("(VmCache) Consumer ligado ao source=", self.id());
    }

    /// Desliga este cache do seu source, tenta colapsar o source no consumer
    /// que sobrar e solta a referência que este cache segurava lá.
    ///
    /// O source é lido e limpo sob o lock deste cache: se um colapso
    /// concorrente já repontou o source, é o source novo que perde o
    /// consumer. Retorna o id do source desligado, ou `None` se não havia.
    pub fn detach_source(&self) -> Option<CacheId> {
        let source = self.inner.lock().cache.source.take()?;
        let source_id = source.id();

        // A referência que este cache tinha no source é solta em unlink_consumer
        let mut work = Vec::new();
        source.unlink_consumer(self.id(), &mut work);
        drop(source);
        Self::run_unlinks(work);
        Some(source_id)
    }

    /// Tira `consumer` da lista, avalia o colapso e solta a referência que
    /// ele segurava neste cache.
    pub(super) fn unlink_consumer(&self, consumer: CacheId, work: &mut Vec<Unlink>) {
        let candidate = {
            let mut state = self.inner.lock();
            let before = state.cache.consumers.len();
            state.cache.consumers.retain(|(id, _)| *id != consumer);
            if state.cache.consumers.len() == before {
                crate::kerror!("(VmCache) Consumer desconhecido id=", consumer);
                panic!("vm cache {}: {} is not a consumer", self.id(), consumer);
            }

            let collapsible = state.areas.is_empty()
                && state.cache.source.is_some()
                && state.cache.consumers.len() == 1;

            // A referência só vale se o contador ainda não chegou a zero
            let candidate = if collapsible {
                state.cache.consumers[0]
                    .1
                    .upgrade()
                    .filter(|upper| upper.try_acquire_ref())
            } else {
                None
            };

            if candidate.is_some() {
                state.cache.busy = true;
            }
            candidate
        };

        if let Some(upper) = candidate {
            self.merge_into(&upper);
            if upper.drop_ref() {
                upper.teardown(work);
            }
        }

        if self.drop_ref() {
            self.teardown(work);
        }
    }

    /// Colapsa este cache em `upper`, se tudo ainda bater sob os dois locks
    fn merge_into(&self, upper: &Arc<VmCacheRef>) {
        let mut upper_state = upper.inner.lock();
        let mut state = self.inner.lock();

        let still_valid = state.areas.is_empty()
            && state.cache.source.is_some()
            && state.cache.consumers.len() == 1
            && state.cache.consumers[0].0 == upper.id()
            && upper_state.cache.source.as_ref().map(|source| source.id()) == Some(self.id());

        if !still_valid {
            crate::kdebug!("(VmCache) Merge abortado na revalidação, cache=", self.id());
            state.cache.busy = false;
            return;
        }

        state.cache.consumers.clear();

        // Páginas não sombreadas sobem; as sombreadas morrem com este cache
        let indexes: Vec<u64> = state.cache.pages.keys().copied().collect();
        let mut moved = 0u64;
        for index in indexes {
            match upper_state.cache.pages.get(&index) {
                None => {
                    if let Some(page) = state.cache.pages.remove(&index) {
                        self.system.table_move(self.id(), upper.id(), index);
                        page.set_owner(upper.id(), index);
                        upper_state.cache.pages.insert(index, page);
                        moved += 1;
                    }
                }
                Some(shadow) => {
                    let shadowed = &state.cache.pages[&index];
                    if shadow.state() != PageState::Busy && shadowed.is_mapped_or_wired() {
                        crate::kerror!("(VmCache) Página sombreada ainda mapeada, ppn=", shadowed.physical_page_number());
                        panic!(
                            "vm cache {}: page {:#x} has still mappings",
                            self.id(),
                            shadowed.physical_page_number()
                        );
                    }
                }
            }
        }

        // A referência que este cache tinha no source passa para o consumer
        if let Some(new_source) = state.cache.source.take() {
            {
                let mut lower = new_source.inner.lock();
                match lower
                    .cache
                    .consumers
                    .iter_mut()
                    .find(|(id, _)| *id == self.id())
                {
                    Some(entry) => *entry = (upper.id(), Arc::downgrade(upper)),
                    None => {
                        crate::kerror!("(VmCache) Source não conhece o cache id=", self.id());
                        panic!("vm cache {}: missing from consumers of {}", self.id(), new_source.id());
                    }
                }
            }
            upper_state.cache.source = Some(new_source);
        }

        drop(state);
        drop(upper_state);

        // Ainda resta a referência do consumer que está saindo
        if self.ref_count() < 2 {
            crate::kerror!("(VmCache) Cache colapsado com poucas referências, id=", self.id());
            panic!("vm cache {}: collapsed with ref_count {}", self.id(), self.ref_count());
        }
        if self.drop_ref() {
            panic!("vm cache {}: collapsed cache lost its last reference", self.id());
        }

        self.system.note_collapse(moved);
        crate::kdebug!("(VmCache) Cache colapsado, páginas movidas=", moved);
    }
}

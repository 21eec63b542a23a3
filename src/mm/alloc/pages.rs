//! # Fonte de Páginas dos Slabs
//!
//! Entrega blocos de `slab_size` bytes para os `ObjectCache`s.
//!
//! Dois caminhos:
//! - **Normal**: cria uma "área" do kernel (bloco da arena `linked_list_allocator`)
//!   e a registra. Liberar um bloco que não é área conhecida é fatal.
//! - **Early**: corta da reserva de boot (`BumpAllocator`). Só válido antes de
//!   `finish_boot()`. Os blocos early viram áreas em `commit_early`.
//!
//! A arena e a tabela de áreas ficam atrás de `Spinlock` (seções curtas).
//!
//! Com a arena cheia, um pedido sem `DONT_WAIT_FOR_MEMORY` espera: chama o
//! handler de pouca memória (que pode soltar áreas) e tenta de novo, até
//! `AREA_ALLOCATION_RETRIES` vezes. Nenhum lock da fonte fica seguro
//! durante o handler.

use alloc::collections::BTreeMap;
use alloc::string::String;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use linked_list_allocator::Heap;
use spin::Once;

use super::bump::BumpAllocator;
use super::flags::AllocFlags;
use crate::arch::{Cpu, CpuOps};
use crate::mm::config::{AREA_ALLOCATION_RETRIES, CACHE_NAME_MAX, PAGE_SIZE};
use crate::mm::error::{MmError, MmResult};
use crate::sync::Spinlock;

/// Fornecedor de blocos de páginas para slabs
pub trait SlabPageSource: Send + Sync {
    /// Cria uma área de `size` bytes alinhada a `align` (caminho normal).
    ///
    /// Sem `DONT_WAIT_FOR_MEMORY` pode esperar por memória antes de falhar.
    fn allocate_area(
        &self,
        name: &str,
        size: usize,
        align: usize,
        flags: AllocFlags,
    ) -> MmResult<NonNull<u8>>;

    /// Remove uma área criada por `allocate_area` ou `commit_early`.
    ///
    /// Fatal se `base` não for uma área conhecida.
    fn free_area(&self, base: NonNull<u8>, size: usize);

    /// Corta um bloco da reserva de boot. Fatal depois do boot.
    fn allocate_early(&self, size: usize, align: usize) -> MmResult<NonNull<u8>>;

    /// Registra um bloco early como área no endereço exato
    fn commit_early(&self, name: &str, base: NonNull<u8>, size: usize) -> MmResult<()>;

    /// O boot terminou? (caminho early proibido)
    fn boot_completed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AreaKind {
    /// Bloco da arena, devolvido a ela na remoção
    Arena { align: usize },
    /// Bloco da reserva de boot, não reaproveitável
    Committed,
}

struct AreaRecord {
    name: String,
    size: usize,
    kind: AreaKind,
}

/// Fonte de páginas do kernel: arena de áreas + reserva de boot
pub struct KernelPageSource {
    arena: Spinlock<Heap>,
    early: Spinlock<BumpAllocator>,
    areas: Spinlock<BTreeMap<usize, AreaRecord>>,
    boot_done: AtomicBool,
    /// Bytes early removidos como área (não voltam para lugar nenhum)
    stranded: AtomicUsize,
    /// Chamado com o tamanho pedido quando a arena não tem espaço
    low_memory_handler: Once<fn(usize)>,
}

impl KernelPageSource {
    /// Cria a fonte sobre uma arena e uma reserva de boot.
    ///
    /// # Safety
    ///
    /// As duas regiões devem estar mapeadas, ser graváveis, não se sobrepor e
    /// pertencer exclusivamente a esta fonte pelo resto da vida do kernel.
    pub unsafe fn new(
        arena_start: *mut u8,
        arena_size: usize,
        early_start: usize,
        early_size: usize,
    ) -> Self {
        let mut heap = Heap::empty();
        if !arena_start.is_null() && arena_size > 0 {
            heap.init(arena_start, arena_size);
        }

        let mut early = BumpAllocator::new();
        early.init(early_start, early_size);

        crate::kinfo!("(Slab) Fonte de páginas: arena=", arena_size);
        crate::kinfo!("(Slab) Fonte de páginas: reserva de boot=", early_size);

        Self {
            arena: Spinlock::new(heap),
            early: Spinlock::new(early),
            areas: Spinlock::new(BTreeMap::new()),
            boot_done: AtomicBool::new(false),
            stranded: AtomicUsize::new(0),
            low_memory_handler: Once::new(),
        }
    }

    /// Instala o handler de pouca memória. `false` se já havia um.
    pub fn set_low_memory_handler(&self, handler: fn(usize)) -> bool {
        let mut installed = false;
        self.low_memory_handler.call_once(|| {
            installed = true;
            handler
        });
        installed
    }

    /// Fim do boot: a reserva early fica fechada
    pub fn finish_boot(&self) {
        if !self.boot_done.swap(true, Ordering::AcqRel) {
            let early = self.early.lock();
            crate::kinfo!("(Slab) Boot concluído, reserva usada=", early.used());
        }
    }

    /// Número de áreas registradas
    pub fn area_count(&self) -> usize {
        self.areas.lock().len()
    }

    /// A área começa em `base`?
    pub fn is_area(&self, base: usize) -> bool {
        self.areas.lock().contains_key(&base)
    }

    /// Bytes em uso na arena
    pub fn arena_used(&self) -> usize {
        self.arena.lock().used()
    }

    /// Bytes entregues pela reserva de boot
    pub fn early_used(&self) -> usize {
        self.early.lock().used()
    }

    /// Bytes early que foram removidos como área e não têm como voltar
    pub fn stranded_bytes(&self) -> usize {
        self.stranded.load(Ordering::Relaxed)
    }

    fn record_area(&self, name: &str, base: usize, size: usize, kind: AreaKind) -> MmResult<()> {
        let mut areas = self.areas.lock();
        if areas.contains_key(&base) {
            return Err(MmError::InvalidParameter);
        }
        areas.insert(
            base,
            AreaRecord {
                name: truncated_name(name),
                size,
                kind,
            },
        );
        Ok(())
    }
}

impl SlabPageSource for KernelPageSource {
    fn allocate_area(
        &self,
        name: &str,
        size: usize,
        align: usize,
        flags: AllocFlags,
    ) -> MmResult<NonNull<u8>> {
        let align = align.max(PAGE_SIZE);
        let layout = Layout::from_size_align(size, align).map_err(|_| MmError::InvalidParameter)?;

        let mut retries = 0;
        let block = loop {
            if let Ok(block) = self.arena.lock().allocate_first_fit(layout) {
                break block;
            }

            if flags.contains(AllocFlags::DONT_WAIT_FOR_MEMORY) {
                crate::ktrace!("(Slab) Arena cheia, pedido sem espera de ", size);
                return Err(MmError::OutOfMemory);
            }
            if retries == AREA_ALLOCATION_RETRIES {
                crate::kwarn!("(Slab) Arena sem espaço para área de ", size);
                return Err(MmError::OutOfMemory);
            }
            retries += 1;

            match self.low_memory_handler.get() {
                Some(handler) => handler(size),
                None => Cpu::relax(),
            }
        };

        if let Err(err) = self.record_area(name, block.as_ptr() as usize, size, AreaKind::Arena { align }) {
            // SAFETY: bloco acabou de sair da arena com este layout
            unsafe { self.arena.lock().deallocate(block, layout) };
            return Err(err);
        }

        crate::ktrace!("(Slab) Área criada em=", block.as_ptr() as usize);
        Ok(block)
    }

    fn free_area(&self, base: NonNull<u8>, size: usize) {
        let addr = base.as_ptr() as usize;
        let record = match self.areas.lock().remove(&addr) {
            Some(record) => record,
            None => {
                crate::kerror!("(Slab) free_area: área desconhecida em=", addr);
                panic!("object cache: freeing unknown area {:#x}", addr);
            }
        };

        if record.size != size {
            crate::kerror!("(Slab) free_area: tamanho divergente, registrado=", record.size);
            panic!(
                "object cache: area {:#x} ({}) freed with size {} instead of {}",
                addr, record.name, size, record.size
            );
        }

        match record.kind {
            AreaKind::Arena { align } => {
                // Layout já foi validado na criação
                if let Ok(layout) = Layout::from_size_align(size, align) {
                    // SAFETY: área registrada veio da arena com este layout
                    unsafe { self.arena.lock().deallocate(base, layout) };
                }
            }
            AreaKind::Committed => {
                self.stranded.fetch_add(size, Ordering::Relaxed);
            }
        }

        crate::ktrace!("(Slab) Área removida em=", addr);
    }

    fn allocate_early(&self, size: usize, align: usize) -> MmResult<NonNull<u8>> {
        if self.boot_completed() {
            crate::kerror!("(Slab) allocate_early depois do boot, tamanho=", size);
            panic!("early slab allocation of {} bytes after boot", size);
        }

        match self.early.lock().alloc(size, align) {
            Some(block) => {
                crate::ktrace!("(Slab) Bloco early em=", block.as_ptr() as usize);
                Ok(block)
            }
            None => {
                crate::kwarn!("(Slab) Reserva de boot esgotada, pedido=", size);
                Err(MmError::OutOfMemory)
            }
        }
    }

    fn commit_early(&self, name: &str, base: NonNull<u8>, size: usize) -> MmResult<()> {
        let addr = base.as_ptr() as usize;
        if !self.early.lock().contains(addr) {
            return Err(MmError::InvalidParameter);
        }
        self.record_area(name, addr, size, AreaKind::Committed)
    }

    fn boot_completed(&self) -> bool {
        self.boot_done.load(Ordering::Acquire)
    }
}

/// Corta o nome em `CACHE_NAME_MAX` bytes sem partir um caractere
pub fn truncated_name(name: &str) -> String {
    let mut end = name.len().min(CACHE_NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec;

    /// Fonte cuja arena é exatamente `pages` páginas alinhadas
    pub fn aligned_source(pages: usize) -> Arc<KernelPageSource> {
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
        // SAFETY: layout com tamanho não nulo; o bloco nunca é devolvido
        let arena = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!arena.is_null());
        let early = vec![0u8; 0].leak();
        // SAFETY: bloco exclusivo desta fonte, vivo até o fim do processo
        let source = unsafe {
            KernelPageSource::new(arena, pages * PAGE_SIZE, early.as_mut_ptr() as usize, 0)
        };
        Arc::new(source)
    }

    /// Fonte com arena e reserva vindas do heap do host (vazadas de propósito)
    pub fn leaked_source(arena_size: usize, early_size: usize) -> Arc<KernelPageSource> {
        let arena = vec![0u8; arena_size].leak();
        let early = vec![0u8; early_size].leak();
        // SAFETY: regiões vazadas, exclusivas e vivas até o fim do processo
        let source = unsafe {
            KernelPageSource::new(
                arena.as_mut_ptr(),
                arena.len(),
                early.as_mut_ptr() as usize,
                early.len(),
            )
        };
        Arc::new(source)
    }
}

//! # Slab
//!
//! Um bloco contíguo de páginas fatiado em N objetos do mesmo tamanho.
//!
//! ```text
//! pages                                                    pages + slab_size
//! |<- cor ->|  obj 0  |  obj 1  |  ...  |  obj N-1  |<- sobra ->|
//!                  ^ link da free list na última palavra de cada objeto livre
//! ```
//!
//! - A free list é intrusiva: cada objeto livre guarda, na sua última palavra,
//!   o endereço do próximo objeto livre (0 = fim).
//! - Um bitmap (1 bit por objeto, 1 = alocado) detecta double free e ponteiros
//!   que não são início de objeto. Ambos são fatais.
//! - O slab não conhece listas: o `ObjectCache` o encadeia por índice
//!   (`SlabId`) numa das listas empty/partial/full.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::klib::Bitmap;

/// Palavra de ligação da free list
pub type ObjectLink = usize;

/// Índice do slab na arena do cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlabId(pub(crate) u32);

/// Lista do cache em que o slab está
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabState {
    Empty,
    Partial,
    Full,
}

/// Ligações intrusivas (por índice) da lista atual
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SlabLink {
    pub prev: Option<SlabId>,
    pub next: Option<SlabId>,
}

pub struct Slab {
    /// Início do bloco de páginas
    pages: NonNull<u8>,
    /// Tamanho do bloco em bytes
    byte_count: usize,
    object_size: usize,
    /// Total de objetos
    size: usize,
    /// Objetos livres
    count: usize,
    /// Offset de cor do primeiro objeto
    offset: usize,
    /// Cabeça da free list
    free: Option<NonNull<u8>>,
    allocated: Bitmap,
    pub(crate) state: SlabState,
    pub(crate) link: SlabLink,
}

// SAFETY: o slab só é tocado sob o mutex do ObjectCache dono
unsafe impl Send for Slab {}

/// Resultado de validar um ponteiro contra o slab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectCheck {
    Valid(usize),
    /// Dentro do bloco mas fora da área de objetos
    OutOfRange,
    /// Não cai no início de um objeto
    Misaligned,
}

impl Slab {
    /// Monta o slab sobre `pages` sem construir nada ainda.
    ///
    /// `offset` já deve caber na sobra (`byte_count - size * object_size`).
    pub(crate) fn new(pages: NonNull<u8>, byte_count: usize, object_size: usize, offset: usize) -> Self {
        let size = byte_count / object_size;
        debug_assert!(object_size >= size_of::<ObjectLink>());
        debug_assert!(offset <= byte_count - size * object_size);
        Self {
            pages,
            byte_count,
            object_size,
            size,
            count: 0,
            offset,
            free: None,
            allocated: Bitmap::new(size),
            state: SlabState::Empty,
            link: SlabLink::default(),
        }
    }

    #[inline]
    pub fn pages(&self) -> NonNull<u8> {
        self.pages
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.pages.as_ptr() as usize
    }

    #[inline]
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Total de objetos do slab
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Objetos livres
    #[inline]
    pub fn free_count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.size - self.count
    }

    #[inline]
    pub fn color_offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == self.size
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == 0
    }

    /// O endereço cai dentro do bloco de páginas?
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.base() + self.byte_count
    }

    /// Endereço do objeto `index`
    #[inline]
    pub fn object_at(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.size);
        // SAFETY: index < size, o objeto está dentro do bloco
        unsafe { NonNull::new_unchecked(self.pages.as_ptr().add(self.offset + index * self.object_size)) }
    }

    /// Índice do objeto que começa em `addr`
    pub fn check_object(&self, addr: usize) -> ObjectCheck {
        let first = self.base() + self.offset;
        if addr < first || addr >= first + self.size * self.object_size {
            return ObjectCheck::OutOfRange;
        }
        let delta = addr - first;
        if delta % self.object_size != 0 {
            return ObjectCheck::Misaligned;
        }
        ObjectCheck::Valid(delta / self.object_size)
    }

    /// Objeto `index` está entregue a alguém?
    pub fn is_allocated(&self, index: usize) -> bool {
        self.allocated.test(index)
    }

    #[inline]
    fn link_slot(&self, object: NonNull<u8>) -> *mut ObjectLink {
        // SAFETY: object_size >= size_of::<ObjectLink>()
        unsafe { object.as_ptr().add(self.object_size - size_of::<ObjectLink>()) as *mut ObjectLink }
    }

    /// Empilha um objeto na free list (só escrita do link)
    fn push_free(&mut self, object: NonNull<u8>) {
        let next = self.free.map_or(0, |p| p.as_ptr() as usize);
        // SAFETY: objeto livre deste slab, link pode estar desalinhado
        unsafe { self.link_slot(object).write_unaligned(next) };
        self.free = Some(object);
        self.count += 1;
    }

    /// Coloca um objeto recém-construído na free list
    pub(crate) fn add_constructed(&mut self, index: usize) {
        let object = self.object_at(index);
        self.push_free(object);
    }

    /// Retira um objeto livre (LIFO)
    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        let object = self.free?;
        // SAFETY: cabeça da free list é objeto livre com link válido
        let next = unsafe { self.link_slot(object).read_unaligned() };
        self.free = NonNull::new(next as *mut u8);
        self.count -= 1;

        if let ObjectCheck::Valid(index) = self.check_object(object.as_ptr() as usize) {
            self.allocated.set(index);
        }
        Some(object)
    }

    /// Devolve um objeto. Fatal para double free ou ponteiro estranho.
    pub(crate) fn push(&mut self, object: NonNull<u8>) {
        let addr = object.as_ptr() as usize;
        let index = match self.check_object(addr) {
            ObjectCheck::Valid(index) => index,
            ObjectCheck::OutOfRange | ObjectCheck::Misaligned => {
                crate::kerror!("(Slab) Objeto não pertence ao slab=", addr);
                panic!("object cache: freeing {:#x} to the wrong slab", addr);
            }
        };

        if !self.allocated.clear(index) {
            crate::kerror!("(Slab) Double free em=", addr);
            panic!("object cache: double free of object {:#x}", addr);
        }

        self.push_free(object);
    }

    /// Comprimento real da free list (diagnóstico, O(n))
    pub fn walk_free_list(&self) -> usize {
        let mut len = 0;
        let mut cursor = self.free;
        while let Some(object) = cursor {
            len += 1;
            // SAFETY: elementos da free list são objetos livres deste slab
            let next = unsafe { self.link_slot(object).read_unaligned() };
            cursor = NonNull::new(next as *mut u8);
        }
        len
    }

    /// Confere `free_count == len(free list)` e o bitmap
    pub fn is_consistent(&self) -> bool {
        self.walk_free_list() == self.count && self.allocated.count_ones() == self.size - self.count
    }
}

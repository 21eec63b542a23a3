//! # Reserva de Boot (Bump Allocator)
//!
//! Durante o early boot não existem áreas do kernel nem semáforos. Os slabs
//! dos caches criados com `CacheFlags::DURING_BOOT` são cortados desta reserva
//! contígua: o ponteiro `next` só sobe e nada é devolvido. Depois do boot
//! esses blocos são registrados como áreas (`commit_early`) e ficam vivos.

use core::ptr::NonNull;

use crate::klib::align_up;

pub struct BumpAllocator {
    start: usize, // Início da reserva
    end: usize,   // Fim da reserva (exclusivo)
    next: usize,  // Próxima posição livre
    allocations: usize,
}

impl BumpAllocator {
    /// Construtor em tempo de compilação (reserva vazia)
    pub const fn new() -> Self {
        Self {
            start: 0,
            end: 0,
            next: 0,
            allocations: 0,
        }
    }

    /// Define os limites da reserva
    pub fn init(&mut self, start: usize, size: usize) {
        self.start = start;
        self.end = start.saturating_add(size);
        self.next = start;
        self.allocations = 0;
    }

    /// Corta `size` bytes alinhados a `align` (potência de dois).
    ///
    /// `None` quando a reserva acabou.
    pub fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 || self.next == 0 {
            return None;
        }
        let block_start = align_up(self.next, align.max(1));
        let block_end = block_start.checked_add(size)?;
        if block_end > self.end {
            return None;
        }

        self.next = block_end;
        self.allocations += 1;
        NonNull::new(block_start as *mut u8)
    }

    /// O endereço pertence à reserva?
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Bytes já entregues (inclui padding de alinhamento)
    pub fn used(&self) -> usize {
        self.next - self.start
    }

    pub fn remaining(&self) -> usize {
        self.end - self.next
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

impl Default for BumpAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_aligns_and_exhausts() {
        let mut bump = BumpAllocator::new();
        bump.init(0x10_0100, 0x3000);

        let first = bump.alloc(0x1000, 0x1000).map(|p| p.as_ptr() as usize);
        assert_eq!(first, Some(0x10_1000));
        assert!(bump.contains(0x10_1000));
        assert_eq!(bump.remaining(), 0x10_3100 - 0x10_2000);

        // Não cabe mais um bloco de página alinhado
        assert!(bump.alloc(0x2000, 0x1000).is_none());
        assert_eq!(bump.allocations(), 1);
    }

    #[test]
    fn test_uninitialized_reserve_is_empty() {
        let mut bump = BumpAllocator::new();
        assert!(bump.alloc(64, 8).is_none());
        assert_eq!(bump.used(), 0);
    }
}

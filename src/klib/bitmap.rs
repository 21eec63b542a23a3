//! Bitmap genérico
//!
//! Versão com armazenamento próprio: cada slab guarda um bit por objeto
//! (1 = alocado) para detectar double free e ponteiros no meio de objetos.

use alloc::vec;
use alloc::vec::Vec;

/// Bitmap para gerenciamento de bits
pub struct Bitmap {
    data: Vec<u64>,
    len: usize,
    ones: usize,
}

impl Bitmap {
    /// Cria bitmap com `bits` bits, todos zerados
    pub fn new(bits: usize) -> Self {
        Self {
            data: vec![0; bits.div_ceil(64)],
            len: bits,
            ones: 0,
        }
    }

    /// Número de bits
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Quantos bits estão em 1
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    /// Define um bit. Retorna o valor anterior.
    pub fn set(&mut self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let word = index / 64;
        let bit = 1u64 << (index % 64);
        let was = self.data[word] & bit != 0;
        if !was {
            self.data[word] |= bit;
            self.ones += 1;
        }
        was
    }

    /// Limpa um bit. Retorna o valor anterior.
    pub fn clear(&mut self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let word = index / 64;
        let bit = 1u64 << (index % 64);
        let was = self.data[word] & bit != 0;
        if was {
            self.data[word] &= !bit;
            self.ones -= 1;
        }
        was
    }

    /// Testa um bit
    pub fn test(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        (self.data[index / 64] & (1 << (index % 64))) != 0
    }

    /// Encontra primeiro bit livre (0)
    pub fn find_first_zero(&self) -> Option<usize> {
        for (i, &word) in self.data.iter().enumerate() {
            if word != u64::MAX {
                let index = i * 64 + word.trailing_ones() as usize;
                if index < self.len {
                    return Some(index);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_count() {
        let mut bitmap = Bitmap::new(70);
        assert_eq!(bitmap.len(), 70);
        assert!(!bitmap.set(3));
        assert!(bitmap.set(3));
        assert!(!bitmap.set(65));
        assert_eq!(bitmap.count_ones(), 2);
        assert!(bitmap.test(65));
        assert!(bitmap.clear(3));
        assert!(!bitmap.clear(3));
        assert_eq!(bitmap.count_ones(), 1);
    }

    #[test]
    fn test_find_first_zero_respects_len() {
        let mut bitmap = Bitmap::new(3);
        assert_eq!(bitmap.find_first_zero(), Some(0));
        bitmap.set(0);
        bitmap.set(1);
        bitmap.set(2);
        assert_eq!(bitmap.find_first_zero(), None);
    }
}

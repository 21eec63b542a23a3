//! # Funções de Alinhamento de Memória
//!
//! Funções utilitárias para alinhamento de endereços e tamanhos.
//! `align` deve ser potência de dois em todas elas.

/// Alinha um valor para cima ao próximo múltiplo de `align`.
///
/// `align_up(10, 4) -> 12`, `align_up(16, 4) -> 16`
#[inline(always)]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Alinha um valor para baixo ao múltiplo anterior de `align`.
///
/// `align_down(10, 4) -> 8`
#[inline(always)]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Verifica se um valor está alinhado a `align`.
#[inline(always)]
pub const fn is_aligned(val: usize, align: usize) -> bool {
    val & (align - 1) == 0
}

/// `true` para 1, 2, 4, 8, ... (zero não é potência de dois)
#[inline(always)]
pub const fn is_power_of_two(val: usize) -> bool {
    val != 0 && (val & (val - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_up(10, 4), 12);
        assert_eq!(align_up(16, 4), 16);
        assert_eq!(align_down(10, 4), 8);
        assert!(is_aligned(4096, 4096));
        assert!(!is_aligned(4100, 4096));
    }

    #[test]
    fn test_power_of_two() {
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(4096));
        assert!(!is_power_of_two(0));
        assert!(!is_power_of_two(24));
    }
}

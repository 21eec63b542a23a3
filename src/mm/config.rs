//! # Configuração do Módulo de Memória
//!
//! Define constantes e configurações globais do alocador de objetos e do
//! cache de páginas.

// =============================================================================
// CONSTANTES DE TAMANHO
// =============================================================================

/// Tamanho de uma página (4 KiB)
pub const PAGE_SIZE: usize = 4096;

/// Bits de offset dentro de uma página
pub const PAGE_SHIFT: usize = 12;

/// Máscara para alinhar endereços a página
pub const PAGE_MASK: usize = !(PAGE_SIZE - 1);

// =============================================================================
// CONFIGURAÇÃO DO SLAB
// =============================================================================

/// Período de coloração (bytes). Offsets de cor são múltiplos disto.
pub const CACHE_COLOR_PERIOD: usize = 8;

/// Tamanho máximo do nome de um cache (bytes, truncado)
pub const CACHE_NAME_MAX: usize = 32;

/// Objetos até `PAGE_SIZE / SMALL_OBJECT_DIVISOR` cabem num slab de 1 página
pub const SMALL_OBJECT_DIVISOR: usize = 8;

/// Objetos grandes: slab com pelo menos este número de objetos
pub const LARGE_OBJECTS_PER_SLAB: usize = 8;

// =============================================================================
// CONFIGURAÇÃO DO DEPOT
// =============================================================================

/// Capacidade padrão de um magazine (objetos)
pub const DEPOT_MAGAZINE_CAPACITY: usize = 16;

/// Máximo padrão de magazines cheios guardados no depot global
pub const DEPOT_MAX_MAGAZINES: usize = 32;

/// Novas tentativas de criar uma área quando a arena está cheia
/// (sem `DONT_WAIT_FOR_MEMORY`)
pub const AREA_ALLOCATION_RETRIES: usize = 3;

// =============================================================================
// CONFIGURAÇÃO DO CACHE DE PÁGINAS
// =============================================================================

/// Número de buckets da Page Cache Table
pub const PAGE_CACHE_TABLE_SIZE: usize = 1024;

// =============================================================================
// CONFIGURAÇÃO SMP
// =============================================================================

/// Número máximo de CPUs suportadas
pub const MAX_CPUS: usize = 64;

/// Índice de página que contém o offset em bytes
#[inline(always)]
pub const fn page_index(offset: u64) -> u64 {
    offset >> PAGE_SHIFT
}

/// Número de páginas necessárias para `bytes` (arredonda para cima)
#[inline(always)]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_math() {
        assert_eq!(1usize << PAGE_SHIFT, PAGE_SIZE);
        assert_eq!(page_index(4095), 0);
        assert_eq!(page_index(4096), 1);
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(8192), 2);
        assert_eq!(pages_for(u64::MAX), (u64::MAX >> PAGE_SHIFT) + 1);
        assert_eq!(0x1234 & PAGE_MASK, 0x1000);
    }
}

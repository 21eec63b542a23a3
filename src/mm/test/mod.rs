//! # Testes do Subsistema de Memória
//!
//! Auto-testes do kernel (feature `self_test`), rodados no boot depois que o
//! heap está de pé. Os testes de host executam as mesmas suites.
//!
//! - `slab_test.rs` - ObjectCache, slabs e depot
//! - `cache_test.rs` - VM caches, Page Cache Table e colapso


use crate::klib::test_framework::SuiteReport;

/// Executa todas as suites de memória. `true` se nada falhou.
pub fn run_memory_tests() -> bool {
    crate::kinfo!("╔════════════════════════════════════════╗");
    crate::kinfo!("║     🧪 TESTES DE MEMÓRIA               ║");
    crate::kinfo!("╚════════════════════════════════════════╝");

    let reports: [SuiteReport; 2] = [slab_test::run_slab_tests(), cache_test::run_cache_tests()];
    let ok = reports.iter().all(SuiteReport::all_passed);

    if ok {
        crate::kinfo!("╔════════════════════════════════════════╗");
        crate::kinfo!("║  ✅ TODOS OS TESTES PASSARAM!          ║");
        crate::kinfo!("╚════════════════════════════════════════╝");
    } else {
        crate::kerror!("(MM) Suites com falha=", reports.iter().filter(|r| !r.all_passed()).count());
    }
    ok
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_memory_suites_pass() {
        assert!(super::run_memory_tests());
    }
}

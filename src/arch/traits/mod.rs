//! Traits do Hardware Abstraction Layer (HAL).

pub mod cpu;

// Re-exportar para facilitar uso: `use crate::arch::CpuOps;`
pub use cpu::{CoreId, CpuOps};

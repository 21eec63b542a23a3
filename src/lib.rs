//! Forge Kernel Memory.
//!
//! Alocador de objetos (slabs) e cache de páginas da VM do Forge.
//! Roda sem `std`; os testes de unidade usam o host.

#![cfg_attr(not(test), no_std)]

// Habilitar alocação dinâmica (necessário para Vec/Box/Arc)
extern crate alloc;

// --- Módulos de Baixo Nível (Hardware) ---
pub mod arch; // CPU: interrupções, core id

// --- Módulos Centrais ---
pub mod core; // Logging
pub mod klib; // Utilitários Internos (Bitmap, Hash, Align)
pub mod mm; // Alocador de objetos e cache de páginas
pub mod sync; // Spinlock e Mutex

pub use crate::mm::{MmError, MmResult};

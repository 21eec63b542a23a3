//! # Synchronization Primitives
//!
//! Primitivas de sincronização para ambiente SMP.
//!
//! ## Hierarquia de Uso
//!
//! ```text
//! Spinlock   → Seções críticas curtas, IRQs desabilitadas (Page Cache Table, depot)
//! Mutex      → Seções que podem bloquear (ObjectCache, VmCacheRef)
//! ```
//!
//! ## Regras
//!
//! - **Spinlock**: Nunca adquirir um `Mutex` segurando um `Spinlock`
//! - **Mutex**: Preferir para seções normais do kernel
//! - **Ordem de Lock (VM caches)**: source → consumer, exceto no merge
//!   (consumer → source, com revalidação completa)

/// Spinlock (busy-wait, não dorme)
pub mod spinlock;

/// Mutex (pode bloquear thread)
pub mod mutex;

pub use mutex::{Mutex, MutexGuard};
pub use spinlock::{Spinlock, SpinlockGuard};

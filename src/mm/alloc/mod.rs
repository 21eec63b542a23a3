//! # Alloc - Kernel Object Allocator
//!
//! Slab allocator de objetos de tamanho fixo.
//!
//! | Módulo | Responsabilidade |
//! |--------|------------------|
//! | `object_cache` | Listas empty/partial/full, cor, pressão, quota |
//! | `slab` | Um bloco fatiado em objetos + free list intrusiva |
//! | `depot` | Magazines per-CPU (só com >1 CPU) |
//! | `pages` | Áreas do kernel e reserva de boot para os slabs |
//! | `bump` | Reserva contígua do early boot |

pub mod bump;
pub mod depot;
pub mod flags;
pub mod object_cache;
pub mod pages;
pub mod slab;

pub use bump::BumpAllocator;
pub use depot::{DepotStats, ObjectDepot};
pub use flags::{AllocFlags, CacheFlags};
pub use object_cache::{
    CacheStats, LowMemoryLevel, NoHooks, ObjectCache, ObjectCacheConfig, ObjectHooks,
    PageStrategy, SlabInfo,
};
pub use pages::{KernelPageSource, SlabPageSource};
pub use slab::{SlabId, SlabState};

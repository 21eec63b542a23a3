//! # VM Page Cache
//!
//! Páginas residentes dos objetos de memória virtual, organizadas em cadeias
//! copy-on-write.
//!
//! ## Visão Geral
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Áreas (mapeamentos de processo)              │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │ insert_area
//! ┌───────────────────────────▼─────────────────────────────────┐
//! │  VmCacheRef (mutex, refcount)  ──source──▶  VmCacheRef ...   │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                   │
//! │  │ Page 0   │  │ Page 1   │  │ Page N   │  ...              │
//! │  └──────────┘  └──────────┘  └──────────┘                   │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             │
//! ┌───────────────────────────▼─────────────────────────────────┐
//! │   Page Cache Table (cache, índice) → página   [spinlock]     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Características
//!
//! - **Lookup global**: toda página residente está na tabela sob o par
//!   (cache dono, índice), e em exatamente um cache.
//! - **Colapso**: um cache sem áreas com um único consumer é fundido nele.
//! - **Teardown em cascata**: sem recursão, por lista de trabalho.

pub mod chain;
pub mod page;
pub mod store;
pub mod system;
pub mod table;
pub mod vm_cache;

pub use page::{CacheId, FreePageList, PagePool, PageState, VmPage};
pub use store::{AnonymousStore, VmStore};
pub use system::{init, system, BootPhase, VmStats, VmSystem};
pub use table::{PageCacheTable, PageKey};
pub use vm_cache::{AreaId, CreateRefError, LockedCache, VmCache, VmCacheRef};

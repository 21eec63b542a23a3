//! # Memory Management Subsystem (MM)
//!
//! Alocador de objetos do kernel (slabs) e cache de páginas da memória
//! virtual. É aqui que estruturas de tamanho fixo do kernel nascem e que as
//! páginas residentes de cada objeto de memória são rastreadas.
//!
//! ## 🎯 Propósito e Responsabilidade
//! - **Objetos de tamanho fixo:** `ObjectCache` entrega objetos já construídos,
//!   recicla slabs vazios sob pressão e respeita quota por cache.
//! - **Páginas residentes:** `VmCache` guarda as páginas de cada objeto de
//!   memória; a Page Cache Table responde "qual página está em (cache, índice)".
//! - **Copy-on-write:** caches formam cadeias source/consumer e colapsam quando
//!   um elo deixa de ser útil.
//!
//! ## 🏗️ Arquitetura dos Módulos
//!
//! | Módulo   | Responsabilidade | Estado Atual |
//! |----------|------------------|--------------|
//! | `alloc`  | Slabs, ObjectCache, depot per-CPU, fonte de páginas. | **Funcional:** early boot + caminho normal. |
//! | `cache`  | VmCache, VmCacheRef, Page Cache Table, stores. | **Funcional:** colapso e teardown em cascata. |
//! | `config` | Constantes (página, cor, tabela, depot). | **Estável** |
//! | `error`  | `MmError` / `MmResult`. | **Estável** |
//!
//! ## 🔍 Análise Crítica (Kernel Engineer's View)
//!
//! ### ✅ Pontos Fortes
//! - **Sem lock durante pedido de páginas:** o mutex do `ObjectCache` é solto
//!   enquanto a arena atende; a quota é reservada antes.
//! - **Teardown iterativo:** soltar o topo de uma cadeia longa não consome pilha.
//!
//! ### ⚠️ Pontos de Atenção (Dívida Técnica)
//! - **Mutex spin:** o `sync::Mutex` ainda faz busy-wait (sem fila de espera no
//!   scheduler). Seções longas sob o lock de um cache custam CPU.
//! - **Write-back síncrono:** `write_modified` escreve com o lock do cache seguro.
//!
//! ## 🛠️ TODOs e Roadmap
//! - [ ] **TODO: (Perf)** Tamanho da Page Cache Table proporcional à RAM.
//!   - *Motivo:* 1024 buckets fixos degradam com muitos GiB residentes.
//!
//! ---------------------------------------------------------------------
//! ORDEM DE LOCKS
//! ---------------------------------------------------------------------
//!
//! ```text
//! ObjectCache mutex ──▶ depot (spinlock por CPU ──▶ spinlock global)
//! VmCacheRef mutex  ──▶ Page Cache Table (spinlock, IRQs off)
//! consumer ──▶ cache ──▶ source   (merge)
//! ```
//!
//! Nunca adquirir um `Mutex` segurando um `Spinlock`.

pub mod alloc;
pub mod cache;
pub mod config;
pub mod error;

#[cfg(any(test, feature = "self_test"))]
pub mod test;

// Re-exports para conveniência
pub use self::alloc::{AllocFlags, CacheFlags, ObjectCache, ObjectCacheConfig, ObjectHooks};
pub use cache::{VmCache, VmCacheRef, VmSystem};
pub use error::{MmError, MmResult};

#[cfg(any(test, feature = "self_test"))]
pub use test::run_memory_tests;

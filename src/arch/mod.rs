//! # Hardware Abstraction Layer (HAL)
//!
//! O módulo `arch` é a **única** ponte entre o alocador/cache de páginas e o hardware.
//! O MM só precisa de três coisas da CPU: controle de interrupções, o ID do core
//! atual e quantos cores estão ativos.
//!
//! ## 🎯 Propósito e Responsabilidade
//! - **Isolamento:** `mm::alloc` e `mm::cache` importam `crate::arch::Cpu` e nunca
//!   tocam em instruções privilegiadas diretamente.
//! - **Seleção de Plataforma:** Em `x86_64` bare-metal usamos `cli`/`sti`/`pushfq`.
//!   Em alvos hospedados (testes de unidade, ferramentas) usamos uma flag emulada.
//!
//! ## 🏗️ Arquitetura e Fluxo
//! 1. `sync::Spinlock` chama `Cpu::are_interrupts_enabled()` + `Cpu::disable_interrupts()`.
//! 2. O guard restaura o estado anterior no `Drop`.
//! 3. O depot per-CPU indexa seus magazines com `Cpu::current_core_id()`.

use core::sync::atomic::{AtomicUsize, Ordering};

pub mod traits;

// Seleção de Arquitetura: x86_64 bare-metal
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64 as platform;

// Qualquer outro alvo: CPU emulada
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub mod hosted;

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub use self::hosted as platform;

pub use platform::Cpu;
pub use traits::*;

/// Número de CPUs ativas (atualizado pelo bring-up SMP)
static ACTIVE_CPUS: AtomicUsize = AtomicUsize::new(1);

/// Registra quantas CPUs estão online.
///
/// Chamado pelo bring-up SMP depois que os APs respondem.
pub fn set_active_cpus(count: usize) {
    ACTIVE_CPUS.store(count.max(1), Ordering::Release);
}

/// Número de CPUs ativas
pub fn active_cpus() -> usize {
    ACTIVE_CPUS.load(Ordering::Acquire)
}

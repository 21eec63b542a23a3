//! Implementação x86_64 das operações de CPU usadas pelo MM.
//!
//! # Segurança
//! Assume modo longo (64-bit) e Ring 0.

use crate::arch::traits::cpu::{CoreId, CpuOps};
use core::arch::asm;

pub struct X64Cpu;

impl CpuOps for X64Cpu {
    #[inline]
    fn relax() {
        unsafe {
            asm!("pause", options(nomem, nostack, preserves_flags));
        }
    }

    #[inline]
    fn disable_interrupts() {
        unsafe {
            asm!("cli", options(nomem, nostack, preserves_flags));
        }
    }

    #[inline]
    fn enable_interrupts() {
        unsafe {
            asm!("sti", options(nomem, nostack, preserves_flags));
        }
    }

    /// Verifica se as interrupções estão habilitadas (RFLAGS.IF).
    #[inline]
    fn are_interrupts_enabled() -> bool {
        let rflags: u64;
        unsafe {
            // PUSHFQ empilha RFLAGS, POP retira para registrador.
            asm!("pushfq; pop {}", out(reg) rflags, options(nomem, preserves_flags));
        }
        // Bit 9 é IF (Interrupt Flag)
        (rflags & (1 << 9)) != 0
    }

    /// Lê o APIC ID inicial via CPUID leaf 1 (EBX[31:24]).
    #[inline]
    fn current_core_id() -> CoreId {
        let ebx: u32;
        unsafe {
            asm!(
                "push rbx",
                "cpuid",
                "mov {0:e}, ebx",
                "pop rbx",
                out(reg) ebx,
                inout("eax") 1u32 => _,
                out("ecx") _,
                out("edx") _,
            );
        }
        ebx >> 24
    }
}

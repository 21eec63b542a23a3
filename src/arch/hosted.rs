//! CPU emulada para alvos hospedados (testes de unidade, ferramentas de host).
//!
//! Não existe flag IF real aqui; mantemos uma flag emulada para que o
//! protocolo salvar/desabilitar/restaurar do `Spinlock` continue observável.
//! Nos testes cada thread faz o papel de uma CPU e tem a sua própria flag.

use crate::arch::traits::cpu::{CoreId, CpuOps};

#[cfg(test)]
mod flag {
    use core::cell::Cell;

    std::thread_local! {
        static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    pub fn set(enabled: bool) {
        INTERRUPTS_ENABLED.with(|flag| flag.set(enabled));
    }

    pub fn get() -> bool {
        INTERRUPTS_ENABLED.with(Cell::get)
    }
}

#[cfg(not(test))]
mod flag {
    use core::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

    pub fn set(enabled: bool) {
        INTERRUPTS_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn get() -> bool {
        INTERRUPTS_ENABLED.load(Ordering::SeqCst)
    }
}

pub struct HostedCpu;

impl CpuOps for HostedCpu {
    fn disable_interrupts() {
        flag::set(false);
    }

    fn enable_interrupts() {
        flag::set(true);
    }

    fn are_interrupts_enabled() -> bool {
        flag::get()
    }

    fn current_core_id() -> CoreId {
        0
    }
}

pub use HostedCpu as Cpu;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Spinlock;
    use std::sync::Arc;

    #[test]
    fn test_interrupt_flag_restored_per_thread() {
        let lock = Arc::new(Spinlock::new(0usize));
        let mut handles = std::vec::Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = lock.lock();
                    assert!(!HostedCpu::are_interrupts_enabled());
                    *guard += 1;
                    drop(guard);
                    assert!(HostedCpu::are_interrupts_enabled());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(HostedCpu::are_interrupts_enabled());
        assert_eq!(*lock.lock(), 4000);
    }
}

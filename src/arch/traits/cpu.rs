//! Interface Abstrata de CPU (HAL).
//! Define as operações que qualquer arquitetura deve implementar para o MM.

/// Identificador de um core lógico
pub type CoreId = u32;

pub trait CpuOps {
    /// Dica para a CPU que estamos em um spinloop (PAUSE).
    fn relax() {
        core::hint::spin_loop();
    }

    /// Desabilita interrupções no core atual (CLI).
    /// Crítico para seções atômicas no kernel.
    fn disable_interrupts();

    /// Habilita interrupções no core atual (STI).
    fn enable_interrupts();

    /// Verifica se as interrupções estão habilitadas.
    fn are_interrupts_enabled() -> bool;

    /// ID do core que está executando.
    fn current_core_id() -> CoreId;
}

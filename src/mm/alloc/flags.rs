//! Flags do alocador de objetos

use bitflags::bitflags;

bitflags! {
    /// Flags de criação de um `ObjectCache`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u32 {
        /// Não usar o depot per-CPU (forçado em sistemas com 1 CPU)
        const NO_DEPOT       = 1 << 0;
        /// Cache criado durante o boot: páginas vêm da reserva de boot
        const DURING_BOOT    = 1 << 1;
        /// Slabs alinhados ao próprio tamanho (e não só a página)
        const ALIGN_ON_SIZE  = 1 << 2;
    }
}

bitflags! {
    /// Flags de uma alocação de objeto
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Falhar com OOM em vez de esperar memória
        const DONT_WAIT_FOR_MEMORY = 1 << 0;
    }
}

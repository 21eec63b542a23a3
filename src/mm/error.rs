//! Tipos de Erro do Subsistema de Memória
//!
//! Apenas condições recuperáveis viram `MmError`. Violações de invariante
//! (double free, página com dono errado, ...) são fatais: `kerror!` + `panic!`.

/// Erros do subsistema de memória
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// Sem memória para um novo slab ou página (OOM)
    OutOfMemory,
    /// Quota do cache ou commit do store excedido
    QuotaExceeded,
    /// Depot per-CPU não pôde ser criado
    DepotInitFailed,
    /// Operação indisponível antes do fim do boot (tentar de novo depois)
    EarlyBoot,
    /// Parâmetro inválido
    InvalidParameter,
}

impl MmError {
    /// Retorna descrição legível do erro
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "OOM: sem páginas disponíveis",
            Self::QuotaExceeded => "Quota de memória excedida",
            Self::DepotInitFailed => "Falha ao criar depot per-CPU",
            Self::EarlyBoot => "Indisponível durante o boot",
            Self::InvalidParameter => "Parâmetro inválido",
        }
    }

    /// Erros de esgotamento de recurso (o chamador pode tentar de novo)
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory | Self::QuotaExceeded | Self::DepotInitFailed
        )
    }
}

impl core::fmt::Display for MmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tipo Result específico para operações de memória
pub type MmResult<T> = Result<T, MmError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(MmError::QuotaExceeded.to_string(), "Quota de memória excedida");
        assert!(MmError::OutOfMemory.is_exhaustion());
        assert!(!MmError::EarlyBoot.is_exhaustion());
    }
}

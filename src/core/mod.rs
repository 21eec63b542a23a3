//! Core Module
//!
//! Infraestrutura central compartilhada pelo alocador e pelo cache de páginas.

pub mod logging;

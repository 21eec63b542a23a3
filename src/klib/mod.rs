//! Kernel Library (KLib).
//!
//! Utilitários agnósticos de hardware para uso interno do alocador e do
//! cache de páginas. Funciona como uma extensão da `core` library.

pub mod align;
pub mod bitmap;
pub mod hash;

#[cfg(any(test, feature = "self_test"))]
pub mod test_framework;

pub use align::{align_down, align_up, is_aligned, is_power_of_two};
pub use bitmap::Bitmap;
pub use hash::{FnvHasher, HashTable};

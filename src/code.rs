//! Six-digit transfer codes.

use rand::Rng;

pub const CODE_LEN: usize = 6;
const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// Draws candidate codes. Uniqueness against active transfers is checked by the caller
/// (see `TransferService::upload`), which retries up to `max_attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct CodeGenerator {
    pub max_attempts: u32,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl CodeGenerator {
    /// A uniformly drawn code in `[100000, 999999]`. Independent of upload order.
    pub fn generate(&self) -> String {
        rand::rng().random_range(CODE_MIN..=CODE_MAX).to_string()
    }
}

/// Whether `code` has the shape of an issued code. Cheap pre-check before any store lookup.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) && !code.starts_with('0')
}

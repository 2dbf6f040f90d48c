//! Row identifier generation
//!
//! Every row inserted through a function gets a fresh opaque identifier.
//! The generator sits behind a trait so tests can make ids predictable.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Default identifier length in characters
pub const DEFAULT_ID_LENGTH: usize = 16;

/// Source of collision-resistant row identifiers
pub trait IdGenerator: Send + Sync {
    /// Produce a new, non-empty identifier
    fn generate(&self) -> String;
}

/// Random alphanumeric identifiers
///
/// 16 characters over 62 symbols gives ~95 bits of entropy.
#[derive(Debug, Clone)]
pub struct RandomIdGenerator {
    length: usize,
}

impl RandomIdGenerator {
    /// Create a generator producing identifiers of the given length
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_id_length_and_charset() {
        let id = RandomIdGenerator::default().generate();
        assert_eq!(id.len(), DEFAULT_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_random_ids_unique() {
        let gen = RandomIdGenerator::default();
        let ids: HashSet<String> = (0..1000).map(|_| gen.generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_zero_length_clamped() {
        assert_eq!(RandomIdGenerator::new(0).generate().len(), 1);
    }
}

//! Shared types for the Hearthnet device governor: configuration, error
//! taxonomy, and the small value types passed across the governor's
//! public boundary.

mod config;
mod error;

pub use config::{ConfigError, GenerationConfig, GlobalConfig, GovernorConfig};
pub use error::{is_connectivity_failure, GovernorError, Result};

/// Hardware generation of a device. Values outside `{1, 2}` are normalized
/// by the governor; this type just carries whatever the caller passed in.
pub type Generation = u8;

/// Clamp a caller-supplied generation into the two supported tiers.
pub fn normalize_generation(generation: Generation) -> Generation {
    match generation {
        0 => 1,
        g if g > 2 => 2,
        g => g,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_below_range() {
        assert_eq!(normalize_generation(0), 1);
    }

    #[test]
    fn normalizes_above_range() {
        assert_eq!(normalize_generation(99), 2);
    }

    #[test]
    fn passes_through_valid_values() {
        assert_eq!(normalize_generation(1), 1);
        assert_eq!(normalize_generation(2), 2);
    }
}

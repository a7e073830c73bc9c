//! Error types for sieve construction and extension.

/// Error type for sieve operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The sieve configuration cannot produce a correct sieve.
    InvalidConfig(String),

    /// The next block would end past `i64::MAX`.
    Overflow { block_start: i64, block_size: usize },
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid sieve configuration: {}", msg),
            Error::Overflow {
                block_start,
                block_size,
            } => write!(
                f,
                "Arithmetic overflow: block of {} starting at {} exceeds the i64 range",
                block_size, block_start
            ),
        }
    }
}

/// Result type alias for sieve operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_config() {
        let err = Error::InvalidConfig("max_block_size must be >= 512".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid sieve configuration: max_block_size must be >= 512"
        );
    }

    #[test]
    fn test_display_overflow() {
        let err = Error::Overflow {
            block_start: i64::MAX - 10,
            block_size: 512,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Arithmetic overflow"));
        assert!(msg.contains(&(i64::MAX - 10).to_string()));
    }
}

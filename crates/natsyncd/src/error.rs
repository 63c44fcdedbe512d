//! Error types for natsyncd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include sufficient detail for audit

use thiserror::Error;

/// Errors that can occur in natsyncd
///
/// None of these are fatal to the daemon. Each one aborts the event or
/// operation that raised it and is logged where it is detected.
#[derive(Debug, Error)]
pub enum NatsyncError {
    /// Event payload missing, malformed or carrying a zero address
    /// NIST: SI-10 (Information Input Validation)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Interface index could not be resolved to a name
    /// NIST: CM-8 (System Component Inventory) - Interface tracking
    #[error("Interface not found: index {0}")]
    InterfaceNotFound(u32),

    /// Configuration provider or configuration file error
    /// NIST: CM-6 (Configuration Settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No NAT table instance is attached
    #[error("NAT table instance unavailable")]
    NatTableUnavailable,

    /// A listener task could not be started
    #[error("Listener startup failed: {0}")]
    ListenerStartup(String),

    /// Conntrack feed subscription error
    #[error("Conntrack feed error: {0}")]
    Feed(String),

    /// IO error
    /// NIST: SI-11 (Error Handling) - System-level errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias for natsyncd operations
pub type Result<T> = std::result::Result<T, NatsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NatsyncError::InterfaceNotFound(5);
        assert_eq!(err.to_string(), "Interface not found: index 5");
    }

    #[test]
    fn test_error_nat_table_unavailable() {
        let err = NatsyncError::NatTableUnavailable;
        assert_eq!(err.to_string(), "NAT table instance unavailable");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: NatsyncError = io.into();
        assert!(matches!(err, NatsyncError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }
}

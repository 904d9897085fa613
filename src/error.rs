/// Error types for the ipfold library
use std::fmt;

/// Result type alias for ipfold operations
pub type Result<T> = std::result::Result<T, IpfoldError>;

/// Main error type for building, loading and writing databases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpfoldError {
    /// Malformed IP/CIDR text or a mask length out of range
    InvalidPrefix(String),

    /// A merge changed the type of a top-level field (strict mode only)
    RecordType {
        /// Field whose type changed
        field: String,
        /// Type name of the existing value
        existing: &'static str,
        /// Type name of the merged value
        incoming: &'static str,
    },

    /// Internal node graph inconsistency found while serializing
    Serialization(String),

    /// Structurally invalid database file
    CorruptDatabase(String),

    /// Database format or IP version this implementation does not handle
    UnsupportedVersion(String),

    /// Input line that is not a usable JSON record
    InvalidInput(String),

    /// I/O errors
    Io(String),
}

impl fmt::Display for IpfoldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpfoldError::InvalidPrefix(msg) => write!(f, "Invalid prefix: {}", msg),
            IpfoldError::RecordType {
                field,
                existing,
                incoming,
            } => write!(
                f,
                "Record type conflict on field '{}': {} cannot become {}",
                field, existing, incoming
            ),
            IpfoldError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            IpfoldError::CorruptDatabase(msg) => write!(f, "Corrupt database: {}", msg),
            IpfoldError::UnsupportedVersion(msg) => write!(f, "Unsupported version: {}", msg),
            IpfoldError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            IpfoldError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for IpfoldError {}

impl From<std::io::Error> for IpfoldError {
    fn from(err: std::io::Error) -> Self {
        IpfoldError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for IpfoldError {
    fn from(err: serde_json::Error) -> Self {
        IpfoldError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = IpfoldError::InvalidPrefix("999.1.1.1/99".to_string());
        assert_eq!(err.to_string(), "Invalid prefix: 999.1.1.1/99");

        let err = IpfoldError::RecordType {
            field: "x".to_string(),
            existing: "uint32",
            incoming: "string",
        };
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.mmdb");
        let err: IpfoldError = io.into();
        assert!(matches!(err, IpfoldError::Io(ref m) if m.contains("missing.mmdb")));
    }
}

use thiserror::Error;

/// Error taxonomy for package operations.
///
/// The kind determines retry policy: `Io` failures are transient and
/// retry-eligible, everything else is not. `Format` and `Integrity` mean the
/// archive itself is suspect.
#[derive(Error, Debug)]
pub enum NovusError {
    #[error("format error at offset {offset}: {context}")]
    Format { context: String, offset: u64 },

    #[error("integrity error: {context}")]
    Integrity { context: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("security error: {0}")]
    Security(String),

    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: u32 },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl NovusError {
    /// Malformed on-disk structure, with the offset where decoding failed.
    pub fn format(context: impl Into<String>, offset: u64) -> Self {
        NovusError::Format {
            context: context.into(),
            offset,
        }
    }

    /// Checksum or signature mismatch.
    pub fn integrity(context: impl Into<String>) -> Self {
        NovusError::Integrity {
            context: context.into(),
        }
    }

    /// Rejected mutation or unsafe content.
    pub fn security(context: impl Into<String>) -> Self {
        NovusError::Security(context.into())
    }

    /// True if retrying the operation could succeed (transient I/O only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, NovusError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, NovusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_io_is_retryable() {
        let io = NovusError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_retryable());

        assert!(!NovusError::format("bad magic", 0).is_retryable());
        assert!(!NovusError::integrity("crc mismatch").is_retryable());
        assert!(!NovusError::security("read-only").is_retryable());
        assert!(!NovusError::Timeout("write".into()).is_retryable());
    }

    #[test]
    fn test_format_error_carries_offset() {
        let err = NovusError::format("truncated index", 112);
        let msg = err.to_string();
        assert!(msg.contains("112"));
        assert!(msg.contains("truncated index"));
    }
}

//! Recoverable failures of handle construction.

/// Errors returned by the fallible constructors (`try_new`, `try_reset`).
///
/// Contract violations such as dereferencing an empty handle are not
/// represented here; those panic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The allocator could not provide memory for a control block.
    #[error("failed to allocate control block ({size} bytes, align {align})")]
    AllocFailed {
        /// Requested size in bytes
        size: usize,
        /// Requested alignment
        align: usize,
    },
}

/// Result alias for fallible handle operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_failed_message() {
        let err = Error::AllocFailed { size: 24, align: 8 };
        assert_eq!(
            err.to_string(),
            "failed to allocate control block (24 bytes, align 8)"
        );
    }
}

/// Errors raised while setting up or priming the compression state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The secure random source could not produce bytes.
    #[error("secure random source unavailable: {0}")]
    Randomness(#[from] getrandom::Error),

    /// The padding size is not a power of two in `1..=65536`.
    #[error("padding size {0} must be a power of two between 1 and 65536")]
    InvalidPaddingSize(usize),

    /// The padding buffer does not have the configured length.
    #[error("padding buffer holds {actual} bytes, expected {expected}")]
    PaddingMismatch {
        /// Configured padding size.
        expected: usize,
        /// Length of the constructed buffer.
        actual: usize,
    },

    /// A gzip header name contained a NUL byte.
    #[error("gzip header name must not contain NUL bytes")]
    InvalidHeaderName,
}

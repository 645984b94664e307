use thiserror::Error;

/// Result alias for `hsne`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by hierarchy construction, queries and persistence.
///
/// Variants fall in two families: precondition violations (caller handed in
/// something the operation cannot work with) and runtime failures (I/O and
/// malformed files). Use [`Error::is_precondition`] / [`Error::is_runtime`]
/// to tell them apart.
#[derive(Debug, Error)]
pub enum Error {
    /// Input was empty.
    #[error("empty input provided")]
    EmptyInput,

    /// Dimension or length mismatch.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: &'static str,
    },

    /// An index does not address an existing element.
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// What was indexed.
        what: &'static str,
        /// Offending index.
        index: usize,
        /// Length of the indexed collection.
        len: usize,
    },

    /// Generic precondition violation (unsorted bulk input, populated row, ...).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Landmark selection produced no landmarks.
    #[error("no landmarks selected from a scale of {previous_scale_size} vertices")]
    NoLandmarks {
        /// Size of the scale being coarsened.
        previous_scale_size: usize,
    },

    /// Fixed-ratio selection ran out of attempts before reaching its target.
    #[error("landmark selection gave up after {attempts} attempts ({selected}/{requested} selected)")]
    LandmarkSelectionExhausted {
        /// Candidates drawn.
        attempts: usize,
        /// Landmarks accepted.
        selected: usize,
        /// Landmarks requested.
        requested: usize,
    },

    /// A transition row had no mass to normalize.
    #[error("transition row {row} has zero mass")]
    ZeroRowMass {
        /// Row (landmark) index.
        row: usize,
    },

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The file was written by an unknown format version.
    #[error("unsupported hierarchy format version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version read from the stream.
        major: u32,
        /// Minor version read from the stream.
        minor: u32,
    },

    /// The stream is structurally invalid.
    #[error("malformed hierarchy file: {0}")]
    Format(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for logic errors: the call was made with inputs that can never succeed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::EmptyInput
                | Error::DimensionMismatch { .. }
                | Error::InvalidParameter { .. }
                | Error::IndexOutOfRange { .. }
                | Error::Precondition(_)
                | Error::NoLandmarks { .. }
                | Error::ZeroRowMass { .. }
        )
    }

    /// True for environment failures: I/O, unreadable or foreign files.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::UnsupportedVersion { .. } | Error::Format(_)
        )
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}

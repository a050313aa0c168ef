//! Error type for VHD decoding.

use thiserror::Error;

/// The error type returned by every fallible operation in the decoder.
#[derive(Error, Debug)]
pub enum Error {
    /// The source stream doesn't begin or end with a valid VHD footer.
    /// A surrounding archive framework should try another decoder.
    #[error("not a VHD image")]
    NotMine,

    /// A structurally present VHD contains a malformed field: bad checksum,
    /// a nonzero reserved byte, an impossible block size, a BAT that
    /// disagrees with the logical size, or a locator that overflows the file.
    #[error("invalid VHD structure: {0}")]
    Invalid(String),

    /// The file ends before the expected backup footer. Carries the logical
    /// limit the opener was able to establish before giving up. Surfaced as
    /// a non-fatal annotation rather than an `Open` failure — the caller
    /// still gets a usable image clipped to `logical_limit`.
    #[error("VHD truncated before its backup footer (claimed physical extent {logical_limit} bytes)")]
    Truncated { logical_limit: u64 },

    /// The volume callback could not supply a named ancestor, or the
    /// ancestor's UID didn't match the child's `parent_uid`. Surfaced as a
    /// non-fatal annotation; reads against the resulting image fail instead.
    #[error("Can't open parent VHD file:\n{0}")]
    ParentMissing(String),

    /// The source stream returned a short read or a seek error.
    #[error("VHD source stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parent-chain recursion exceeded the configured depth limit.
    #[error("VHD parent chain recursion depth exceeded")]
    DepthExceeded,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }

    pub fn parent_missing(name: impl Into<String>) -> Self {
        Error::ParentMissing(name.into())
    }
}

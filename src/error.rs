use std::io;
use thiserror::Error;

/// Identifies which optional metadata codec a failed lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Profile,
    TagTable,
    Packet,
}

impl MetadataKind {
    pub fn name(self) -> &'static str {
        match self {
            MetadataKind::Profile => "profile",
            MetadataKind::TagTable => "tag-table",
            MetadataKind::Packet => "packet",
        }
    }
}

/// Errors produced while decoding or encoding a container.
///
/// The enum is `Clone` because deferred metadata fields cache their first
/// decode failure and hand the same error back on every later access.
/// I/O errors are carried as their display string for that reason.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed header or record contents. Recoverable only under
    /// damage-tolerant decoding, which skips the offending record.
    #[error("format error: {0}")]
    Format(String),

    /// Stored integrity code does not match the recomputed one. Same
    /// recoverability rule as [`Error::Format`].
    #[error("integrity error: stored checksum {stored:#010x}, computed {computed:#010x}")]
    Integrity { stored: u32, computed: u32 },

    /// Structural ambiguity: segment counts disagree, a singular record
    /// appears twice. Never recoverable by damage tolerance.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// A declared or accumulated size exceeds a configured limit.
    /// Deliberately not subject to damage tolerance.
    #[error("resource limit exceeded: {what} needs {declared} bytes, {remaining} remaining")]
    ResourceLimit {
        what: &'static str,
        declared: u64,
        remaining: u64,
    },

    /// No codec is registered for the requested metadata kind. A normal
    /// outcome when the optional component was never loaded; returned from
    /// field access, never aborts the surrounding decode.
    #[error("no codec registered for {} metadata", .0.name())]
    UnavailableCodec(MetadataKind),

    /// No compression collaborator is available for a codec identifier.
    #[error("no compression codec available for {0}")]
    UnavailableCompression(&'static str),

    /// The caller's cancellation token or deadline fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The input matched no registered format's magic.
    #[error("unknown format")]
    UnknownFormat,

    /// Invalid read or write options were supplied to a call.
    #[error("invalid options: {0}")]
    Option(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn consistency(msg: impl Into<String>) -> Self {
        Error::Consistency(msg.into())
    }

    /// Whether damage-tolerant decoding may skip the record that produced
    /// this error and keep walking.
    pub(crate) fn is_skippable(&self) -> bool {
        matches!(self, Error::Format(_) | Error::Integrity { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

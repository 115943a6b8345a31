//! Error types for the wire protocol.

use thiserror::Error;

/// Raised when a request field doesn't fit in its fixed-width slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingError {
    /// One of `user`, `server`, or `class` exceeded 16 bytes of UTF-8.
    #[error("field too long for its 16-byte slot")]
    FieldTooLong,
}

/// Raised when a response datagram can't be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Byte 0 wasn't `'C'`.
    #[error("bad version")]
    BadVersion,
    /// The datagram was shorter than the minimum 76-byte header.
    #[error("bad size")]
    BadSize,
    /// The record count at bytes 66..75 wasn't a parseable non-negative integer.
    #[error("bad record count")]
    BadCount,
    /// The trailer ran out of bytes before the declared record count was read,
    /// or a null terminator was never found.
    #[error("truncated response")]
    Truncated,
    /// The session port token wasn't a decimal integer in 1..=65535.
    #[error("bad port")]
    BadPort,
}

//! Frame parsing and validation errors
//!
//! This module defines error types that can occur during frame parsing,
//! validation, and decryption operations. All errors implement the standard
//! Error trait for proper error propagation and handling.

use std::fmt;
use std::fmt::Display;

/// Frame parsing and processing errors
///
/// Represents various failure modes that can occur when unmarshaling frames
/// from raw byte streams, including incomplete data, invalid format, and
/// cryptographic failures.
#[derive(Debug)]
pub enum FrameError {
    /// Buffer is too short to contain a complete envelope or message body.
    ///
    /// Occurs when the datagram is shorter than the 8-byte header, or
    /// shorter than the fixed body size its type tag requires.
    TooShort,

    /// Envelope or body is malformed: unknown type tag, or checksum
    /// mismatch once the envelope has been decrypted/decompressed.
    Invalid,

    /// Checksum verification failed after decrypt/decompress.
    ChecksumMismatch,

    /// Payload decryption failed
    ///
    /// Wraps the underlying cryptographic error. This can occur when:
    /// - Authentication tag verification fails (AEAD ciphers)
    /// - Data was tampered with during transmission
    /// - Wrong encryption key is being used
    /// - Payload is too short for the cipher's requirements
    DecryptionFailed(crate::Error),
}

impl std::error::Error for FrameError {}

impl Display for FrameError {
    /// Formats the error for display and logging
    ///
    /// Provides human-readable error messages for debugging and logging purposes.
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::TooShort => "datagram ended early".fmt(fmt),
            FrameError::Invalid => "invalid frame".fmt(fmt),
            FrameError::ChecksumMismatch => "checksum mismatch".fmt(fmt),
            FrameError::DecryptionFailed(e) => write!(fmt, "decryption failed: {}", e),
        }
    }
}

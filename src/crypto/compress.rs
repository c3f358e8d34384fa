//! Pluggable compressor hook.
//!
//! Mirrors the placeholder nature of the reference implementation's
//! `protocol_compress`/`protocol_uncompress`: the insertion point is real,
//! the only shipped implementation is the identity function.

/// In-place compressor, applied before encryption on send and after
/// decryption on receive.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &mut Vec<u8>) -> crate::Result<()>;
    fn decompress(&self, data: &mut Vec<u8>) -> crate::Result<()>;
}

/// No-op compressor: both operations leave `data` unchanged.
#[derive(Default)]
pub struct IdentityCompressor;

impl Compressor for IdentityCompressor {
    fn compress(&self, _data: &mut Vec<u8>) -> crate::Result<()> {
        Ok(())
    }

    fn decompress(&self, _data: &mut Vec<u8>) -> crate::Result<()> {
        Ok(())
    }
}

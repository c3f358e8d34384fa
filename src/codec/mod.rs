//! Wire codec: frame definitions, checksum, and the marshal/unmarshal pipeline.

pub(crate) mod checksum;
pub mod errors;
pub mod frame;
pub mod parser;

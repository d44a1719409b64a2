//! Semantic types shared between the wire parsers and the pipelines.

pub mod bgp;
pub mod network;
#[cfg(feature = "cli")]
pub mod row;

pub use bgp::*;
pub use network::*;
#[cfg(feature = "cli")]
pub use row::*;

/// Errors constructing a model value from already-validated wire bytes
/// (as opposed to [`crate::error::ParserError`], which covers wire decoding).
#[derive(Debug, thiserror::Error)]
pub enum BgpModelsError {
    #[error("invalid network prefix: {0}")]
    InvalidPrefix(#[from] ipnet::AddrParseError),
}

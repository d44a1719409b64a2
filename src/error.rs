//! Shared error types for the wire-decoding layer (frame codec, BMP parser, BGP parser).
//!
//! These are concrete, matchable enums per the error-type boundary: call sites use them to
//! pick the right `parse_errors_total{stage,reason}` label. Service-layer errors that don't
//! need to be matched (DB setup, broker construction, config loading) are `anyhow::Error`.

use num_enum::TryFromPrimitiveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("unexpected end of input")]
    Eof,
    #[error("truncated message: {0}")]
    Truncated(String),
    #[error("unsupported value: {0}")]
    Unsupported(String),
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl<T> From<TryFromPrimitiveError<T>> for ParserError
where
    T: num_enum::TryFromPrimitive,
    T::Primitive: std::fmt::Display,
{
    fn from(value: TryFromPrimitiveError<T>) -> Self {
        ParserError::Unsupported(format!("{}", value.number))
    }
}

/// Errors from decoding the outer OpenBMP envelope (§4.1).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    #[error("frame shorter than the minimum header size")]
    FrameTooShort,
    #[error("unrecognized magic number or version")]
    BadMagicOrVersion,
    #[error("declared message length is zero")]
    ZeroMsgLen,
    #[error("declared message length exceeds the configured limit")]
    MsgLenExceedsLimit,
    #[error("frame truncated before the declared message length")]
    FrameTruncated,
}

/// Errors from parsing the BMP message layer (§4.2).
#[derive(Debug, Error)]
pub enum BmpParseError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error("common header invariant violated: {0}")]
    InvalidCommonHeader(String),
    #[error("no BMP messages could be decoded from the payload")]
    EmptyResult,
}

impl<T> From<TryFromPrimitiveError<T>> for BmpParseError
where
    T: num_enum::TryFromPrimitive,
    ParserError: From<TryFromPrimitiveError<T>>,
{
    fn from(value: TryFromPrimitiveError<T>) -> Self {
        BmpParseError::Parser(ParserError::from(value))
    }
}

/// Errors from parsing a single BGP UPDATE message (§4.3).
#[derive(Debug, Error)]
pub enum BgpParseError {
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error("unexpected BGP message type {0}, expected UPDATE (2)")]
    WrongMessageType(u8),
    #[error("invalid prefix length {0} for AFI {1:?}")]
    InvalidPrefixLength(u8, crate::models::Afi),
}

impl<T> From<TryFromPrimitiveError<T>> for BgpParseError
where
    T: num_enum::TryFromPrimitive,
    ParserError: From<TryFromPrimitiveError<T>>,
{
    fn from(value: TryFromPrimitiveError<T>) -> Self {
        BgpParseError::Parser(ParserError::from(value))
    }
}

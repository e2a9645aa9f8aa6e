//! Protocol-level error type.

use thiserror::Error;

use crate::value::DataType;

/// Errors produced while encoding or decoding TDS 5.0 wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The buffer ended before a complete item could be read.
    #[error("unexpected end of buffer")]
    UnexpectedEof,

    /// A packet header carried an unrecognized type byte.
    #[error("invalid packet type: 0x{0:02x}")]
    InvalidPacketType(u8),

    /// A packet header declared a length smaller than the header itself
    /// or larger than the maximum packet size.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(usize),

    /// A token id that is neither modeled nor skippable.
    #[error("unknown token: 0x{0:02x}")]
    UnknownToken(u8),

    /// A column or parameter format carried an unrecognized datatype byte.
    #[error("unknown datatype: 0x{0:02x}")]
    UnknownDatatype(u8),

    /// A length-prefixed value declared a length that is not valid for
    /// its datatype.
    #[error("invalid length {length} for datatype 0x{datatype:02x}")]
    InvalidValueLength {
        /// Raw datatype byte.
        datatype: u8,
        /// Declared length.
        length: usize,
    },

    /// Character data that is not valid UTF-8.
    #[error("invalid utf-8 in character data")]
    InvalidUtf8,

    /// A row token arrived before any row format token.
    #[error("row data without a preceding row format")]
    MissingRowFormat,

    /// A params token arrived before any parameter format token.
    #[error("parameter data without a preceding parameter format")]
    MissingParamsFormat,

    /// A value cannot be represented in the wire datatype requested by
    /// the server's parameter format.
    #[error("value not encodable as {0:?}")]
    Unencodable(DataType),

    /// The number of values does not match the format they are encoded
    /// against.
    #[error("expected {expected} values, got {actual}")]
    ParameterCountMismatch {
        /// Entries in the format token.
        expected: usize,
        /// Values supplied.
        actual: usize,
    },
}

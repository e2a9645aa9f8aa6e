//! # tds5-protocol
//!
//! Pure implementation of the TDS 5.0 wire protocol spoken by
//! Sybase-family database servers (ASE, SQL Anywhere in TDS mode).
//!
//! This crate provides packet structures, token parsing, and request
//! serialization. It is intentionally IO-agnostic: no networking logic
//! and no assumptions about the async runtime. The `sybase-client`
//! crate builds the connection machinery on top of it.
//!
//! ## Layers
//!
//! - [`packet`] — the 8-byte packet header and framing constants.
//! - [`token`] — the token stream: reply tokens via [`TokenParser`],
//!   request tokens via the `encode_*` functions.
//! - [`value`] — scalar datatypes and value encoding.
//! - [`login`] — the fixed-layout TDS 5.0 login record.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod login;
pub mod packet;
pub mod token;
pub mod value;

pub use error::ProtocolError;
pub use login::LoginRequest;
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use token::{
    Capability, ColumnFormat, Done, DoneStatus, Dynamic, DynamicFlags, DynamicOp, Eed, EnvChange,
    EnvChangeKind, EnvUpdate, LoginAck, LoginStatus, OrderBy, Params, ParamsFormat, Row, RowFormat,
    TdsVersion, Token, TokenKind, TokenParser, encode_dynamic, encode_language, encode_logout,
    encode_params, encode_return_status, encode_row,
};
pub use value::{DataType, Value, decode_value, encode_value};

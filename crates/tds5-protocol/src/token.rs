//! TDS 5.0 token stream definitions.
//!
//! Tokens are the units of a TDS message body. The server replies to
//! every request with a stream of tokens describing result metadata,
//! rows, completion status, and session changes; the client sends small
//! token streams of its own (language, dynamic, params).
//!
//! Each token begins with a one-byte identifier. Most variable-size
//! tokens carry a little-endian length prefix; a few (row, params,
//! done, return status) are delimited by their content alone and need
//! the preceding format token as decoding context. [`TokenParser`]
//! keeps that context internally.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{read_u8_string, read_u16_string, write_u8_string};
use crate::error::ProtocolError;
use crate::value::{DataType, Value, decode_value, encode_value};

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    /// Language request (LANGUAGE).
    Language = 0x21,
    /// Row format, wide variant with labels (ROWFMT2).
    RowFormat2 = 0x61,
    /// Logout request (LOGOUT).
    Logout = 0x71,
    /// Stored procedure return status (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Result ordering information (ORDERBY).
    OrderBy = 0xA9,
    /// Login acknowledgement (LOGINACK).
    LoginAck = 0xAD,
    /// Row data (ROW).
    Row = 0xD1,
    /// Parameter data (PARAMS).
    Params = 0xD7,
    /// Capability negotiation (CAPABILITY).
    Capability = 0xE2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// Extended error data, the server message token (EED).
    Eed = 0xE5,
    /// Dynamic SQL request/acknowledgement (DYNAMIC).
    Dynamic = 0xE7,
    /// Parameter format (PARAMFMT).
    ParamsFormat = 0xEC,
    /// Row format (ROWFMT).
    RowFormat = 0xEE,
    /// Statement completion (DONE).
    Done = 0xFD,
    /// Stored procedure completion (DONEPROC).
    DoneProc = 0xFE,
    /// Completion inside a stored procedure (DONEINPROC).
    DoneInProc = 0xFF,
}

impl TokenKind {
    /// Create a token kind from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x21 => Some(Self::Language),
            0x61 => Some(Self::RowFormat2),
            0x71 => Some(Self::Logout),
            0x79 => Some(Self::ReturnStatus),
            0xA9 => Some(Self::OrderBy),
            0xAD => Some(Self::LoginAck),
            0xD1 => Some(Self::Row),
            0xD7 => Some(Self::Params),
            0xE2 => Some(Self::Capability),
            0xE3 => Some(Self::EnvChange),
            0xE5 => Some(Self::Eed),
            0xE7 => Some(Self::Dynamic),
            0xEC => Some(Self::ParamsFormat),
            0xEE => Some(Self::RowFormat),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            _ => None,
        }
    }
}

bitflags! {
    /// Done token status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DoneStatus: u16 {
        /// More completion tokens follow for this request.
        const MORE = 0x0001;
        /// The statement ended in error.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const TRANS = 0x0004;
        /// Completion of a stored procedure.
        const PROC = 0x0008;
        /// The row count field is valid.
        const COUNT = 0x0010;
        /// Acknowledgement of an attention signal.
        const ATTN = 0x0020;
        /// Completion of an event.
        const EVENT = 0x0040;
    }
}

bitflags! {
    /// Dynamic token status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DynamicFlags: u8 {
        /// The execute request is followed by parameter tokens.
        const HAS_ARGS = 0x02;
    }
}

/// Negotiated TDS protocol version, as four wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdsVersion(pub [u8; 4]);

impl TdsVersion {
    /// The version this client requests: TDS 5.0.
    pub const V5_0: Self = Self([5, 0, 0, 0]);
}

impl std::fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// Login acknowledgement sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginStatus {
    /// Login accepted, the session is usable.
    Succeeded = 5,
    /// Login rejected.
    Failed = 6,
    /// The server wants a security negotiation exchange.
    Negotiate = 7,
}

impl LoginStatus {
    fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            5 => Ok(Self::Succeeded),
            6 => Ok(Self::Failed),
            7 => Ok(Self::Negotiate),
            _ => Err(ProtocolError::UnknownToken(value)),
        }
    }
}

/// Login acknowledgement token.
#[derive(Debug, Clone)]
pub struct LoginAck {
    /// Login sub-state.
    pub status: LoginStatus,
    /// TDS version the server selected.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub server_name: String,
    /// Server program version bytes.
    pub server_version: [u8; 4],
}

impl LoginAck {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let status = LoginStatus::from_u8(src.get_u8())?;
        let mut tds_version = [0u8; 4];
        src.copy_to_slice(&mut tds_version);
        let server_name = read_u8_string(src)?;
        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let mut server_version = [0u8; 4];
        src.copy_to_slice(&mut server_version);
        Ok(Self {
            status,
            tds_version: TdsVersion(tds_version),
            server_name,
            server_version,
        })
    }

    /// Encode the token, including its identifier and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let name = self.server_name.as_bytes();
        let len = 1 + 4 + 1 + name.len() + 4;
        dst.put_u8(TokenKind::LoginAck as u8);
        dst.put_u16_le(len as u16);
        dst.put_u8(self.status as u8);
        dst.put_slice(&self.tds_version.0);
        write_u8_string(dst, &self.server_name);
        dst.put_slice(&self.server_version);
    }
}

/// Capability negotiation token: two bitmask blocks, one for requested
/// capabilities and one for the server's response.
#[derive(Debug, Clone, Default)]
pub struct Capability {
    /// Request bitmask (client -> server, echoed by the server).
    pub request: Bytes,
    /// Response bitmask (server -> client).
    pub response: Bytes,
}

/// Request capability mask sent at login: all request bits of interest
/// to this client set.
const CAPABILITY_REQUEST: [u8; 14] = [
    0x01, 0xEF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xD6,
];

impl Capability {
    /// The capability request block this client sends at login.
    #[must_use]
    pub fn request_default() -> Self {
        Self {
            request: Bytes::from_static(&CAPABILITY_REQUEST),
            response: Bytes::new(),
        }
    }

    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut cap = Self::default();
        while src.has_remaining() {
            if src.remaining() < 2 {
                return Err(ProtocolError::UnexpectedEof);
            }
            let block_type = src.get_u8();
            let len = src.get_u8() as usize;
            if src.remaining() < len {
                return Err(ProtocolError::UnexpectedEof);
            }
            let mask = src.copy_to_bytes(len);
            match block_type {
                1 => cap.request = mask,
                2 => cap.response = mask,
                _ => {}
            }
        }
        Ok(cap)
    }

    /// Encode the token, including its identifier and length prefix.
    /// Empty blocks are omitted.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut len = 0;
        if !self.request.is_empty() {
            len += 2 + self.request.len();
        }
        if !self.response.is_empty() {
            len += 2 + self.response.len();
        }
        dst.put_u8(TokenKind::Capability as u8);
        dst.put_u16_le(len as u16);
        if !self.request.is_empty() {
            dst.put_u8(1);
            dst.put_u8(self.request.len() as u8);
            dst.put_slice(&self.request);
        }
        if !self.response.is_empty() {
            dst.put_u8(2);
            dst.put_u8(self.response.len() as u8);
            dst.put_slice(&self.response);
        }
    }
}

/// Environment change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvChangeKind {
    /// Current database changed.
    Database,
    /// Session language changed.
    Language,
    /// Character set changed.
    CharSet,
    /// Packet size renegotiated.
    PacketSize,
    /// Any other change, kept with its raw type byte.
    Other(u8),
}

impl EnvChangeKind {
    /// Create an environment change kind from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::CharSet,
            4 => Self::PacketSize,
            other => Self::Other(other),
        }
    }

    /// Raw wire byte for this kind.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Database => 1,
            Self::Language => 2,
            Self::CharSet => 3,
            Self::PacketSize => 4,
            Self::Other(v) => v,
        }
    }
}

/// One environment update within an ENVCHANGE token.
#[derive(Debug, Clone)]
pub struct EnvUpdate {
    /// What changed.
    pub kind: EnvChangeKind,
    /// New value.
    pub new_value: String,
    /// Previous value.
    pub old_value: String,
}

/// Environment change token.
#[derive(Debug, Clone)]
pub struct EnvChange {
    /// Updates in arrival order.
    pub changes: Vec<EnvUpdate>,
}

impl EnvChange {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut changes = Vec::new();
        while src.has_remaining() {
            let kind = EnvChangeKind::from_u8(src.get_u8());
            let new_value = read_u8_string(src)?;
            let old_value = read_u8_string(src)?;
            changes.push(EnvUpdate {
                kind,
                new_value,
                old_value,
            });
        }
        Ok(Self { changes })
    }

    /// Encode the token, including its identifier and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let len: usize = self
            .changes
            .iter()
            .map(|c| 1 + 1 + c.new_value.len() + 1 + c.old_value.len())
            .sum();
        dst.put_u8(TokenKind::EnvChange as u8);
        dst.put_u16_le(len as u16);
        for change in &self.changes {
            dst.put_u8(change.kind.as_u8());
            write_u8_string(dst, &change.new_value);
            write_u8_string(dst, &change.old_value);
        }
    }
}

/// One column (or parameter) descriptor within a format token.
#[derive(Debug, Clone)]
pub struct ColumnFormat {
    /// Display label; empty unless the wide format variant was sent.
    pub label_name: String,
    /// Underlying column or parameter name.
    pub column_name: String,
    /// Column status bits.
    pub status: u32,
    /// User type id.
    pub user_type: i32,
    /// Wire datatype.
    pub datatype: DataType,
    /// Maximum length for variable-length datatypes, 0 otherwise.
    pub max_length: u32,
    /// Locale string, usually empty.
    pub locale: String,
}

impl ColumnFormat {
    /// The name results should be keyed by: the label when present,
    /// the column name otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.label_name.is_empty() {
            &self.column_name
        } else {
            &self.label_name
        }
    }

    fn decode_type(&mut self, src: &mut impl Buf) -> Result<(), ProtocolError> {
        if src.remaining() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }
        self.user_type = src.get_i32_le();
        self.datatype = DataType::from_u8(src.get_u8())?;
        if self.datatype.has_length_field() {
            if src.remaining() < 1 {
                return Err(ProtocolError::UnexpectedEof);
            }
            self.max_length = u32::from(src.get_u8());
        }
        self.locale = read_u8_string(src)?;
        Ok(())
    }

    fn encode_type(&self, dst: &mut impl BufMut) {
        dst.put_i32_le(self.user_type);
        dst.put_u8(self.datatype as u8);
        if self.datatype.has_length_field() {
            dst.put_u8(self.max_length as u8);
        }
        write_u8_string(dst, &self.locale);
    }

    fn encoded_type_len(&self) -> usize {
        4 + 1 + usize::from(self.datatype.has_length_field()) + 1 + self.locale.len()
    }

    fn empty() -> Self {
        Self {
            label_name: String::new(),
            column_name: String::new(),
            status: 0,
            user_type: 0,
            datatype: DataType::IntN,
            max_length: 0,
            locale: String::new(),
        }
    }
}

/// Row format token describing the columns of a result set.
#[derive(Debug, Clone)]
pub struct RowFormat {
    /// Column descriptors in result order.
    pub columns: Vec<ColumnFormat>,
}

impl RowFormat {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let count = src.get_u16_le() as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let mut column = ColumnFormat::empty();
            column.column_name = read_u8_string(src)?;
            if src.remaining() < 1 {
                return Err(ProtocolError::UnexpectedEof);
            }
            column.status = u32::from(src.get_u8());
            column.decode_type(src)?;
            columns.push(column);
        }
        Ok(Self { columns })
    }

    fn decode_wide(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let count = src.get_u16_le() as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let mut column = ColumnFormat::empty();
            column.label_name = read_u8_string(src)?;
            let _catalog = read_u8_string(src)?;
            let _schema = read_u8_string(src)?;
            let _table = read_u8_string(src)?;
            column.column_name = read_u8_string(src)?;
            if src.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            column.status = src.get_u32_le();
            column.decode_type(src)?;
            columns.push(column);
        }
        Ok(Self { columns })
    }

    /// Encode the token, including its identifier and length prefix.
    /// The wide variant is used when any column carries a label.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let wide = self.columns.iter().any(|c| !c.label_name.is_empty());
        let mut body = BytesMut::new();
        body.put_u16_le(self.columns.len() as u16);
        for column in &self.columns {
            if wide {
                write_u8_string(&mut body, &column.label_name);
                write_u8_string(&mut body, "");
                write_u8_string(&mut body, "");
                write_u8_string(&mut body, "");
                write_u8_string(&mut body, &column.column_name);
                body.put_u32_le(column.status);
            } else {
                write_u8_string(&mut body, &column.column_name);
                body.put_u8(column.status as u8);
            }
            column.encode_type(&mut body);
        }
        if wide {
            dst.put_u8(TokenKind::RowFormat2 as u8);
            dst.put_u32_le(body.len() as u32);
        } else {
            dst.put_u8(TokenKind::RowFormat as u8);
            dst.put_u16_le(body.len() as u16);
        }
        dst.put_slice(&body);
    }
}

/// Parameter format token.
///
/// The raw encoding is retained so a prepared statement can replay the
/// exact token ahead of its parameter data at execute time.
#[derive(Debug, Clone, Default)]
pub struct ParamsFormat {
    /// Verbatim token bytes as received, identifier and length included.
    pub raw: Bytes,
    /// Parameter descriptors in wire order.
    pub params: Vec<ColumnFormat>,
}

impl ParamsFormat {
    /// Build a format from descriptors, computing the raw encoding.
    #[must_use]
    pub fn from_params(params: Vec<ColumnFormat>) -> Self {
        let mut body = BytesMut::new();
        body.put_u16_le(params.len() as u16);
        for param in &params {
            write_u8_string(&mut body, &param.column_name);
            body.put_u8(param.status as u8);
            param.encode_type(&mut body);
        }
        let mut raw = BytesMut::with_capacity(3 + body.len());
        raw.put_u8(TokenKind::ParamsFormat as u8);
        raw.put_u16_le(body.len() as u16);
        raw.put_slice(&body);
        Self {
            raw: raw.freeze(),
            params,
        }
    }

    fn decode(src: &mut impl Buf, raw: Bytes) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let count = src.get_u16_le() as usize;
        let mut params = Vec::with_capacity(count);
        for _ in 0..count {
            let mut param = ColumnFormat::empty();
            param.column_name = read_u8_string(src)?;
            if src.remaining() < 1 {
                return Err(ProtocolError::UnexpectedEof);
            }
            param.status = u32::from(src.get_u8());
            param.decode_type(src)?;
            params.push(param);
        }
        Ok(Self { raw, params })
    }

    /// Re-emit the verbatim token bytes.
    pub fn encode_raw(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.raw);
    }
}

/// Row data token.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in result order.
    pub values: Vec<Value>,
}

/// Parameter data token.
#[derive(Debug, Clone)]
pub struct Params {
    /// Parameter values in wire order.
    pub values: Vec<Value>,
}

/// Result ordering token: the column numbers the result is sorted by.
#[derive(Debug, Clone)]
pub struct OrderBy {
    /// 1-based column numbers.
    pub columns: Vec<u8>,
}

impl OrderBy {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut columns = Vec::with_capacity(src.remaining());
        while src.has_remaining() {
            columns.push(src.get_u8());
        }
        Ok(Self { columns })
    }

    /// Encode the token, including its identifier and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenKind::OrderBy as u8);
        dst.put_u16_le(self.columns.len() as u16);
        dst.put_slice(&self.columns);
    }
}

/// Extended error data token: a server message.
#[derive(Debug, Clone)]
pub struct Eed {
    /// Message number.
    pub number: i32,
    /// Message state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Five-byte SQLSTATE, possibly empty.
    pub sql_state: Bytes,
    /// Status byte (0x01 when followed by parameter data).
    pub status: u8,
    /// Transaction state.
    pub tran_state: u16,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number.
    pub line: u16,
}

impl Eed {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 6 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();
        if src.remaining() < 1 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let sql_state_len = src.get_u8() as usize;
        if src.remaining() < sql_state_len {
            return Err(ProtocolError::UnexpectedEof);
        }
        let sql_state = src.copy_to_bytes(sql_state_len);
        if src.remaining() < 3 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let status = src.get_u8();
        let tran_state = src.get_u16_le();
        let message = read_u16_string(src)?;
        let server = read_u8_string(src)?;
        let procedure = read_u8_string(src)?;
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let line = src.get_u16_le();
        Ok(Self {
            number,
            state,
            class,
            sql_state,
            status,
            tran_state,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode the token, including its identifier and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let len = 4
            + 1
            + 1
            + 1
            + self.sql_state.len()
            + 1
            + 2
            + 2
            + self.message.len()
            + 1
            + self.server.len()
            + 1
            + self.procedure.len()
            + 2;
        dst.put_u8(TokenKind::Eed as u8);
        dst.put_u16_le(len as u16);
        dst.put_i32_le(self.number);
        dst.put_u8(self.state);
        dst.put_u8(self.class);
        dst.put_u8(self.sql_state.len() as u8);
        dst.put_slice(&self.sql_state);
        dst.put_u8(self.status);
        dst.put_u16_le(self.tran_state);
        dst.put_u16_le(self.message.len() as u16);
        dst.put_slice(self.message.as_bytes());
        write_u8_string(dst, &self.server);
        write_u8_string(dst, &self.procedure);
        dst.put_u16_le(self.line);
    }
}

/// Dynamic SQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DynamicOp {
    /// Prepare a statement.
    Prepare = 0x01,
    /// Execute a prepared statement.
    Execute = 0x02,
    /// Server acknowledgement of a dynamic request.
    Ack = 0x20,
}

impl DynamicOp {
    fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Prepare),
            0x02 => Ok(Self::Execute),
            0x20 => Ok(Self::Ack),
            other => Err(ProtocolError::UnknownToken(other)),
        }
    }
}

/// Dynamic SQL token.
#[derive(Debug, Clone)]
pub struct Dynamic {
    /// Operation.
    pub op: DynamicOp,
    /// Status flags.
    pub status: DynamicFlags,
    /// Statement identifier.
    pub id: String,
    /// Statement body; empty for execute and acknowledgements.
    pub stmt: String,
}

impl Dynamic {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let op = DynamicOp::from_u8(src.get_u8())?;
        let status = DynamicFlags::from_bits_truncate(src.get_u8());
        let id = read_u8_string(src)?;
        let stmt = if src.remaining() >= 2 {
            read_u16_string(src)?
        } else {
            String::new()
        };
        Ok(Self {
            op,
            status,
            id,
            stmt,
        })
    }

    /// Encode the token, including its identifier and length prefix.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let len = 1 + 1 + 1 + self.id.len() + 2 + self.stmt.len();
        dst.put_u8(TokenKind::Dynamic as u8);
        dst.put_u16_le(len as u16);
        dst.put_u8(self.op as u8);
        dst.put_u8(self.status.bits());
        write_u8_string(dst, &self.id);
        dst.put_u16_le(self.stmt.len() as u16);
        dst.put_slice(self.stmt.as_bytes());
    }
}

/// Done token signalling completion of a statement or procedure.
#[derive(Debug, Clone, Copy)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Transaction state.
    pub tran_state: u16,
    /// Affected or returned row count; valid when `COUNT` is set.
    pub count: u32,
}

impl Done {
    fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 8 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let status = DoneStatus::from_bits_truncate(src.get_u16_le());
        let tran_state = src.get_u16_le();
        let count = src.get_u32_le();
        Ok(Self {
            status,
            tran_state,
            count,
        })
    }

    /// Encode the token, including its identifier.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenKind::Done as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.tran_state);
        dst.put_u32_le(self.count);
    }
}

/// Parsed TDS 5.0 reply token.
#[derive(Debug, Clone)]
pub enum Token {
    /// Login acknowledgement.
    LoginAck(LoginAck),
    /// Capability negotiation.
    Capability(Capability),
    /// Environment change.
    EnvChange(EnvChange),
    /// Row format.
    RowFormat(RowFormat),
    /// Row data.
    Row(Row),
    /// Parameter format.
    ParamsFormat(ParamsFormat),
    /// Parameter data.
    Params(Params),
    /// Return status of a stored procedure.
    ReturnStatus(i32),
    /// Result ordering.
    OrderBy(OrderBy),
    /// Server message.
    Eed(Eed),
    /// Dynamic SQL acknowledgement.
    Dynamic(Dynamic),
    /// Completion.
    Done(Done),
    /// Any token this client does not model, kept verbatim.
    Unknown {
        /// Token identifier.
        id: u8,
        /// Token body, length prefix excluded.
        body: Bytes,
    },
}

/// Streaming token decoder.
///
/// Row and parameter data are decoded against the most recent row or
/// parameter format seen in the same stream.
pub struct TokenParser {
    data: Bytes,
    position: usize,
    row_format: Option<RowFormat>,
    params_format: Option<ParamsFormat>,
}

impl TokenParser {
    /// Create a new token parser over a message payload.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            position: 0,
            row_format: None,
            params_format: None,
        }
    }

    /// Check if there are more bytes to parse.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Parse the next token from the stream.
    ///
    /// Returns `None` when the payload is exhausted.
    pub fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        if !self.has_remaining() {
            return Ok(None);
        }

        let start = self.position;
        let mut buf = &self.data[self.position..];
        let id = buf.get_u8();

        let token = match TokenKind::from_u8(id) {
            Some(TokenKind::LoginAck) => {
                let mut body = Self::length_u16(&mut buf)?;
                Token::LoginAck(LoginAck::decode(&mut body)?)
            }
            Some(TokenKind::Capability) => {
                let mut body = Self::length_u16(&mut buf)?;
                Token::Capability(Capability::decode(&mut body)?)
            }
            Some(TokenKind::EnvChange) => {
                let mut body = Self::length_u16(&mut buf)?;
                Token::EnvChange(EnvChange::decode(&mut body)?)
            }
            Some(TokenKind::Eed) => {
                let mut body = Self::length_u16(&mut buf)?;
                Token::Eed(Eed::decode(&mut body)?)
            }
            Some(TokenKind::Dynamic) => {
                let mut body = Self::length_u16(&mut buf)?;
                Token::Dynamic(Dynamic::decode(&mut body)?)
            }
            Some(TokenKind::OrderBy) => {
                let mut body = Self::length_u16(&mut buf)?;
                Token::OrderBy(OrderBy::decode(&mut body)?)
            }
            Some(TokenKind::RowFormat) => {
                let mut body = Self::length_u16(&mut buf)?;
                Token::RowFormat(RowFormat::decode(&mut body)?)
            }
            Some(TokenKind::RowFormat2) => {
                let mut body = Self::length_u32(&mut buf)?;
                Token::RowFormat(RowFormat::decode_wide(&mut body)?)
            }
            Some(TokenKind::ParamsFormat) => {
                if buf.remaining() < 2 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let declared = u16::from_le_bytes([buf[0], buf[1]]) as usize;
                let total = 1 + 2 + declared;
                if self.data.len() - start < total {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let raw = self.data.slice(start..start + total);
                let mut body = Self::length_u16(&mut buf)?;
                Token::ParamsFormat(ParamsFormat::decode(&mut body, raw)?)
            }
            Some(TokenKind::Row) => {
                let fmt = self
                    .row_format
                    .as_ref()
                    .ok_or(ProtocolError::MissingRowFormat)?;
                let mut values = Vec::with_capacity(fmt.columns.len());
                for column in &fmt.columns {
                    values.push(decode_value(&mut buf, column)?);
                }
                Token::Row(Row { values })
            }
            Some(TokenKind::Params) => {
                let fmt = self
                    .params_format
                    .as_ref()
                    .ok_or(ProtocolError::MissingParamsFormat)?;
                let mut values = Vec::with_capacity(fmt.params.len());
                for param in &fmt.params {
                    values.push(decode_value(&mut buf, param)?);
                }
                Token::Params(Params { values })
            }
            Some(TokenKind::ReturnStatus) => {
                if buf.remaining() < 4 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                Token::ReturnStatus(buf.get_i32_le())
            }
            Some(TokenKind::Done | TokenKind::DoneProc | TokenKind::DoneInProc) => {
                Token::Done(Done::decode(&mut buf)?)
            }
            Some(TokenKind::Language | TokenKind::Logout) => {
                // Request-only tokens never appear in replies.
                return Err(ProtocolError::UnknownToken(id));
            }
            None => {
                // Unmodeled reply tokens in TDS 5.0 carry a u16 length;
                // keep them verbatim so callers can buffer them.
                if buf.remaining() < 2 {
                    return Err(ProtocolError::UnknownToken(id));
                }
                let len = buf.get_u16_le() as usize;
                if buf.remaining() < len {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let body = Bytes::copy_from_slice(&buf[..len]);
                buf.advance(len);
                Token::Unknown { id, body }
            }
        };

        self.position = self.data.len() - buf.len();

        match &token {
            Token::RowFormat(fmt) => self.row_format = Some(fmt.clone()),
            Token::ParamsFormat(fmt) => self.params_format = Some(fmt.clone()),
            _ => {}
        }

        Ok(Some(token))
    }

    fn length_u16<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
        if buf.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let len = buf.get_u16_le() as usize;
        if buf.remaining() < len {
            return Err(ProtocolError::UnexpectedEof);
        }
        let (body, rest) = buf.split_at(len);
        *buf = rest;
        Ok(body)
    }

    fn length_u32<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
        if buf.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(ProtocolError::UnexpectedEof);
        }
        let (body, rest) = buf.split_at(len);
        *buf = rest;
        Ok(body)
    }
}

/// Encode a language request token carrying a SQL text.
///
/// The text is written in the session character set; callers pass it
/// already in UTF-8 and must not convert it again.
pub fn encode_language(dst: &mut impl BufMut, sql: &str) {
    dst.put_u8(TokenKind::Language as u8);
    dst.put_u32_le(1 + sql.len() as u32);
    dst.put_u8(0);
    dst.put_slice(sql.as_bytes());
}

/// Encode a logout request token.
pub fn encode_logout(dst: &mut impl BufMut) {
    dst.put_u8(TokenKind::Logout as u8);
    dst.put_u8(0);
}

/// Encode a dynamic request token.
pub fn encode_dynamic(
    dst: &mut impl BufMut,
    op: DynamicOp,
    status: DynamicFlags,
    id: &str,
    stmt: &str,
) {
    Dynamic {
        op,
        status,
        id: id.to_string(),
        stmt: stmt.to_string(),
    }
    .encode(dst);
}

/// Encode a params data token: the values laid out per the given
/// parameter format.
pub fn encode_params(
    dst: &mut impl BufMut,
    fmt: &ParamsFormat,
    values: &[Value],
) -> Result<(), ProtocolError> {
    if values.len() != fmt.params.len() {
        return Err(ProtocolError::ParameterCountMismatch {
            expected: fmt.params.len(),
            actual: values.len(),
        });
    }
    dst.put_u8(TokenKind::Params as u8);
    for (param, value) in fmt.params.iter().zip(values) {
        encode_value(dst, param, value)?;
    }
    Ok(())
}

/// Encode a row data token: the values laid out per the given row
/// format. Reply-side counterpart of [`encode_params`], used by tests
/// and mock servers.
pub fn encode_row(
    dst: &mut impl BufMut,
    fmt: &RowFormat,
    values: &[Value],
) -> Result<(), ProtocolError> {
    if values.len() != fmt.columns.len() {
        return Err(ProtocolError::ParameterCountMismatch {
            expected: fmt.columns.len(),
            actual: values.len(),
        });
    }
    dst.put_u8(TokenKind::Row as u8);
    for (column, value) in fmt.columns.iter().zip(values) {
        encode_value(dst, column, value)?;
    }
    Ok(())
}

/// Encode a return status token.
pub fn encode_return_status(dst: &mut impl BufMut, status: i32) {
    dst.put_u8(TokenKind::ReturnStatus as u8);
    dst.put_i32_le(status);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse_all(buf: &BytesMut) -> Vec<Token> {
        let mut parser = TokenParser::new(Bytes::copy_from_slice(buf));
        let mut tokens = Vec::new();
        while let Some(token) = parser.next_token().unwrap() {
            tokens.push(token);
        }
        tokens
    }

    fn int_column(name: &str) -> ColumnFormat {
        ColumnFormat {
            label_name: String::new(),
            column_name: name.to_string(),
            status: 0,
            user_type: 0,
            datatype: DataType::IntN,
            max_length: 4,
            locale: String::new(),
        }
    }

    fn varchar_column(label: &str, name: &str) -> ColumnFormat {
        ColumnFormat {
            label_name: label.to_string(),
            column_name: name.to_string(),
            status: 0,
            user_type: 0,
            datatype: DataType::VarChar,
            max_length: 30,
            locale: String::new(),
        }
    }

    #[test]
    fn login_ack_roundtrip() {
        let mut buf = BytesMut::new();
        LoginAck {
            status: LoginStatus::Succeeded,
            tds_version: TdsVersion::V5_0,
            server_name: "Adaptive Server Enterprise".to_string(),
            server_version: [16, 0, 0, 2],
        }
        .encode(&mut buf);

        let tokens = parse_all(&buf);
        assert_eq!(tokens.len(), 1);
        match &tokens[0] {
            Token::LoginAck(ack) => {
                assert_eq!(ack.status, LoginStatus::Succeeded);
                assert_eq!(ack.tds_version, TdsVersion::V5_0);
                assert_eq!(ack.server_name, "Adaptive Server Enterprise");
                assert_eq!(ack.server_version, [16, 0, 0, 2]);
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn env_change_roundtrip() {
        let mut buf = BytesMut::new();
        EnvChange {
            changes: vec![
                EnvUpdate {
                    kind: EnvChangeKind::Database,
                    new_value: "pubs2".to_string(),
                    old_value: "master".to_string(),
                },
                EnvUpdate {
                    kind: EnvChangeKind::PacketSize,
                    new_value: "4096".to_string(),
                    old_value: "512".to_string(),
                },
            ],
        }
        .encode(&mut buf);

        let tokens = parse_all(&buf);
        match &tokens[0] {
            Token::EnvChange(env) => {
                assert_eq!(env.changes.len(), 2);
                assert_eq!(env.changes[0].kind, EnvChangeKind::Database);
                assert_eq!(env.changes[0].new_value, "pubs2");
                assert_eq!(env.changes[1].kind, EnvChangeKind::PacketSize);
                assert_eq!(env.changes[1].new_value, "4096");
                assert_eq!(env.changes[1].old_value, "512");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn done_roundtrip() {
        let mut buf = BytesMut::new();
        Done {
            status: DoneStatus::COUNT | DoneStatus::MORE,
            tran_state: 0,
            count: 7,
        }
        .encode(&mut buf);

        let tokens = parse_all(&buf);
        match &tokens[0] {
            Token::Done(done) => {
                assert!(done.status.contains(DoneStatus::COUNT));
                assert!(done.status.contains(DoneStatus::MORE));
                assert_eq!(done.count, 7);
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn row_format_and_rows_roundtrip() {
        let fmt = RowFormat {
            columns: vec![int_column("id"), varchar_column("", "name")],
        };
        let mut buf = BytesMut::new();
        fmt.encode(&mut buf);
        encode_row(&mut buf, &fmt, &[Value::Int(1), Value::from("alice")]).unwrap();
        encode_row(&mut buf, &fmt, &[Value::Int(2), Value::Null]).unwrap();

        let tokens = parse_all(&buf);
        assert_eq!(tokens.len(), 3);
        match &tokens[1] {
            Token::Row(row) => {
                assert_eq!(row.values, vec![Value::Int(1), Value::from("alice")]);
            }
            other => panic!("unexpected token: {other:?}"),
        }
        match &tokens[2] {
            Token::Row(row) => assert_eq!(row.values, vec![Value::Int(2), Value::Null]),
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn wide_row_format_keeps_labels() {
        let fmt = RowFormat {
            columns: vec![varchar_column("total", "t0_sum")],
        };
        let mut buf = BytesMut::new();
        fmt.encode(&mut buf);

        let tokens = parse_all(&buf);
        match &tokens[0] {
            Token::RowFormat(fmt) => {
                assert_eq!(fmt.columns[0].label_name, "total");
                assert_eq!(fmt.columns[0].column_name, "t0_sum");
                assert_eq!(fmt.columns[0].display_name(), "total");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn params_format_raw_is_verbatim() {
        let fmt = ParamsFormat::from_params(vec![int_column("@p1")]);
        let mut buf = BytesMut::new();
        fmt.encode_raw(&mut buf);

        let tokens = parse_all(&buf);
        match &tokens[0] {
            Token::ParamsFormat(decoded) => {
                assert_eq!(decoded.raw, fmt.raw);
                assert_eq!(decoded.params.len(), 1);
                assert_eq!(decoded.params[0].column_name, "@p1");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn params_decode_uses_preceding_format() {
        let fmt = ParamsFormat::from_params(vec![int_column("@a"), varchar_column("", "@b")]);
        let mut buf = BytesMut::new();
        fmt.encode_raw(&mut buf);
        encode_params(&mut buf, &fmt, &[Value::Int(99), Value::from("x")]).unwrap();

        let tokens = parse_all(&buf);
        match &tokens[1] {
            Token::Params(params) => {
                assert_eq!(params.values, vec![Value::Int(99), Value::from("x")]);
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn row_without_format_is_an_error() {
        let mut parser = TokenParser::new(Bytes::from_static(&[0xD1, 0x00]));
        assert_eq!(
            parser.next_token().unwrap_err(),
            ProtocolError::MissingRowFormat
        );
    }

    #[test]
    fn eed_roundtrip() {
        let mut buf = BytesMut::new();
        Eed {
            number: 207,
            state: 4,
            class: 16,
            sql_state: Bytes::from_static(b"42S22"),
            status: 0,
            tran_state: 0,
            message: "invalid column".to_string(),
            server: "sybase1".to_string(),
            procedure: String::new(),
            line: 1,
        }
        .encode(&mut buf);

        let tokens = parse_all(&buf);
        match &tokens[0] {
            Token::Eed(eed) => {
                assert_eq!(eed.number, 207);
                assert_eq!(eed.class, 16);
                assert_eq!(eed.message, "invalid column");
                assert_eq!(eed.server, "sybase1");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn dynamic_roundtrip() {
        let mut buf = BytesMut::new();
        encode_dynamic(
            &mut buf,
            DynamicOp::Prepare,
            DynamicFlags::empty(),
            "stmt1",
            "create proc stmt1 as select 1",
        );

        let tokens = parse_all(&buf);
        match &tokens[0] {
            Token::Dynamic(dynamic) => {
                assert_eq!(dynamic.op, DynamicOp::Prepare);
                assert_eq!(dynamic.id, "stmt1");
                assert_eq!(dynamic.stmt, "create proc stmt1 as select 1");
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn capability_roundtrip() {
        let mut buf = BytesMut::new();
        Capability {
            request: Bytes::from_static(&CAPABILITY_REQUEST),
            response: Bytes::from_static(&[0x02, 0x01, 0x00]),
        }
        .encode(&mut buf);

        let tokens = parse_all(&buf);
        match &tokens[0] {
            Token::Capability(cap) => {
                assert_eq!(&cap.request[..], &CAPABILITY_REQUEST[..]);
                assert_eq!(&cap.response[..], &[0x02, 0x01, 0x00]);
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn unknown_token_is_kept_verbatim() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xA4);
        buf.put_u16_le(3);
        buf.put_slice(&[1, 2, 3]);
        Done {
            status: DoneStatus::COUNT,
            tran_state: 0,
            count: 0,
        }
        .encode(&mut buf);

        let tokens = parse_all(&buf);
        assert_eq!(tokens.len(), 2);
        match &tokens[0] {
            Token::Unknown { id, body } => {
                assert_eq!(*id, 0xA4);
                assert_eq!(&body[..], &[1, 2, 3]);
            }
            other => panic!("unexpected token: {other:?}"),
        }
    }

    #[test]
    fn language_and_logout_encoding() {
        let mut buf = BytesMut::new();
        encode_language(&mut buf, "select 1");
        assert_eq!(buf[0], TokenKind::Language as u8);
        assert_eq!(u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]), 9);
        assert_eq!(buf[5], 0);
        assert_eq!(&buf[6..], b"select 1");

        let mut buf = BytesMut::new();
        encode_logout(&mut buf);
        assert_eq!(&buf[..], &[TokenKind::Logout as u8, 0]);
    }
}

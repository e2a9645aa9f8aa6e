//! Builders for reply token streams.

use bytes::{Bytes, BytesMut};

use tds5_protocol::token::{
    Capability, ColumnFormat, Done, DoneStatus, Dynamic, DynamicFlags, DynamicOp, Eed, EnvChange,
    EnvChangeKind, EnvUpdate, LoginAck, LoginStatus, OrderBy, ParamsFormat, RowFormat, TdsVersion,
    encode_params, encode_return_status, encode_row,
};
use tds5_protocol::value::{DataType, Value};

/// A nullable integer column descriptor.
#[must_use]
pub fn int_column(name: &str) -> ColumnFormat {
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

/// A varchar column descriptor.
#[must_use]
pub fn varchar_column(name: &str) -> ColumnFormat {
    ColumnFormat {
        label_name: String::new(),
        column_name: name.to_string(),
        status: 0,
        user_type: 0,
        datatype: DataType::VarChar,
        max_length: 255,
        locale: String::new(),
    }
}

/// Assembles a reply payload token by token.
///
/// Row and parameter data are encoded against the most recently added
/// format, mirroring how a server interleaves them on the wire.
#[derive(Debug, Default)]
pub struct ReplyBuilder {
    buf: BytesMut,
    row_format: Option<RowFormat>,
    params_format: Option<ParamsFormat>,
}

impl ReplyBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a login acknowledgement.
    #[must_use]
    pub fn login_ack(mut self, status: LoginStatus) -> Self {
        LoginAck {
            status,
            tds_version: TdsVersion::V5_0,
            server_name: "Adaptive Server Enterprise".to_string(),
            server_version: [16, 0, 0, 2],
        }
        .encode(&mut self.buf);
        self
    }

    /// Append a capability response block.
    #[must_use]
    pub fn capability(mut self) -> Self {
        Capability {
            request: Capability::request_default().request,
            response: Bytes::from_static(&[0x02, 0x06, 0x48, 0x00, 0x00, 0x00, 0x00, 0x00, 0x06]),
        }
        .encode(&mut self.buf);
        self
    }

    /// Append an environment change.
    #[must_use]
    pub fn env_change(mut self, kind: EnvChangeKind, new_value: &str, old_value: &str) -> Self {
        EnvChange {
            changes: vec![EnvUpdate {
                kind,
                new_value: new_value.to_string(),
                old_value: old_value.to_string(),
            }],
        }
        .encode(&mut self.buf);
        self
    }

    /// Append a row format and remember it for subsequent rows.
    #[must_use]
    pub fn row_format(mut self, format: &RowFormat) -> Self {
        format.encode(&mut self.buf);
        self.row_format = Some(format.clone());
        self
    }

    /// Append a row encoded against the last row format.
    ///
    /// # Panics
    ///
    /// Panics if no row format was added or a value does not fit its
    /// column's datatype.
    #[must_use]
    pub fn row(mut self, values: &[Value]) -> Self {
        let format = self.row_format.as_ref().expect("row before row_format");
        encode_row(&mut self.buf, format, values).expect("row values must match the format");
        self
    }

    /// Append a parameter format and remember it for subsequent params.
    #[must_use]
    pub fn params_format(mut self, format: &ParamsFormat) -> Self {
        format.encode_raw(&mut self.buf);
        self.params_format = Some(format.clone());
        self
    }

    /// Append a params token encoded against the last parameter format.
    ///
    /// # Panics
    ///
    /// Panics if no parameter format was added or a value does not fit
    /// its descriptor's datatype.
    #[must_use]
    pub fn params(mut self, values: &[Value]) -> Self {
        let format = self
            .params_format
            .as_ref()
            .expect("params before params_format");
        encode_params(&mut self.buf, format, values).expect("param values must match the format");
        self
    }

    /// Append a return status.
    #[must_use]
    pub fn return_status(mut self, status: i32) -> Self {
        encode_return_status(&mut self.buf, status);
        self
    }

    /// Append a dynamic acknowledgement for a prepared statement.
    #[must_use]
    pub fn dynamic_ack(mut self, id: &str) -> Self {
        Dynamic {
            op: DynamicOp::Ack,
            status: DynamicFlags::empty(),
            id: id.to_string(),
            stmt: String::new(),
        }
        .encode(&mut self.buf);
        self
    }

    /// Append an order-by token.
    #[must_use]
    pub fn order_by(mut self, columns: &[u8]) -> Self {
        OrderBy {
            columns: columns.to_vec(),
        }
        .encode(&mut self.buf);
        self
    }

    /// Append a server message.
    #[must_use]
    pub fn eed(mut self, number: i32, class: u8, message: &str) -> Self {
        Eed {
            number,
            state: 1,
            class,
            sql_state: Bytes::new(),
            status: 0,
            tran_state: 0,
            message: message.to_string(),
            server: "mock".to_string(),
            procedure: String::new(),
            line: 1,
        }
        .encode(&mut self.buf);
        self
    }

    /// Append a done token.
    #[must_use]
    pub fn done(mut self, status: DoneStatus, count: u32) -> Self {
        Done {
            status,
            tran_state: 0,
            count,
        }
        .encode(&mut self.buf);
        self
    }

    /// Finish and return the payload.
    #[must_use]
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

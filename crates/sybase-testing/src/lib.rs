//! # sybase-testing
//!
//! Test support for the TDS 5.0 driver: a scripted mock server that
//! speaks just enough of the protocol to exercise the client, plus
//! builders for assembling reply token streams.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sybase_testing::{MockTdsServer, ReplyBuilder, int_column};
//! use tds5_protocol::{DoneStatus, RowFormat, Value};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let fmt = RowFormat { columns: vec![int_column("x")] };
//!     let reply = ReplyBuilder::new()
//!         .row_format(&fmt)
//!         .row(&[Value::Int(42)])
//!         .done(DoneStatus::COUNT, 1)
//!         .build();
//!
//!     let server = MockTdsServer::builder().reply(reply).start().await.unwrap();
//!     // connect your client to server.addr() ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::expect_used)]

pub mod mock_server;
pub mod reply;

pub use mock_server::{MockServerError, MockTdsServer, MockTdsServerBuilder};
pub use reply::{ReplyBuilder, int_column, varchar_column};

//! # sybase-client
//!
//! Async TDS 5.0 client for Sybase-family database servers.
//!
//! This crate implements the connection core: the login handshake, the
//! packet reassembler, the token-stream consumer, and the decoding of
//! streamed replies into result sets, affected-row counts, and
//! stored-procedure outputs. The wire codec itself lives in
//! [`tds5-protocol`](tds5_protocol).
//!
//! ## Example
//!
//! ```rust,ignore
//! use sybase_client::{Config, Connection, QueryResult};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("db1.internal")
//!         .with_port(5000)
//!         .with_credentials("sa", "secret")
//!         .with_database("pubs2");
//!
//!     let mut conn = Connection::connect(config).await?;
//!
//!     for result in conn.sql_query("select au_id, au_lname from authors").await? {
//!         if let QueryResult::ResultSet(set) = result {
//!             println!("{:?}: {} rows", set.columns, set.rows.len());
//!         }
//!     }
//!
//!     conn.prepare("s1", "select * from authors where au_id = @id").await?;
//!     let results = conn.execute("s1", &["172-32-1176".into()]).await?;
//!     println!("{results:?}");
//!
//!     let _env = conn.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection model
//!
//! A [`Connection`] is a single-session value: every operation borrows
//! it exclusively, and there is no internal locking. Run independent
//! connections for concurrency. A request issued on a disconnected
//! session triggers exactly one reconnect (using the preserved
//! environment) before the request is sent.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod reply;
pub mod state;
pub mod statements;
mod transport;

pub use config::{Config, TimeoutConfig};
pub use connection::{Capabilities, Connection, ServerIdentity};
pub use env::{EnvKey, Environment};
pub use error::{Error, ErrorKind, Result};
pub use reply::{ProcedureResult, QueryResult, ResultSet};
pub use state::SessionState;
pub use statements::StatementRegistry;

// Re-export the value types callers pass to `execute` and get back in
// result sets.
pub use tds5_protocol::value::{DataType, Value};

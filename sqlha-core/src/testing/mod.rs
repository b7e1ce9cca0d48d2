//! In-memory test doubles.
//!
//! [`MockSqlServer`] simulates a fleet of SQL Server instances sharing one
//! availability-group catalogue. It implements
//! [`DatabaseConnector`](crate::db::DatabaseConnector), so formation logic can
//! run end to end without a database:
//!
//! ```
//! use sqlha_core::testing::MockSqlServer;
//!
//! let fleet = MockSqlServer::new();
//! fleet.add_node("n1", "10.0.0.1");
//! fleet.start("n1", "Secret#1");
//! assert!(fleet.is_running("n1"));
//! ```

mod sql_server;

pub use sql_server::{DbCall, DbOp, DbOpKind, GroupSnapshot, MockSqlServer};

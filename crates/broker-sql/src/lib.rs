//! Target-database query execution against MSSQL.
//!
//! Three pieces: a per-worker connection pool (`pool`), the query
//! runner that enforces `MSSQL_QUERY_TIMEOUT` (`executor`), and the
//! cell-value conversion rules applied before rows reach the CSV
//! encoder (`cell`).

pub mod cell;
pub mod error;
pub mod executor;
pub mod pool;

pub use cell::CellValue;
pub use error::SqlError;
pub use executor::{execute_streaming, BatchControl, BatchSink};
pub use pool::{MssqlPool, PoolConfig};

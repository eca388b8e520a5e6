//! SQL-backed sources.

pub mod driver;
pub mod memory;
pub mod source;
pub mod stream;

pub use driver::{
    ColumnDescriptor, ConnectionPool, Cursor, PreparedStatement, RowSet, SqlConnection, SqlType,
    Transaction,
};
pub use memory::{CounterSnapshot, Delivery, MemoryDatabase, QueryResult};
pub use source::SqlSource;
pub use stream::{MetadataRowStream, SqlResources, StreamOptions};

//! A row stream paired with its shared schema.

use std::fmt;
use std::sync::Arc;

use querypipe_core::row::Row;
use querypipe_core::schema::Schema;

use crate::protocol::ReadStream;

/// What pipeline stages hand each other: the rows and the schema every row refers to.
#[derive(Clone)]
pub struct TypedStream {
    pub stream: Arc<dyn ReadStream<Row>>,
    pub schema: Schema,
}

impl TypedStream {
    pub fn new(stream: Arc<dyn ReadStream<Row>>, schema: Schema) -> Self {
        Self { stream, schema }
    }
}

impl fmt::Debug for TypedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedStream")
            .field("schema", &self.schema)
            .finish()
    }
}

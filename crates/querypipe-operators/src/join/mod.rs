//! Joining processors: a primary stream enriched from a key-sorted secondary stream.
//!
//! `merge` is the generic sort-merge engine. The variants (`merge_all`, `group_concat`,
//! `dynamic_field`) only decide which columns a joined row gains and how the matching
//! secondary rows fill them; `processor` wires a variant to the engine.

pub mod compare;
pub mod descriptor;
pub mod dynamic_field;
pub mod group_concat;
pub mod merge;
pub mod merge_all;
pub mod processor;

use querypipe_core::error::Result;
use querypipe_core::row::Row;
use querypipe_core::schema::Schema;

pub use compare::KeyComparator;
pub use descriptor::{JoinDescriptor, JoinVariant, PivotSpec};
pub use dynamic_field::{DynamicFields, FieldDefn};
pub use group_concat::GroupConcat;
pub use merge::{CombineFn, CompareFn, MergeStats, MergeStream, Watermarks};
pub use merge_all::MergeAll;
pub use processor::JoiningProcessor;

/// Writes the contribution of a primary row's matches into that row.
pub trait RowCombiner: Send + Sync {
    /// Declare every column this combiner may write on the primary schema.
    ///
    /// Fails with `Error::Schema` when a column already exists there with another type.
    fn register_columns(&self, target: &Schema) -> Result<()>;

    fn combine(&self, primary: Row, matches: Vec<Row>) -> Result<Row>;
}

#![forbid(unsafe_code)]
//! querypipe-operators: pipeline processors.
//!
//! Design intent:
//! - Every processor speaks the stream protocol on both sides; none buffers more than
//!   its configured watermarks allow.
//! - Joins are sort-merge joins over key-sorted inputs. Variants only decide what a
//!   joined row gains; the engine owns ordering, backpressure and termination.
//! - Build-time problems (bad keys, missing variant parameters) surface as
//!   `Error::Config` before any stream opens.

pub mod join;
pub mod limit;
pub mod lookup;
pub mod offset;
pub mod traits;

pub use join::{JoinDescriptor, JoinVariant, JoiningProcessor, MergeStream, Watermarks};
pub use limit::{Limit, LimitStream};
pub use lookup::{validate_lookup, Lookup, LookupStream, LookupTable};
pub use offset::{Offset, OffsetStream};
pub use traits::{PipelineFactory, Processor};

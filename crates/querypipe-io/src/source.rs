//! Source trait.

use querypipe_stream::{ExecContext, Ready, TypedStream};

/// Head of a pipeline. Initialization is asynchronous: the stream is handed over once
/// its schema is known.
pub trait Source: Send {
    fn name(&self) -> &str;

    fn initialize(self: Box<Self>, ctx: &ExecContext) -> Ready<TypedStream>;
}

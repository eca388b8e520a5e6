#![forbid(unsafe_code)]
//! querypipe-stream: the demand-driven stream protocol every pipeline stage speaks.
//!
//! Design intent:
//! - Producers start with zero demand; consumers pull with `fetch(n)` or `resume()`.
//! - Every producer terminates exactly once, with either end or error.
//! - Handlers are always invoked with no internal lock held, so a consumer may call
//!   back into the stream (pause, fetch, detach) from inside a handler.
//! - Emission is scheduled onto an `ExecContext`; producers may deliver upstream results
//!   from any thread, but downstream handlers run on the context.

pub mod capture;
pub mod context;
pub mod demand;
pub mod list;
pub mod protocol;
pub mod ready;
pub mod typed;

pub use capture::{capture, capture_by_batch};
pub use context::ExecContext;
pub use demand::Demand;
pub use list::ListStream;
pub use protocol::{DataHandler, EndHandler, ErrorHandler, Handlers, ReadStream};
pub use ready::Ready;
pub use typed::TypedStream;

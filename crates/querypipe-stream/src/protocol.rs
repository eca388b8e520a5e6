//! The read-stream contract.

use std::sync::Arc;

use querypipe_core::error::Error;

pub type DataHandler<T> = Arc<dyn Fn(T) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;
pub type EndHandler = Arc<dyn Fn() + Send + Sync>;

/// A demand-driven producer of `T`.
///
/// Contract:
/// - Handlers may be replaced at any time; `None` detaches. Detaching the data handler
///   cancels the stream and releases whatever it holds. Detaching twice is harmless.
/// - Items are delivered only while demand is positive. `fetch(n)` adds `n` to the
///   outstanding demand (saturating), `resume()` makes it unbounded, `pause()` zeroes it.
/// - Exactly one of end or error is signalled, once, and nothing is delivered after it.
pub trait ReadStream<T>: Send + Sync {
    fn set_data_handler(&self, handler: Option<DataHandler<T>>);
    fn set_error_handler(&self, handler: Option<ErrorHandler>);
    fn set_end_handler(&self, handler: Option<EndHandler>);
    fn pause(&self);
    fn resume(&self);
    fn fetch(&self, n: u64);
}

/// Handler slots plus the terminal flag, shared by every producer implementation.
pub struct Handlers<T> {
    pub data: Option<DataHandler<T>>,
    pub error: Option<ErrorHandler>,
    pub end: Option<EndHandler>,
    terminated: bool,
}

impl<T> Default for Handlers<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            end: None,
            terminated: false,
        }
    }
}

impl<T> Handlers<T> {
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Mark the stream terminated without signalling (cancellation).
    pub fn cancel(&mut self) {
        self.terminated = true;
        self.data = None;
    }

    /// Transition to ended. Returns the end handler to invoke, or `None` if the stream
    /// had already terminated.
    pub fn terminate_end(&mut self) -> Option<Option<EndHandler>> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        self.data = None;
        Some(self.end.clone())
    }

    /// Transition to failed. Returns the error handler to invoke, or `None` if the
    /// stream had already terminated.
    pub fn terminate_error(&mut self) -> Option<Option<ErrorHandler>> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        self.data = None;
        Some(self.error.clone())
    }
}

/// Invoke an error handler, logging the error if nobody is listening.
pub fn signal_error(handler: Option<ErrorHandler>, err: Error, stream: &str) {
    match handler {
        Some(h) => h(err),
        None => tracing::warn!(stream, error = %err, "stream failed with no error handler"),
    }
}

/// Invoke an end handler if one is attached.
pub fn signal_end(handler: Option<EndHandler>) {
    if let Some(h) = handler {
        h();
    }
}

/// Wrap a closure as a data handler.
pub fn on_data<T, F>(f: F) -> Option<DataHandler<T>>
where
    F: Fn(T) + Send + Sync + 'static,
{
    Some(Arc::new(f))
}

pub fn on_error<F>(f: F) -> Option<ErrorHandler>
where
    F: Fn(Error) + Send + Sync + 'static,
{
    Some(Arc::new(f))
}

pub fn on_end<F>(f: F) -> Option<EndHandler>
where
    F: Fn() + Send + Sync + 'static,
{
    Some(Arc::new(f))
}

/// Detach every handler, cancelling the stream.
pub fn detach<T>(stream: &dyn ReadStream<T>) {
    stream.set_data_handler(None);
    stream.set_error_handler(None);
    stream.set_end_handler(None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminates_once() {
        let mut h: Handlers<u32> = Handlers::default();
        h.end = on_end(|| {});
        assert!(matches!(h.terminate_end(), Some(Some(_))));
        assert!(h.terminate_end().is_none());
        assert!(h.terminate_error().is_none());
        assert!(h.is_terminated());
    }

    #[test]
    fn test_error_after_cancel_is_dropped() {
        let mut h: Handlers<u32> = Handlers::default();
        h.cancel();
        assert!(h.terminate_error().is_none());
    }
}

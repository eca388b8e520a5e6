//! Forward at most `n` rows, then end and cancel the upstream.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use querypipe_core::error::Error;
use querypipe_core::row::Row;
use querypipe_stream::protocol::{detach, on_data, on_end, on_error, signal_end, signal_error};
use querypipe_stream::{
    DataHandler, EndHandler, ErrorHandler, ExecContext, Handlers, ReadStream, Ready, TypedStream,
};

use crate::traits::{PipelineFactory, Processor};

struct LimitState<T> {
    remaining: u64,
    attached: bool,
    handlers: Handlers<T>,
}

struct LimitInner<T> {
    ctx: ExecContext,
    upstream: Arc<dyn ReadStream<T>>,
    state: Mutex<LimitState<T>>,
}

pub struct LimitStream<T> {
    inner: Arc<LimitInner<T>>,
}

impl<T: Send + 'static> LimitStream<T> {
    pub fn new(ctx: &ExecContext, upstream: Arc<dyn ReadStream<T>>, limit: u64) -> Self {
        Self {
            inner: Arc::new(LimitInner {
                ctx: ctx.clone(),
                upstream,
                state: Mutex::new(LimitState {
                    remaining: limit,
                    attached: false,
                    handlers: Handlers::default(),
                }),
            }),
        }
    }
}

impl<T: Send + 'static> LimitInner<T> {
    fn attach(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let w = weak.clone();
        this.upstream.set_end_handler(on_end(move || {
            if let Some(inner) = w.upgrade() {
                inner.finish();
            }
        }));
        let w = weak.clone();
        this.upstream.set_error_handler(on_error(move |e| {
            if let Some(inner) = w.upgrade() {
                inner.fail(e);
            }
        }));
        let w = weak;
        this.upstream.set_data_handler(on_data(move |item| {
            if let Some(inner) = w.upgrade() {
                inner.on_item(item);
            }
        }));
    }

    fn on_item(&self, item: T) {
        let (handler, last) = {
            let mut st = self.state.lock();
            if st.handlers.is_terminated() || st.remaining == 0 {
                return;
            }
            st.remaining -= 1;
            (st.handlers.data.clone(), st.remaining == 0)
        };
        if let Some(h) = handler {
            h(item);
        }
        if last {
            tracing::debug!("limit reached, cancelling upstream");
            detach(self.upstream.as_ref());
            self.finish();
        }
    }

    fn finish(&self) {
        let end = self.state.lock().handlers.terminate_end();
        if let Some(end) = end {
            signal_end(end);
        }
    }

    fn fail(&self, err: Error) {
        let handler = self.state.lock().handlers.terminate_error();
        if let Some(handler) = handler {
            signal_error(handler, err, "limit");
        }
    }
}

impl<T: Send + 'static> ReadStream<T> for LimitStream<T> {
    fn set_data_handler(&self, handler: Option<DataHandler<T>>) {
        let Some(handler) = handler else {
            self.inner.state.lock().handlers.cancel();
            detach(self.inner.upstream.as_ref());
            return;
        };
        let (first, exhausted) = {
            let mut st = self.inner.state.lock();
            if st.handlers.is_terminated() {
                return;
            }
            st.handlers.data = Some(handler);
            let first = !std::mem::replace(&mut st.attached, true);
            (first, st.remaining == 0)
        };
        if !first {
            return;
        }
        if exhausted {
            detach(self.inner.upstream.as_ref());
            let inner = Arc::clone(&self.inner);
            self.inner.ctx.run_on_context(move || inner.finish());
        } else {
            LimitInner::attach(&self.inner);
        }
    }

    fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.inner.state.lock().handlers.error = handler;
    }

    fn set_end_handler(&self, handler: Option<EndHandler>) {
        self.inner.state.lock().handlers.end = handler;
    }

    fn pause(&self) {
        self.inner.upstream.pause();
    }

    fn resume(&self) {
        self.inner.upstream.resume();
    }

    fn fetch(&self, n: u64) {
        self.inner.upstream.fetch(n);
    }
}

pub struct Limit {
    name: String,
    limit: u64,
}

impl Limit {
    pub fn new(name: impl Into<String>, limit: u64) -> Self {
        Self {
            name: name.into(),
            limit,
        }
    }
}

impl Processor for Limit {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        self: Box<Self>,
        factory: Arc<dyn PipelineFactory>,
        input: TypedStream,
    ) -> Ready<TypedStream> {
        tracing::debug!(processor = %self.name, limit = self.limit, "initializing limit");
        let stream: Arc<dyn ReadStream<Row>> =
            Arc::new(LimitStream::new(factory.context(), input.stream, self.limit));
        Ready::done(TypedStream::new(stream, input.schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querypipe_stream::{capture, ListStream};

    #[test]
    fn test_limit_truncates() {
        let ctx = ExecContext::new();
        let upstream: Arc<dyn ReadStream<u32>> = Arc::new(ListStream::new(&ctx, 0..10));
        let limited: Arc<dyn ReadStream<u32>> = Arc::new(LimitStream::new(&ctx, upstream, 3));
        let out = capture(limited);
        ctx.run_until_idle();
        assert_eq!(out.result(), Some(Ok(vec![0, 1, 2])));
    }

    #[test]
    fn test_limit_zero_ends_immediately() {
        let ctx = ExecContext::new();
        let upstream: Arc<dyn ReadStream<u32>> = Arc::new(ListStream::new(&ctx, 0..10));
        let limited: Arc<dyn ReadStream<u32>> = Arc::new(LimitStream::new(&ctx, upstream, 0));
        let out = capture(limited);
        ctx.run_until_idle();
        assert_eq!(out.result(), Some(Ok(vec![])));
    }

    #[test]
    fn test_limit_above_length_passes_everything() {
        let ctx = ExecContext::new();
        let upstream: Arc<dyn ReadStream<u32>> = Arc::new(ListStream::new(&ctx, 0..4));
        let limited: Arc<dyn ReadStream<u32>> = Arc::new(LimitStream::new(&ctx, upstream, 10));
        let out = capture(limited);
        ctx.run_until_idle();
        assert_eq!(out.result(), Some(Ok(vec![0, 1, 2, 3])));
    }
}

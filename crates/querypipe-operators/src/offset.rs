//! Discard the first `n` rows.
//!
//! Each discarded row spent a unit of upstream demand that the consumer never saw, so
//! it is requested again while the consumer still has demand outstanding.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use querypipe_core::row::Row;
use querypipe_stream::protocol::{detach, on_data, on_end, on_error, signal_end, signal_error};
use querypipe_stream::{
    DataHandler, Demand, EndHandler, ErrorHandler, Handlers, ReadStream, Ready, TypedStream,
};

use crate::traits::{PipelineFactory, Processor};

struct OffsetState<T> {
    to_skip: u64,
    demand: Demand,
    attached: bool,
    handlers: Handlers<T>,
}

struct OffsetInner<T> {
    upstream: Arc<dyn ReadStream<T>>,
    state: Mutex<OffsetState<T>>,
}

pub struct OffsetStream<T> {
    inner: Arc<OffsetInner<T>>,
}

impl<T: Send + 'static> OffsetStream<T> {
    pub fn new(upstream: Arc<dyn ReadStream<T>>, offset: u64) -> Self {
        Self {
            inner: Arc::new(OffsetInner {
                upstream,
                state: Mutex::new(OffsetState {
                    to_skip: offset,
                    demand: Demand::new(),
                    attached: false,
                    handlers: Handlers::default(),
                }),
            }),
        }
    }
}

enum Step<T> {
    Skip { refetch: bool },
    Deliver(Option<DataHandler<T>>),
}

impl<T: Send + 'static> OffsetInner<T> {
    fn attach(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let w = weak.clone();
        this.upstream.set_end_handler(on_end(move || {
            if let Some(inner) = w.upgrade() {
                let end = inner.state.lock().handlers.terminate_end();
                if let Some(end) = end {
                    signal_end(end);
                }
            }
        }));
        let w = weak.clone();
        this.upstream.set_error_handler(on_error(move |e| {
            if let Some(inner) = w.upgrade() {
                let handler = inner.state.lock().handlers.terminate_error();
                if let Some(handler) = handler {
                    signal_error(handler, e, "offset");
                }
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
        let step = {
            let mut st = self.state.lock();
            if st.handlers.is_terminated() {
                return;
            }
            if st.to_skip > 0 {
                st.to_skip -= 1;
                Step::Skip {
                    refetch: st.demand.has() && !st.demand.is_unbounded(),
                }
            } else {
                st.demand.take_one();
                Step::Deliver(st.handlers.data.clone())
            }
        };
        match step {
            Step::Skip { refetch } => {
                tracing::trace!("offset skipped row");
                if refetch {
                    self.upstream.fetch(1);
                }
            }
            Step::Deliver(Some(h)) => h(item),
            Step::Deliver(None) => {}
        }
    }
}

impl<T: Send + 'static> ReadStream<T> for OffsetStream<T> {
    fn set_data_handler(&self, handler: Option<DataHandler<T>>) {
        let Some(handler) = handler else {
            self.inner.state.lock().handlers.cancel();
            detach(self.inner.upstream.as_ref());
            return;
        };
        let first = {
            let mut st = self.inner.state.lock();
            if st.handlers.is_terminated() {
                return;
            }
            st.handlers.data = Some(handler);
            !std::mem::replace(&mut st.attached, true)
        };
        if first {
            OffsetInner::attach(&self.inner);
        }
    }

    fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        self.inner.state.lock().handlers.error = handler;
    }

    fn set_end_handler(&self, handler: Option<EndHandler>) {
        self.inner.state.lock().handlers.end = handler;
    }

    fn pause(&self) {
        self.inner.state.lock().demand.clear();
        self.inner.upstream.pause();
    }

    fn resume(&self) {
        self.inner.state.lock().demand.set_unbounded();
        self.inner.upstream.resume();
    }

    fn fetch(&self, n: u64) {
        self.inner.state.lock().demand.add(n);
        self.inner.upstream.fetch(n);
    }
}

pub struct Offset {
    name: String,
    offset: u64,
}

impl Offset {
    pub fn new(name: impl Into<String>, offset: u64) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

impl Processor for Offset {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        self: Box<Self>,
        _factory: Arc<dyn PipelineFactory>,
        input: TypedStream,
    ) -> Ready<TypedStream> {
        tracing::debug!(processor = %self.name, offset = self.offset, "initializing offset");
        let stream: Arc<dyn ReadStream<Row>> =
            Arc::new(OffsetStream::new(input.stream, self.offset));
        Ready::done(TypedStream::new(stream, input.schema))
    }
}

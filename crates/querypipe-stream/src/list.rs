//! Stream over an in-memory list.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use querypipe_core::error::Error;

use crate::context::ExecContext;
use crate::demand::Demand;
use crate::protocol::{
    signal_end, signal_error, DataHandler, EndHandler, ErrorHandler, Handlers, ReadStream,
};

struct ListState<T> {
    items: VecDeque<T>,
    delivered: usize,
    fail_after: Option<(usize, Error)>,
    demand: Demand,
    handlers: Handlers<T>,
    scheduled: bool,
}

struct ListInner<T> {
    ctx: ExecContext,
    state: Mutex<ListState<T>>,
}

/// Protocol-compliant producer over a fixed list of items. Delivery happens on the
/// context, one item per unit of demand.
pub struct ListStream<T> {
    inner: Arc<ListInner<T>>,
}

impl<T: Send + 'static> ListStream<T> {
    pub fn new(ctx: &ExecContext, items: impl IntoIterator<Item = T>) -> Self {
        Self::build(ctx, items, None)
    }

    /// A list stream that fails with `err` after delivering `n` items.
    pub fn failing_after(
        ctx: &ExecContext,
        items: impl IntoIterator<Item = T>,
        n: usize,
        err: Error,
    ) -> Self {
        Self::build(ctx, items, Some((n, err)))
    }

    fn build(
        ctx: &ExecContext,
        items: impl IntoIterator<Item = T>,
        fail_after: Option<(usize, Error)>,
    ) -> Self {
        Self {
            inner: Arc::new(ListInner {
                ctx: ctx.clone(),
                state: Mutex::new(ListState {
                    items: items.into_iter().collect(),
                    delivered: 0,
                    fail_after,
                    demand: Demand::new(),
                    handlers: Handlers::default(),
                    scheduled: false,
                }),
            }),
        }
    }

    fn schedule(&self) {
        ListInner::schedule(&self.inner);
    }
}

impl<T: Send + 'static> ListInner<T> {
    fn schedule(this: &Arc<Self>) {
        {
            let mut st = this.state.lock();
            if st.scheduled || st.handlers.is_terminated() {
                return;
            }
            st.scheduled = true;
        }
        let weak: Weak<Self> = Arc::downgrade(this);
        this.ctx.run_on_context(move || {
            if let Some(inner) = weak.upgrade() {
                inner.emit();
            }
        });
    }

    fn emit(&self) {
        loop {
            let mut st = self.state.lock();
            if st.handlers.is_terminated() || st.handlers.data.is_none() {
                st.scheduled = false;
                return;
            }
            if let Some((n, _)) = &st.fail_after {
                if st.delivered >= *n {
                    st.scheduled = false;
                    let err = st.fail_after.take().map(|(_, e)| e);
                    let handler = st.handlers.terminate_error();
                    drop(st);
                    if let (Some(handler), Some(err)) = (handler, err) {
                        signal_error(handler, err, "list");
                    }
                    return;
                }
            }
            if st.items.is_empty() {
                st.scheduled = false;
                let handler = st.handlers.terminate_end();
                drop(st);
                if let Some(handler) = handler {
                    signal_end(handler);
                }
                return;
            }
            if !st.demand.take_one() {
                st.scheduled = false;
                return;
            }
            let (Some(item), Some(handler)) = (st.items.pop_front(), st.handlers.data.clone())
            else {
                st.scheduled = false;
                return;
            };
            st.delivered += 1;
            drop(st);
            handler(item);
        }
    }
}

impl<T: Send + 'static> ReadStream<T> for ListStream<T> {
    fn set_data_handler(&self, handler: Option<DataHandler<T>>) {
        let attach = handler.is_some();
        {
            let mut st = self.inner.state.lock();
            if attach {
                st.handlers.data = handler;
            } else {
                st.items.clear();
                st.handlers.cancel();
            }
        }
        if attach {
            self.schedule();
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
    }

    fn resume(&self) {
        self.inner.state.lock().demand.set_unbounded();
        self.schedule();
    }

    fn fetch(&self, n: u64) {
        self.inner.state.lock().demand.add(n);
        self.schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{on_data, on_end, on_error};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delivers_only_under_demand() {
        let ctx = ExecContext::new();
        let stream = ListStream::new(&ctx, vec![1, 2, 3]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        stream.set_data_handler(on_data(move |v| s.lock().push(v)));
        ctx.run_until_idle();
        assert!(seen.lock().is_empty());
        stream.fetch(2);
        ctx.run_until_idle();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_ends_once_without_demand() {
        let ctx = ExecContext::new();
        let stream: ListStream<u32> = ListStream::new(&ctx, vec![]);
        let ends = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&ends);
        stream.set_end_handler(on_end(move || {
            e.fetch_add(1, Ordering::SeqCst);
        }));
        stream.set_data_handler(on_data(|_| {}));
        ctx.run_until_idle();
        stream.resume();
        ctx.run_until_idle();
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_injected_failure() {
        let ctx = ExecContext::new();
        let stream =
            ListStream::failing_after(&ctx, vec![1, 2, 3], 1, Error::Source("boom".into()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        let s = Arc::clone(&seen);
        stream.set_error_handler(on_error(move |err| e.lock().push(err)));
        stream.set_data_handler(on_data(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));
        stream.resume();
        ctx.run_until_idle();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(*errors.lock(), vec![Error::Source("boom".into())]);
    }
}

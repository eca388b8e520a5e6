//! One-shot completion signal.
//!
//! `Ready<T>` resolves exactly once, with a value or an error. The first settle wins;
//! later attempts are ignored and reported as `false`. Listeners registered after
//! settlement are invoked immediately on the registering thread.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use querypipe_core::error::{Error, Result};

use crate::context::ExecContext;

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Done(Result<T>),
}

pub struct Ready<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Ready<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Ready<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Ready<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    pub fn done(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Done(Ok(value)))),
        }
    }

    pub fn failed(err: Error) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Done(Err(err)))),
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Done(result))),
        }
    }

    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn fail(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    pub fn settle(&self, result: Result<T>) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if matches!(&*state, State::Done(_)) {
                return false;
            }
            match mem::replace(&mut *state, State::Done(result.clone())) {
                State::Pending(cbs) => cbs,
                State::Done(_) => Vec::new(),
            }
        };
        for cb in callbacks {
            cb(result.clone());
        }
        true
    }

    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let done = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(cbs) => {
                    cbs.push(Box::new(f));
                    return;
                }
                State::Done(r) => r.clone(),
            }
        };
        f(done);
    }

    pub fn is_complete(&self) -> bool {
        matches!(&*self.state.lock(), State::Done(_))
    }

    /// Peek at the outcome without registering a listener.
    pub fn result(&self) -> Option<Result<T>> {
        match &*self.state.lock() {
            State::Done(r) => Some(r.clone()),
            State::Pending(_) => None,
        }
    }

    pub fn map<U, F>(&self, f: F) -> Ready<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |v| Ok(f(v)))
    }

    pub fn try_map<U, F>(&self, f: F) -> Ready<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let out = Ready::new();
        let o = out.clone();
        self.on_complete(move |r| {
            o.settle(r.and_then(f));
        });
        out
    }

    pub fn and_then<U, F>(&self, f: F) -> Ready<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Ready<U> + Send + 'static,
    {
        let out = Ready::new();
        let o = out.clone();
        self.on_complete(move |r| match r {
            Ok(v) => {
                let o2 = o.clone();
                f(v).on_complete(move |r2| {
                    o2.settle(r2);
                });
            }
            Err(e) => {
                o.fail(e);
            }
        });
        out
    }

    /// A signal that settles on `ctx` with this signal's outcome, whichever thread this
    /// one settles on.
    pub fn on_context(&self, ctx: &ExecContext) -> Ready<T> {
        let out = Ready::new();
        let o = out.clone();
        let ctx = ctx.clone();
        self.on_complete(move |r| {
            ctx.run_on_context(move || {
                o.settle(r);
            });
        });
        out
    }

    /// Run `f` on failure, passing the error through unchanged.
    pub fn on_failure<F>(&self, f: F) -> Ready<T>
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        let out = Ready::new();
        let o = out.clone();
        self.on_complete(move |r| {
            if let Err(e) = &r {
                f(e);
            }
            o.settle(r);
        });
        out
    }
}

impl<T> std::fmt::Debug for Ready<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let done = matches!(&*self.state.lock(), State::Done(_));
        f.debug_struct("Ready").field("done", &done).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_settle_wins() {
        let r: Ready<u32> = Ready::new();
        assert!(r.complete(1));
        assert!(!r.fail(Error::Stream("late".into())));
        assert!(!r.complete(2));
        assert_eq!(r.result(), Some(Ok(1)));
    }

    #[test]
    fn test_listeners_before_and_after() {
        let r: Ready<u32> = Ready::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        r.on_complete(move |v| {
            assert_eq!(v, Ok(5));
            h.fetch_add(1, Ordering::SeqCst);
        });
        r.complete(5);
        let h = Arc::clone(&hits);
        r.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_chaining() {
        let r: Ready<u32> = Ready::new();
        let chained = r.map(|v| v * 2).and_then(|v| Ready::done(v + 1));
        assert!(chained.result().is_none());
        r.complete(4);
        assert_eq!(chained.result(), Some(Ok(9)));
    }

    #[test]
    fn test_failure_propagates() {
        let r: Ready<u32> = Ready::new();
        let chained = r.and_then(|v| Ready::done(v + 1));
        r.fail(Error::Source("boom".into()));
        assert_eq!(chained.result(), Some(Err(Error::Source("boom".into()))));
    }
}

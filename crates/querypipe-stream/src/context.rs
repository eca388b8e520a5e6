//! Single logical execution context.
//!
//! Tasks posted from any thread run one at a time on whichever thread drives the
//! context. Only the top-level driver ever waits; nothing inside the pipeline blocks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ContextInner {
    queue: Mutex<VecDeque<Task>>,
    posted: Condvar,
    draining: AtomicBool,
}

#[derive(Clone, Default)]
pub struct ExecContext {
    inner: Arc<ContextInner>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task. Callable from any thread.
    pub fn run_on_context<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.lock().push_back(Box::new(task));
        self.inner.posted.notify_all();
    }

    /// Run queued tasks (including ones they queue) until the queue is empty.
    ///
    /// Returns the number of tasks run. A call made while the context is already being
    /// drained returns 0 immediately.
    pub fn run_until_idle(&self) -> usize {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let mut ran = 0;
        loop {
            let next = self.inner.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        self.inner.draining.store(false, Ordering::Release);
        ran
    }

    /// Drive the context until `done` returns true or `timeout` elapses without it.
    ///
    /// Waits for off-context producers to post work while the queue is empty.
    pub fn run_until<F>(&self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_until_idle();
            if done() {
                return true;
            }
            let mut queue = self.inner.queue.lock();
            if queue.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    drop(queue);
                    return done();
                }
                self.inner.posted.wait_for(&mut queue, deadline - now);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tasks_run_in_order() {
        let ctx = ExecContext::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            ctx.run_on_context(move || seen.lock().push(i));
        }
        assert_eq!(ctx.run_until_idle(), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_nested_drain_is_noop() {
        let ctx = ExecContext::new();
        let inner_ran = Arc::new(AtomicUsize::new(usize::MAX));
        let c = ctx.clone();
        let r = Arc::clone(&inner_ran);
        ctx.run_on_context(move || {
            r.store(c.run_until_idle(), Ordering::SeqCst);
        });
        ctx.run_until_idle();
        assert_eq!(inner_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_until_waits_for_other_threads() {
        let ctx = ExecContext::new();
        let hit = Arc::new(AtomicBool::new(false));
        let c = ctx.clone();
        let h = Arc::clone(&hit);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            c.run_on_context(move || h.store(true, Ordering::SeqCst));
        });
        assert!(ctx.run_until(|| hit.load(Ordering::SeqCst), Duration::from_secs(5)));
    }
}

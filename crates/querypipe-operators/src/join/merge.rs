//! Sort-merge join over two key-sorted streams.
//!
//! Precondition: both inputs are sorted ascending on the join keys, under the same
//! ordering that `compare` implements.
//!
//! The engine holds the current primary item and the secondary items matching it. A
//! match window closes when a secondary item ahead of the current key is seen or the
//! secondary input ends; only then is the primary combined with its matches and emitted.
//! Secondary items behind the current key are skipped.
//!
//! Each input is paused when its backlog grows past its high watermark and resumed when
//! the backlog falls below its low watermark, so memory stays bounded whatever the
//! downstream demand. Emission runs as a single-flight task on the execution context.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use querypipe_core::config::EngineConfig;
use querypipe_core::error::{Error, Result};
use querypipe_stream::protocol::{detach, on_data, on_end, on_error, signal_end, signal_error};
use querypipe_stream::{
    DataHandler, Demand, EndHandler, ErrorHandler, ExecContext, Handlers, ReadStream,
};

/// Orders a primary item against a secondary item.
pub type CompareFn<P, S> = Arc<dyn Fn(&P, &S) -> Result<Ordering> + Send + Sync>;

/// Produces one output item from a primary item and all of its matches.
pub type CombineFn<P, S, O> = Arc<dyn Fn(P, Vec<S>) -> Result<O> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    pub primary_high: usize,
    pub primary_low: usize,
    pub secondary_high: usize,
    pub secondary_low: usize,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Watermarks {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            primary_high: cfg.primary_high_watermark,
            primary_low: cfg.primary_low_watermark,
            secondary_high: cfg.secondary_high_watermark,
            secondary_low: cfg.secondary_low_watermark,
        }
    }

    /// Lows forced into `1..=high`. A paused input resumes only once its backlog drops
    /// below the low mark, so a zero low would never resume.
    pub fn normalized(self) -> Self {
        fn low(low: usize, high: usize) -> usize {
            low.max(1).min(high.max(1))
        }
        Self {
            primary_low: low(self.primary_low, self.primary_high),
            secondary_low: low(self.secondary_low, self.secondary_high),
            ..self
        }
    }
}

/// Snapshot of the engine's buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub primary_backlog: usize,
    pub secondary_backlog: usize,
    pub pending_matches: usize,
    pub emitted: u64,
}

struct MergeState<P, S, O> {
    current: Option<P>,
    matches: Vec<S>,
    primary_backlog: VecDeque<P>,
    secondary_backlog: VecDeque<S>,
    primary_ended: bool,
    secondary_ended: bool,
    primary_paused: bool,
    secondary_paused: bool,
    attached: bool,
    demand: Demand,
    handlers: Handlers<O>,
    emitting: bool,
    emitted: u64,
}

/// Pause/resume calls decided under the lock and made after releasing it.
#[derive(Default)]
struct Flow {
    pause_primary: bool,
    resume_primary: bool,
    pause_secondary: bool,
    resume_secondary: bool,
}

struct MergeInner<P, S, O> {
    ctx: ExecContext,
    primary: Arc<dyn ReadStream<P>>,
    secondary: Arc<dyn ReadStream<S>>,
    compare: CompareFn<P, S>,
    combine: CombineFn<P, S, O>,
    inner_join: bool,
    marks: Watermarks,
    state: Mutex<MergeState<P, S, O>>,
}

pub struct MergeStream<P, S, O> {
    inner: Arc<MergeInner<P, S, O>>,
}

impl<P, S, O> MergeStream<P, S, O>
where
    P: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
{
    pub fn new(
        ctx: &ExecContext,
        primary: Arc<dyn ReadStream<P>>,
        secondary: Arc<dyn ReadStream<S>>,
        compare: CompareFn<P, S>,
        combine: CombineFn<P, S, O>,
        inner_join: bool,
        marks: Watermarks,
    ) -> Self {
        let normalized = marks.normalized();
        if normalized != marks {
            tracing::warn!(requested = ?marks, using = ?normalized, "adjusted merge watermarks");
        }
        let marks = normalized;
        Self {
            inner: Arc::new(MergeInner {
                ctx: ctx.clone(),
                primary,
                secondary,
                compare,
                combine,
                inner_join,
                marks,
                state: Mutex::new(MergeState {
                    current: None,
                    matches: Vec::new(),
                    primary_backlog: VecDeque::new(),
                    secondary_backlog: VecDeque::new(),
                    primary_ended: false,
                    secondary_ended: false,
                    primary_paused: false,
                    secondary_paused: false,
                    attached: false,
                    demand: Demand::new(),
                    handlers: Handlers::default(),
                    emitting: false,
                    emitted: 0,
                }),
            }),
        }
    }

    pub fn stats(&self) -> MergeStats {
        let st = self.inner.state.lock();
        MergeStats {
            primary_backlog: st.primary_backlog.len(),
            secondary_backlog: st.secondary_backlog.len(),
            pending_matches: st.matches.len(),
            emitted: st.emitted,
        }
    }
}

impl<P, S, O> MergeInner<P, S, O>
where
    P: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
{
    fn attach_inputs(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let w = weak.clone();
        this.primary.set_end_handler(on_end(move || {
            if let Some(inner) = w.upgrade() {
                MergeInner::on_input_end(&inner, true);
            }
        }));
        let w = weak.clone();
        this.primary.set_error_handler(on_error(move |e| {
            if let Some(inner) = w.upgrade() {
                MergeInner::fail(&inner, e);
            }
        }));
        let w = weak.clone();
        this.primary.set_data_handler(on_data(move |item| {
            if let Some(inner) = w.upgrade() {
                MergeInner::on_primary(&inner, item);
            }
        }));

        let w = weak.clone();
        this.secondary.set_end_handler(on_end(move || {
            if let Some(inner) = w.upgrade() {
                MergeInner::on_input_end(&inner, false);
            }
        }));
        let w = weak.clone();
        this.secondary.set_error_handler(on_error(move |e| {
            if let Some(inner) = w.upgrade() {
                MergeInner::fail(&inner, e);
            }
        }));
        let w = weak;
        this.secondary.set_data_handler(on_data(move |item| {
            if let Some(inner) = w.upgrade() {
                MergeInner::on_secondary(&inner, item);
            }
        }));

        // Inputs flow up to their high watermarks regardless of downstream demand.
        this.primary.resume();
        this.secondary.resume();
    }

    fn detach_inputs(&self) {
        detach(self.primary.as_ref());
        detach(self.secondary.as_ref());
    }

    fn on_primary(this: &Arc<Self>, item: P) {
        let flow = {
            let mut guard = this.state.lock();
            let st = &mut *guard;
            if st.handlers.is_terminated() {
                return;
            }
            st.primary_backlog.push_back(item);
            this.flow(st)
        };
        this.apply(flow);
        MergeInner::schedule(this);
    }

    fn on_secondary(this: &Arc<Self>, item: S) {
        let (flow, failure) = {
            let mut guard = this.state.lock();
            let st = &mut *guard;
            if st.handlers.is_terminated() {
                return;
            }
            let mut failure = None;
            match st.current.as_ref() {
                Some(current) if st.secondary_backlog.is_empty() => {
                    match (this.compare)(current, &item) {
                        Ok(Ordering::Equal) => st.matches.push(item),
                        Ok(Ordering::Less) => st.secondary_backlog.push_back(item),
                        Ok(Ordering::Greater) => {
                            tracing::trace!("skipping secondary item behind the current key");
                        }
                        Err(e) => failure = Some(e),
                    }
                }
                None if st.primary_ended && st.primary_backlog.is_empty() => {
                    tracing::trace!("dropping secondary item after the primary input ended");
                }
                _ => st.secondary_backlog.push_back(item),
            }
            (this.flow(st), failure)
        };
        if let Some(e) = failure {
            return MergeInner::fail(this, e);
        }
        this.apply(flow);
        MergeInner::schedule(this);
    }

    fn on_input_end(this: &Arc<Self>, primary: bool) {
        {
            let mut st = this.state.lock();
            if primary {
                st.primary_ended = true;
            } else {
                st.secondary_ended = true;
            }
        }
        tracing::debug!(input = if primary { "primary" } else { "secondary" }, "merge input ended");
        MergeInner::schedule(this);
    }

    /// Pull the leading secondary backlog items that match the current primary into the
    /// match list, dropping any that are behind it.
    fn bring_in(&self, st: &mut MergeState<P, S, O>) -> Result<()> {
        let Some(current) = st.current.as_ref() else {
            return Ok(());
        };
        while let Some(front) = st.secondary_backlog.front() {
            match (self.compare)(current, front)? {
                Ordering::Equal => {
                    if let Some(s) = st.secondary_backlog.pop_front() {
                        st.matches.push(s);
                    }
                }
                Ordering::Greater => {
                    tracing::trace!("skipping secondary item behind the current key");
                    st.secondary_backlog.pop_front();
                }
                Ordering::Less => break,
            }
        }
        Ok(())
    }

    fn flow(&self, st: &mut MergeState<P, S, O>) -> Flow {
        let mut f = Flow::default();
        if !st.primary_ended {
            let len = st.primary_backlog.len();
            if !st.primary_paused && len > self.marks.primary_high {
                st.primary_paused = true;
                f.pause_primary = true;
            } else if st.primary_paused && len < self.marks.primary_low {
                st.primary_paused = false;
                f.resume_primary = true;
            }
        }
        if !st.secondary_ended {
            let len = st.secondary_backlog.len();
            if !st.secondary_paused && len > self.marks.secondary_high {
                st.secondary_paused = true;
                f.pause_secondary = true;
            } else if st.secondary_paused && len < self.marks.secondary_low {
                st.secondary_paused = false;
                f.resume_secondary = true;
            }
        }
        f
    }

    fn apply(&self, f: Flow) {
        if f.pause_primary {
            tracing::debug!(high = self.marks.primary_high, "pausing primary input");
            self.primary.pause();
        }
        if f.resume_primary {
            tracing::debug!(low = self.marks.primary_low, "resuming primary input");
            self.primary.resume();
        }
        if f.pause_secondary {
            tracing::debug!(high = self.marks.secondary_high, "pausing secondary input");
            self.secondary.pause();
        }
        if f.resume_secondary {
            tracing::debug!(low = self.marks.secondary_low, "resuming secondary input");
            self.secondary.resume();
        }
    }

    fn schedule(this: &Arc<Self>) {
        {
            let mut st = this.state.lock();
            if st.emitting || st.handlers.is_terminated() || !st.attached {
                return;
            }
            st.emitting = true;
        }
        let inner = Arc::clone(this);
        this.ctx.run_on_context(move || MergeInner::emit(&inner));
    }

    fn emit(this: &Arc<Self>) {
        loop {
            let mut guard = this.state.lock();
            let st = &mut *guard;
            if st.handlers.is_terminated() {
                st.emitting = false;
                return;
            }

            if st.current.is_none() {
                if let Some(p) = st.primary_backlog.pop_front() {
                    st.current = Some(p);
                    st.matches.clear();
                    if let Err(e) = this.bring_in(st) {
                        st.emitting = false;
                        drop(guard);
                        return MergeInner::fail(this, e);
                    }
                }
            }

            if st.current.is_none() {
                st.emitting = false;
                if st.primary_ended {
                    let end = st.handlers.terminate_end();
                    let emitted = st.emitted;
                    st.secondary_backlog.clear();
                    drop(guard);
                    if let Some(end) = end {
                        tracing::debug!(emitted, "merge finished");
                        this.detach_inputs();
                        signal_end(end);
                    }
                    return;
                }
                let flow = this.flow(st);
                drop(guard);
                this.apply(flow);
                return;
            }

            // The window is open until something ahead of the current key arrives.
            let resolved = st.secondary_ended || !st.secondary_backlog.is_empty();
            if !resolved {
                st.emitting = false;
                let flow = this.flow(st);
                drop(guard);
                this.apply(flow);
                return;
            }

            if this.inner_join && st.matches.is_empty() {
                st.current = None;
                tracing::trace!("dropping primary item without matches");
                continue;
            }

            if st.handlers.data.is_none() || !st.demand.take_one() {
                st.emitting = false;
                let flow = this.flow(st);
                drop(guard);
                this.apply(flow);
                return;
            }

            let (Some(primary), Some(handler)) = (st.current.take(), st.handlers.data.clone())
            else {
                st.emitting = false;
                return;
            };
            let matches = mem::take(&mut st.matches);
            st.emitted += 1;
            let flow = this.flow(st);
            drop(guard);
            this.apply(flow);

            match (this.combine)(primary, matches) {
                Ok(out) => handler(out),
                Err(e) => return MergeInner::fail(this, e),
            }
        }
    }

    fn fail(this: &Arc<Self>, err: Error) {
        let handler = {
            let mut st = this.state.lock();
            st.current = None;
            st.matches.clear();
            st.primary_backlog.clear();
            st.secondary_backlog.clear();
            st.handlers.terminate_error()
        };
        let Some(handler) = handler else {
            tracing::debug!(error = %err, "merge error after termination ignored");
            return;
        };
        tracing::warn!(error = %err, "merge failed");
        this.detach_inputs();
        signal_error(handler, err, "merge");
    }

    fn cancel(this: &Arc<Self>) {
        {
            let mut st = this.state.lock();
            if st.handlers.is_terminated() {
                return;
            }
            st.handlers.cancel();
            st.current = None;
            st.matches.clear();
            st.primary_backlog.clear();
            st.secondary_backlog.clear();
        }
        tracing::debug!("merge cancelled");
        this.detach_inputs();
    }
}

impl<P, S, O> ReadStream<O> for MergeStream<P, S, O>
where
    P: Send + 'static,
    S: Send + 'static,
    O: Send + 'static,
{
    fn set_data_handler(&self, handler: Option<DataHandler<O>>) {
        let Some(handler) = handler else {
            return MergeInner::cancel(&self.inner);
        };
        let first = {
            let mut st = self.inner.state.lock();
            if st.handlers.is_terminated() {
                return;
            }
            st.handlers.data = Some(handler);
            !mem::replace(&mut st.attached, true)
        };
        if first {
            MergeInner::attach_inputs(&self.inner);
        }
        MergeInner::schedule(&self.inner);
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
        MergeInner::schedule(&self.inner);
    }

    fn fetch(&self, n: u64) {
        self.inner.state.lock().demand.add(n);
        MergeInner::schedule(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querypipe_stream::{capture, capture_by_batch, ListStream};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    type Joined = (u32, Vec<&'static str>);

    fn engine(
        ctx: &ExecContext,
        primary: Vec<u32>,
        secondary: Vec<(u32, &'static str)>,
        inner_join: bool,
        marks: Watermarks,
    ) -> Arc<MergeStream<u32, (u32, &'static str), Joined>> {
        let compare: CompareFn<u32, (u32, &'static str)> =
            Arc::new(|p: &u32, s: &(u32, &'static str)| Ok(p.cmp(&s.0)));
        let combine: CombineFn<u32, (u32, &'static str), Joined> =
            Arc::new(|p: u32, ms: Vec<(u32, &'static str)>| {
                Ok((p, ms.into_iter().map(|(_, v)| v).collect()))
            });
        Arc::new(MergeStream::new(
            ctx,
            Arc::new(ListStream::new(ctx, primary)),
            Arc::new(ListStream::new(ctx, secondary)),
            compare,
            combine,
            inner_join,
            marks,
        ))
    }

    fn sample() -> (Vec<u32>, Vec<(u32, &'static str)>) {
        (
            vec![1, 2, 3, 4],
            vec![(0, "z"), (1, "a"), (1, "b"), (3, "c"), (5, "d")],
        )
    }

    #[test]
    fn test_left_join_keeps_unmatched() {
        let ctx = ExecContext::new();
        let (p, s) = sample();
        let merge: Arc<dyn ReadStream<Joined>> = engine(&ctx, p, s, false, Watermarks::default());
        let out = capture(merge);
        ctx.run_until_idle();
        assert_eq!(
            out.result(),
            Some(Ok(vec![
                (1, vec!["a", "b"]),
                (2, vec![]),
                (3, vec!["c"]),
                (4, vec![]),
            ]))
        );
    }

    #[test]
    fn test_inner_join_drops_unmatched() {
        let ctx = ExecContext::new();
        let (p, s) = sample();
        let merge: Arc<dyn ReadStream<Joined>> = engine(&ctx, p, s, true, Watermarks::default());
        let out = capture(merge);
        ctx.run_until_idle();
        assert_eq!(
            out.result(),
            Some(Ok(vec![(1, vec!["a", "b"]), (3, vec!["c"])]))
        );
    }

    #[test]
    fn test_backlogs_stay_under_watermarks() {
        let ctx = ExecContext::new();
        let marks = Watermarks {
            primary_high: 3,
            primary_low: 1,
            secondary_high: 8,
            secondary_low: 4,
        };
        let primary: Vec<u32> = (0..50).collect();
        let secondary: Vec<(u32, &'static str)> = (0..50).map(|i| (i, "x")).collect();
        let merge = engine(&ctx, primary, secondary, false, marks);

        // No downstream demand: inputs fill up to their watermarks and stop.
        merge.set_data_handler(on_data(|_| {}));
        ctx.run_until_idle();
        let stats = merge.stats();
        assert!(stats.primary_backlog <= marks.primary_high + 1, "{:?}", stats);
        assert!(stats.secondary_backlog <= marks.secondary_high + 1, "{:?}", stats);
        assert_eq!(stats.emitted, 0);

        let stream: Arc<dyn ReadStream<Joined>> = merge.clone();
        let out = capture_by_batch(stream, 2, 2);
        ctx.run_until_idle();
        let rows = out.result().expect("settled").expect("merged");
        assert_eq!(rows.len(), 50);
        assert!(rows.iter().all(|(_, ms)| ms == &vec!["x"]));
        assert_eq!(merge.stats().emitted, 50);
    }

    #[test]
    fn test_ends_without_demand_when_primary_empty() {
        let ctx = ExecContext::new();
        let merge = engine(&ctx, vec![], vec![(1, "a"), (2, "b")], false, Watermarks::default());
        let ends = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&ends);
        merge.set_end_handler(on_end(move || {
            e.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        merge.set_data_handler(on_data(|_| panic!("no output expected")));
        ctx.run_until_idle();
        assert_eq!(ends.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_early_secondary_end_resolves_windows() {
        let ctx = ExecContext::new();
        let merge: Arc<dyn ReadStream<Joined>> =
            engine(&ctx, vec![1, 2, 3], vec![(1, "a")], false, Watermarks::default());
        let out = capture(merge);
        ctx.run_until_idle();
        assert_eq!(
            out.result(),
            Some(Ok(vec![(1, vec!["a"]), (2, vec![]), (3, vec![])]))
        );
    }

    #[test]
    fn test_comparator_error_fails_stream() {
        let ctx = ExecContext::new();
        let compare: CompareFn<u32, u32> = Arc::new(|p: &u32, s: &u32| {
            if *s == 3 {
                Err(Error::Cast("bad key".into()))
            } else {
                Ok(p.cmp(s))
            }
        });
        let combine: CombineFn<u32, u32, u32> =
            Arc::new(|p: u32, ms: Vec<u32>| Ok(p + ms.len() as u32));
        let merge: Arc<dyn ReadStream<u32>> = Arc::new(MergeStream::new(
            &ctx,
            Arc::new(ListStream::new(&ctx, vec![1, 2, 3, 4])),
            Arc::new(ListStream::new(&ctx, vec![1, 3])),
            compare,
            combine,
            false,
            Watermarks::default(),
        ));
        let out = capture(merge);
        ctx.run_until_idle();
        assert_eq!(out.result(), Some(Err(Error::Cast("bad key".into()))));
    }

    #[test]
    fn test_upstream_error_is_signalled_once() {
        let ctx = ExecContext::new();
        let compare: CompareFn<u32, u32> = Arc::new(|p: &u32, s: &u32| Ok(p.cmp(s)));
        let combine: CombineFn<u32, u32, u32> = Arc::new(|p: u32, _: Vec<u32>| Ok(p));
        let merge = Arc::new(MergeStream::new(
            &ctx,
            Arc::new(ListStream::failing_after(
                &ctx,
                vec![1, 2, 3],
                2,
                Error::Source("primary lost".into()),
            )),
            Arc::new(ListStream::new(&ctx, vec![1, 2, 3])),
            compare,
            combine,
            false,
            Watermarks::default(),
        ));
        let errors = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        merge.set_error_handler(on_error(move |_| {
            e.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        let e = Arc::clone(&ends);
        merge.set_end_handler(on_end(move || {
            e.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        merge.set_data_handler(on_data(|_| {}));
        merge.resume();
        ctx.run_until_idle();
        assert_eq!(errors.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(ends.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_zero_low_watermarks_still_resume() {
        let marks = Watermarks {
            primary_high: 2,
            primary_low: 0,
            secondary_high: 3,
            secondary_low: 0,
        };
        assert_eq!(
            marks.normalized(),
            Watermarks {
                primary_high: 2,
                primary_low: 1,
                secondary_high: 3,
                secondary_low: 1,
            }
        );

        let ctx = ExecContext::new();
        let primary: Vec<u32> = (0..30).collect();
        let secondary: Vec<(u32, &'static str)> = (0..30).map(|i| (i, "x")).collect();
        let merge: Arc<dyn ReadStream<Joined>> = engine(&ctx, primary, secondary, false, marks);
        let out = capture_by_batch(merge, 1, 1);
        ctx.run_until_idle();
        let rows = out.result().expect("settled").expect("merged");
        assert_eq!(rows.len(), 30);
    }
}

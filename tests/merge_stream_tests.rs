//! Sort-merge join engine properties over larger generated inputs.

mod test_data_gen;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use querypipe_core::error::Error;
use querypipe_operators::join::merge::{CombineFn, CompareFn};
use querypipe_operators::{MergeStream, Watermarks};
use querypipe_stream::protocol::{on_data, on_end, on_error};
use querypipe_stream::{capture, capture_by_batch, ExecContext, ListStream, ReadStream};
use test_data_gen::{drive, duplicated_sorted_keys, list, unique_sorted_keys};

/// Secondary items carry their key and their position in the input.
type Child = (i64, usize);
type Joined = (i64, Vec<usize>);

fn compare() -> CompareFn<i64, Child> {
    Arc::new(|p: &i64, s: &Child| Ok(p.cmp(&s.0)))
}

fn combine() -> CombineFn<i64, Child, Joined> {
    Arc::new(|p: i64, ms: Vec<Child>| Ok((p, ms.into_iter().map(|m| m.1).collect())))
}

fn children(keys: &[i64]) -> Vec<Child> {
    keys.iter().copied().zip(0..).collect()
}

/// Nested-loop reference for unique primary keys.
fn reference(primary: &[i64], secondary: &[Child], inner_join: bool) -> Vec<Joined> {
    primary
        .iter()
        .map(|p| {
            let ids = secondary
                .iter()
                .filter(|s| s.0 == *p)
                .map(|s| s.1)
                .collect::<Vec<_>>();
            (*p, ids)
        })
        .filter(|(_, ids)| !inner_join || !ids.is_empty())
        .collect()
}

fn engine(
    ctx: &ExecContext,
    primary: Arc<dyn ReadStream<i64>>,
    secondary: Arc<dyn ReadStream<Child>>,
    inner_join: bool,
    marks: Watermarks,
) -> Arc<MergeStream<i64, Child, Joined>> {
    Arc::new(MergeStream::new(
        ctx,
        primary,
        secondary,
        compare(),
        combine(),
        inner_join,
        marks,
    ))
}

#[derive(Default)]
struct Observed {
    items: Mutex<Vec<Joined>>,
    ends: AtomicUsize,
    errors: Mutex<Vec<Error>>,
}

fn observe(stream: &Arc<dyn ReadStream<Joined>>) -> Arc<Observed> {
    let seen = Arc::new(Observed::default());
    let s = Arc::clone(&seen);
    stream.set_end_handler(on_end(move || {
        s.ends.fetch_add(1, AtomicOrdering::SeqCst);
    }));
    let s = Arc::clone(&seen);
    stream.set_error_handler(on_error(move |e| s.errors.lock().push(e)));
    let s = Arc::clone(&seen);
    stream.set_data_handler(on_data(move |item| s.items.lock().push(item)));
    seen
}

#[test]
fn test_left_join_matches_reference() {
    let ctx = ExecContext::new();
    let primary = unique_sorted_keys(1000, 1);
    let secondary = children(&duplicated_sorted_keys(*primary.last().unwrap_or(&0) + 5, 3, 2));
    let merge = engine(
        &ctx,
        list(&ctx, primary.clone()),
        list(&ctx, secondary.clone()),
        false,
        Watermarks::default(),
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    let out = capture(stream);
    let joined = drive(&ctx, &out).expect("join");
    assert_eq!(joined.len(), 1000);
    assert_eq!(joined, reference(&primary, &secondary, false));
}

#[test]
fn test_inner_join_matches_reference() {
    let ctx = ExecContext::new();
    let primary = unique_sorted_keys(1000, 3);
    let secondary = children(&duplicated_sorted_keys(*primary.last().unwrap_or(&0), 2, 4));
    let merge = engine(
        &ctx,
        list(&ctx, primary.clone()),
        list(&ctx, secondary.clone()),
        true,
        Watermarks::default(),
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    let joined = drive(&ctx, &capture(stream)).expect("join");
    let expected = reference(&primary, &secondary, true);
    assert!(!expected.is_empty());
    assert!(joined.iter().all(|(_, ids)| !ids.is_empty()));
    assert_eq!(joined, expected);
}

#[test]
fn test_backlogs_stay_bounded_under_single_fetches() {
    let ctx = ExecContext::new();
    let marks = Watermarks {
        primary_high: 5,
        primary_low: 2,
        secondary_high: 12,
        secondary_low: 6,
    };
    let primary = unique_sorted_keys(1000, 5);
    let secondary = children(&duplicated_sorted_keys(*primary.last().unwrap_or(&0), 4, 6));
    let merge = engine(
        &ctx,
        list(&ctx, primary.clone()),
        list(&ctx, secondary.clone()),
        false,
        marks,
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge.clone();
    let seen = observe(&stream);

    let mut steps = 0;
    while seen.ends.load(AtomicOrdering::SeqCst) == 0 {
        stream.fetch(1);
        ctx.run_until_idle();
        let stats = merge.stats();
        assert!(stats.primary_backlog <= marks.primary_high + 1, "{:?}", stats);
        assert!(stats.secondary_backlog <= marks.secondary_high + 1, "{:?}", stats);
        steps += 1;
        assert!(steps <= 2000, "merge stalled");
    }
    assert_eq!(*seen.items.lock(), reference(&primary, &secondary, false));
    assert!(seen.errors.lock().is_empty());
}

#[test]
fn test_batched_fetch_delivers_everything() {
    let ctx = ExecContext::new();
    let primary = unique_sorted_keys(1000, 7);
    let secondary = children(&duplicated_sorted_keys(*primary.last().unwrap_or(&0), 3, 8));
    let marks = Watermarks {
        primary_high: 3,
        primary_low: 1,
        secondary_high: 8,
        secondary_low: 4,
    };
    let merge = engine(
        &ctx,
        list(&ctx, primary.clone()),
        list(&ctx, secondary.clone()),
        false,
        marks,
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    let joined = drive(&ctx, &capture_by_batch(stream, 7, 13)).expect("join");
    assert_eq!(joined, reference(&primary, &secondary, false));
}

#[test]
fn test_end_is_signalled_once() {
    let ctx = ExecContext::new();
    let primary = unique_sorted_keys(1000, 9);
    let secondary = children(&duplicated_sorted_keys(100, 2, 10));
    let merge = engine(
        &ctx,
        list(&ctx, primary),
        list(&ctx, secondary),
        false,
        Watermarks::default(),
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    let seen = observe(&stream);
    stream.resume();
    ctx.run_until_idle();
    assert_eq!(seen.ends.load(AtomicOrdering::SeqCst), 1);

    stream.fetch(10);
    stream.resume();
    ctx.run_until_idle();
    assert_eq!(seen.ends.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(seen.items.lock().len(), 1000);
    assert!(seen.errors.lock().is_empty());
}

#[test]
fn test_secondary_ending_early_leaves_rest_unmatched() {
    let ctx = ExecContext::new();
    let primary: Vec<i64> = (0..1000).collect();
    let secondary = children(&(0..100).collect::<Vec<i64>>());
    let merge = engine(
        &ctx,
        list(&ctx, primary),
        list(&ctx, secondary),
        false,
        Watermarks::default(),
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    let joined = drive(&ctx, &capture(stream)).expect("join");
    assert_eq!(joined.len(), 1000);
    for (key, ids) in &joined {
        if *key < 100 {
            assert_eq!(ids, &vec![*key as usize]);
        } else {
            assert!(ids.is_empty());
        }
    }
}

#[test]
fn test_empty_secondary_inner_join_yields_nothing() {
    let ctx = ExecContext::new();
    let merge = engine(
        &ctx,
        list(&ctx, unique_sorted_keys(1000, 11)),
        list(&ctx, Vec::<Child>::new()),
        true,
        Watermarks::default(),
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    assert_eq!(drive(&ctx, &capture(stream)), Ok(vec![]));
}

#[test]
fn test_primary_error_after_partial_output() {
    let ctx = ExecContext::new();
    let keys = unique_sorted_keys(1000, 13);
    let secondary = children(&duplicated_sorted_keys(*keys.last().unwrap_or(&0), 2, 14));
    let expected = reference(&keys, &secondary, false);
    let primary: Arc<dyn ReadStream<i64>> = Arc::new(ListStream::failing_after(
        &ctx,
        keys,
        500,
        Error::Source("primary read failed".into()),
    ));
    let merge = engine(&ctx, primary, list(&ctx, secondary), false, Watermarks::default());
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    let seen = observe(&stream);
    stream.resume();
    ctx.run_until_idle();

    assert_eq!(
        *seen.errors.lock(),
        vec![Error::Source("primary read failed".into())]
    );
    assert_eq!(seen.ends.load(AtomicOrdering::SeqCst), 0);
    let items = seen.items.lock().clone();
    assert!(!items.is_empty());
    assert!(items.len() <= 500);
    assert_eq!(items.as_slice(), &expected[..items.len()]);

    stream.fetch(5);
    ctx.run_until_idle();
    assert_eq!(seen.items.lock().len(), items.len());
    assert_eq!(seen.errors.lock().len(), 1);
}

#[test]
fn test_secondary_error_fails_join() {
    let ctx = ExecContext::new();
    let secondary: Arc<dyn ReadStream<Child>> = Arc::new(ListStream::failing_after(
        &ctx,
        children(&duplicated_sorted_keys(500, 3, 15)),
        10,
        Error::Source("secondary read failed".into()),
    ));
    let merge = engine(
        &ctx,
        list(&ctx, unique_sorted_keys(1000, 16)),
        secondary,
        false,
        Watermarks::default(),
    );
    let stream: Arc<dyn ReadStream<Joined>> = merge;
    assert_eq!(
        drive(&ctx, &capture(stream)),
        Err(Error::Source("secondary read failed".into()))
    );
}

#[test]
fn test_comparator_sees_keys_in_order() {
    let ctx = ExecContext::new();
    let last = Arc::new(Mutex::new(i64::MIN));
    let l = Arc::clone(&last);
    let ordered: CompareFn<i64, Child> = Arc::new(move |p: &i64, s: &Child| {
        let mut last = l.lock();
        assert!(*p >= *last, "primary keys went backwards");
        *last = *p;
        Ok(p.cmp(&s.0))
    });
    let primary = unique_sorted_keys(1000, 17);
    let secondary = children(&duplicated_sorted_keys(*primary.last().unwrap_or(&0), 2, 18));
    let merge: Arc<dyn ReadStream<Joined>> = Arc::new(MergeStream::new(
        &ctx,
        list(&ctx, primary.clone()),
        list(&ctx, secondary.clone()),
        ordered,
        combine(),
        false,
        Watermarks::default(),
    ));
    let joined = drive(&ctx, &capture(merge)).expect("join");
    assert_eq!(joined, reference(&primary, &secondary, false));
    assert_ne!(*last.lock(), i64::MIN);
}

//! Drain a stream into memory.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::protocol::{on_data, on_end, on_error, ReadStream};
use crate::ready::Ready;

/// Collect every item with unbounded demand. The stream is kept alive until it ends.
pub fn capture<T>(stream: Arc<dyn ReadStream<T>>) -> Ready<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let ready = attach(&stream, None);
    stream.resume();
    ready
}

/// Collect every item, requesting `initial` items first and then `batch` more each time
/// the outstanding request is used up.
pub fn capture_by_batch<T>(stream: Arc<dyn ReadStream<T>>, initial: u64, batch: u64) -> Ready<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let ready = attach(&stream, Some((initial, batch)));
    stream.fetch(initial);
    ready
}

fn attach<T>(
    stream: &Arc<dyn ReadStream<T>>,
    batching: Option<(u64, u64)>,
) -> Ready<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let ready = Ready::new();
    let items = Arc::new(Mutex::new(Vec::new()));
    // Holds the stream until it terminates; released by the end or error handler.
    let keep: Arc<Mutex<Option<Arc<dyn ReadStream<T>>>>> =
        Arc::new(Mutex::new(Some(Arc::clone(stream))));
    let outstanding = Arc::new(Mutex::new(batching.map(|(initial, _)| initial).unwrap_or(0)));

    let weak = Arc::downgrade(stream);
    let sink = Arc::clone(&items);
    stream.set_data_handler(on_data(move |item| {
        sink.lock().push(item);
        let Some((_, batch)) = batching else {
            return;
        };
        let refill = {
            let mut left = outstanding.lock();
            *left = left.saturating_sub(1);
            if *left == 0 {
                *left = batch;
                true
            } else {
                false
            }
        };
        if refill {
            if let Some(stream) = weak.upgrade() {
                stream.fetch(batch);
            }
        }
    }));

    let r = ready.clone();
    let sink = Arc::clone(&items);
    let held = Arc::clone(&keep);
    stream.set_end_handler(on_end(move || {
        let collected = std::mem::take(&mut *sink.lock());
        r.complete(collected);
        held.lock().take();
    }));

    let r = ready.clone();
    stream.set_error_handler(on_error(move |err| {
        r.fail(err);
        keep.lock().take();
    }));

    ready
}

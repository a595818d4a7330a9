use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{broadcast, watch, Semaphore};

use crate::error::CoreError;

type BoxedTask<V> = Pin<Box<dyn Future<Output = Result<V, CoreError>> + Send>>;
type ShouldExecute = Arc<dyn Fn() -> bool + Send + Sync>;
type SharedOutcome<V> = Result<V, Arc<CoreError>>;

/// `CoreError` isn't `Clone` (its `Io`/`Json` variants wrap non-`Clone`
/// upstream error types), but every waiter on a duplicate `enqueue`
/// subscribes to the same `Arc<CoreError>` outcome and needs its own
/// owned `CoreError` to return. This reconstructs one without collapsing
/// the `Aborted`/`Permanent`/`Invariant` variants the way a blanket
/// `Transient(e.to_string())` would (§7: only `Io`/`Json`, which aren't
/// part of the domain taxonomy, fold into `Transient`).
fn clone_error(e: &CoreError) -> CoreError {
    match e {
        CoreError::Aborted(s) => CoreError::Aborted(s.clone()),
        CoreError::Transient(s) => CoreError::Transient(s.clone()),
        CoreError::Permanent(s) => CoreError::Permanent(s.clone()),
        CoreError::Invariant(s) => CoreError::Invariant(s.clone()),
        CoreError::Io(io_err) => CoreError::Transient(format!("io error: {io_err}")),
        CoreError::Json(json_err) => CoreError::Transient(format!("json error: {json_err}")),
    }
}

/// Emitted on a queue's broadcast channel as requests move through it; the
/// `onProgress` observable callers subscribe to instead of polling
/// `pending`/`active` counts.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Enqueued { key: String, pending: usize },
    Started { key: String, active: usize },
    Completed { key: String },
    Failed { key: String, message: String },
    Cancelled { key: String },
}

struct PendingEntry<V> {
    key: String,
    // Bumped in place by a duplicate `enqueue` for the same key (§4.2:
    // "its priority is updated to max(existing, new)"); read fresh on
    // every heap comparison so a bump is visible without removing and
    // reinserting the entry.
    priority: AtomicI64,
    sequence: u64,
    task: Mutex<Option<BoxedTask<V>>>,
    should_execute: ShouldExecute,
    result_tx: watch::Sender<Option<SharedOutcome<V>>>,
}

impl<V> PartialEq for PendingEntry<V> {
    fn eq(&self, other: &Self) -> bool {
        self.priority.load(AtomicOrdering::Relaxed) == other.priority.load(AtomicOrdering::Relaxed)
            && self.sequence == other.sequence
    }
}
impl<V> Eq for PendingEntry<V> {}

impl<V> PartialOrd for PendingEntry<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V> Ord for PendingEntry<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority sorts first, and among
        // equal priorities the earlier sequence number (smaller) sorts
        // first, giving FIFO tie-break.
        self.priority
            .load(AtomicOrdering::Relaxed)
            .cmp(&other.priority.load(AtomicOrdering::Relaxed))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority-ordered, bounded-concurrency, deduplicating request queue. One
/// background dispatcher task drains a `BinaryHeap` of pending entries as
/// `Semaphore` permits free up, spawning each accepted entry's task; the
/// bound on concurrently-running tasks is the semaphore's permit count, and
/// callers await the entry's own result through a `watch` channel so
/// duplicate `enqueue` calls for the same key all observe the one run.
pub struct RequestQueue<V> {
    heap: Arc<Mutex<BinaryHeap<Arc<PendingEntry<V>>>>>,
    inflight: Arc<DashMap<String, Arc<PendingEntry<V>>>>,
    notify: Arc<tokio::sync::Notify>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    sequence: AtomicU64,
    events: broadcast::Sender<QueueEvent>,
}

impl<V> RequestQueue<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        let max_concurrent = max_concurrent.max(1);
        let (events, _) = broadcast::channel(256);
        let queue = Arc::new(RequestQueue {
            heap: Arc::new(Mutex::new(BinaryHeap::new())),
            inflight: Arc::new(DashMap::new()),
            notify: Arc::new(tokio::sync::Notify::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            sequence: AtomicU64::new(0),
            events,
        });
        queue.clone().spawn_dispatcher();
        queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn pending(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn active(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// Raises `entry`'s priority to `max(current, priority)` (§4.2). A
    /// no-op bump (the entry is already at or above `priority`, or it has
    /// already left the pending heap to run) costs nothing; a real bump
    /// rebuilds the heap under the lock so the entry's new rank is
    /// reflected immediately rather than only on its next comparison.
    fn bump_priority(&self, entry: &Arc<PendingEntry<V>>, priority: i64) {
        let previous = entry.priority.fetch_max(priority, AtomicOrdering::Relaxed);
        if priority <= previous {
            return;
        }
        let mut heap = self.heap.lock().unwrap();
        if heap.iter().any(|e| Arc::ptr_eq(e, entry)) {
            let rest: Vec<_> = std::mem::take(&mut *heap).into_vec();
            *heap = rest.into_iter().collect();
        }
    }

    /// Submits `task` under `key` at `priority`. If a request for the same
    /// key is already pending or running, the caller is attached to that
    /// run's result instead of starting a second one. `should_execute` is
    /// re-checked by the dispatcher immediately before the task would start
    /// running, so a request that became irrelevant while queued (e.g. a
    /// tile that scrolled out of view) can be skipped without ever running.
    pub async fn enqueue<F, Fut>(
        &self,
        key: impl Into<String>,
        priority: i64,
        should_execute: impl Fn() -> bool + Send + Sync + 'static,
        task: F,
    ) -> Result<V, CoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, CoreError>> + Send + 'static,
    {
        let key = key.into();

        if let Some(existing) = self.inflight.get(&key) {
            let entry = Arc::clone(existing.value());
            drop(existing);
            self.bump_priority(&entry, priority);
            return Self::await_outcome(entry.result_tx.subscribe()).await;
        }

        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let (result_tx, result_rx) = watch::channel(None);
        let entry = Arc::new(PendingEntry {
            key: key.clone(),
            priority: AtomicI64::new(priority),
            sequence,
            task: Mutex::new(Some(Box::pin(async move { task().await }))),
            should_execute: Arc::new(should_execute),
            result_tx,
        });

        self.inflight.insert(key.clone(), entry.clone());
        self.heap.lock().unwrap().push(entry);
        self.notify.notify_one();
        let _ = self.events.send(QueueEvent::Enqueued {
            key,
            pending: self.pending(),
        });

        Self::await_outcome(result_rx).await
    }

    async fn await_outcome(mut rx: watch::Receiver<Option<SharedOutcome<V>>>) -> Result<V, CoreError> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome.map_err(|e| clone_error(&e));
            }
            if rx.changed().await.is_err() {
                return Err(CoreError::Aborted("queue shut down before request completed".into()));
            }
        }
    }

    /// Removes every pending (not yet started) entry and resolves each of
    /// their waiters with `Aborted`. Entries already running are left to
    /// finish.
    pub fn clear_pending(&self) {
        let drained: Vec<Arc<PendingEntry<V>>> = {
            let mut heap = self.heap.lock().unwrap();
            std::mem::take(&mut *heap).into_vec()
        };
        for entry in drained {
            self.inflight.remove(&entry.key);
            let _ = entry.result_tx.send(Some(Err(Arc::new(CoreError::Aborted(format!(
                "queue cleared before {} started",
                entry.key
            ))))));
            let _ = self.events.send(QueueEvent::Cancelled {
                key: entry.key.clone(),
            });
        }
    }

    fn spawn_dispatcher(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let entry = loop {
                    if let Some(entry) = self.heap.lock().unwrap().pop() {
                        break entry;
                    }
                    self.notify.notified().await;
                };

                let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                    return;
                };
                let queue = self.clone();
                tokio::spawn(async move {
                    if !(entry.should_execute)() {
                        queue.inflight.remove(&entry.key);
                        let _ = entry.result_tx.send(Some(Err(Arc::new(CoreError::Aborted(format!(
                            "should_execute returned false for {}",
                            entry.key
                        ))))));
                        let _ = queue.events.send(QueueEvent::Cancelled {
                            key: entry.key.clone(),
                        });
                        drop(permit);
                        return;
                    }

                    let _ = queue.events.send(QueueEvent::Started {
                        key: entry.key.clone(),
                        active: queue.active(),
                    });

                    let task = entry.task.lock().unwrap().take();
                    let outcome = match task {
                        Some(fut) => fut.await,
                        None => Err(CoreError::Invariant("task already consumed".into())),
                    };

                    match &outcome {
                        Ok(_) => {
                            let _ = queue.events.send(QueueEvent::Completed {
                                key: entry.key.clone(),
                            });
                        }
                        Err(e) => {
                            let _ = queue.events.send(QueueEvent::Failed {
                                key: entry.key.clone(),
                                message: e.to_string(),
                            });
                        }
                    }

                    queue.inflight.remove(&entry.key);
                    let _ = entry.result_tx.send(Some(outcome.map_err(Arc::new)));
                    drop(permit);
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn dedups_concurrent_requests_for_same_key() {
        let queue = RequestQueue::<i32>::new(4);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = queue.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue("same-key", 1, || true, move || async move {
                        calls.fetch_add(1, AtomicOrdering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<i32, CoreError>(42)
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounds_concurrently_running_tasks() {
        let queue = RequestQueue::<()>::new(2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let queue = queue.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(format!("k{i}"), 1, || true, move || async move {
                        let now = concurrent.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                        max_seen.fetch_max(now, AtomicOrdering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        concurrent.fetch_sub(1, AtomicOrdering::SeqCst);
                        Ok::<(), CoreError>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(max_seen.load(AtomicOrdering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn should_execute_false_cancels_without_running_task() {
        let queue = RequestQueue::<()>::new(1);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let result = queue
            .enqueue("k", 1, || false, move || async move {
                ran_clone.fetch_add(1, AtomicOrdering::SeqCst);
                Ok::<(), CoreError>(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::Aborted(_))));
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
    }

    /// A task's error variant must reach the caller unchanged — not get
    /// collapsed into `Transient` the way stringifying through
    /// `Arc<CoreError>` would. Traversal's content-load match
    /// (`Permanent` fails the tile for good, `Invariant` panics) depends
    /// on this distinction surviving the queue round trip.
    #[tokio::test]
    async fn task_error_variant_survives_the_queue_round_trip() {
        let queue = RequestQueue::<()>::new(4);

        let permanent = queue
            .enqueue("permanent", 1, || true, || async move {
                Err::<(), CoreError>(CoreError::Permanent("no such tile".into()))
            })
            .await;
        assert!(matches!(permanent, Err(CoreError::Permanent(_))), "got {permanent:?}");

        let invariant = queue
            .enqueue("invariant", 1, || true, || async move {
                Err::<(), CoreError>(CoreError::Invariant("zero-size bounding volume".into()))
            })
            .await;
        assert!(matches!(invariant, Err(CoreError::Invariant(_))), "got {invariant:?}");

        let transient = queue
            .enqueue("transient", 1, || true, || async move {
                Err::<(), CoreError>(CoreError::Transient("network blip".into()))
            })
            .await;
        assert!(matches!(transient, Err(CoreError::Transient(_))), "got {transient:?}");
    }

    /// The same preservation must hold for a waiter that attaches to an
    /// already in-flight request via deduplication, not just the
    /// original caller.
    #[tokio::test]
    async fn duplicate_enqueue_waiter_also_sees_the_original_error_variant() {
        let queue = RequestQueue::<()>::new(1);
        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue("k", 1, || true, || async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err::<(), CoreError>(CoreError::Permanent("source says gone".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(2)).await;

        let dup = queue
            .enqueue("k", 1, || true, || async move { Ok::<(), CoreError>(()) })
            .await;

        let original = blocker.await.unwrap();
        assert!(matches!(original, Err(CoreError::Permanent(_))));
        assert!(matches!(dup, Err(CoreError::Permanent(_))), "got {dup:?}");
    }

    #[tokio::test]
    async fn higher_priority_runs_before_lower_priority() {
        let queue = RequestQueue::<u32>::new(1);
        // Occupy the single permit so both subsequent enqueues queue up.
        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue("blocker", 0, || true, || async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<u32, CoreError>(0)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let low = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue("low", 1, || true, move || async move {
                        o1.lock().unwrap().push("low");
                        Ok::<u32, CoreError>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let o2 = order.clone();
        let high = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue("high", 10, || true, move || async move {
                        o2.lock().unwrap().push("high");
                        Ok::<u32, CoreError>(2)
                    })
                    .await
            })
        };

        blocker.await.unwrap().unwrap();
        low.await.unwrap().unwrap();
        high.await.unwrap().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn duplicate_enqueue_bumps_priority_to_the_max() {
        let queue = RequestQueue::<u32>::new(1);
        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue("blocker", 0, || true, || async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<u32, CoreError>(0)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let order = Arc::new(Mutex::new(Vec::new()));

        // "late" is enqueued at a low priority first, then at a higher one
        // than "ahead" once both are already queued; the bump should let
        // it win the race instead of the stale low priority it was first
        // given.
        let o1 = order.clone();
        let ahead = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue("ahead", 5, || true, move || async move {
                        o1.lock().unwrap().push("ahead");
                        Ok::<u32, CoreError>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let o2 = order.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let late = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue("late", 1, || true, move || async move {
                        calls_clone.fetch_add(1, AtomicOrdering::SeqCst);
                        o2.lock().unwrap().push("late");
                        Ok::<u32, CoreError>(2)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        // A second enqueue under the same key, at a priority above
        // "ahead"'s, is deduplicated against the one already queued but
        // still raises its rank.
        let bump = queue.enqueue("late", 10, || true, || async move { Ok::<u32, CoreError>(2) });

        let (bump_result, _) = tokio::join!(bump, tokio::time::sleep(Duration::from_millis(1)));
        assert_eq!(bump_result.unwrap(), 2);

        blocker.await.unwrap().unwrap();
        ahead.await.unwrap().unwrap();
        late.await.unwrap().unwrap();

        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1, "dedup must not run the task twice");
        assert_eq!(*order.lock().unwrap(), vec!["late", "ahead"]);
    }
}

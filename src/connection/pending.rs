//! In-flight request bookkeeping.
//!
//! Each pending request owns a single-use completion and the abort handle of
//! its timeout task. Whoever claims the entry from the table (the reply
//! path, the timeout task, or `close()`) is the only party allowed to run
//! the completion, which makes completion exactly-once without further
//! coordination.
//!
//! Once the table is closed nothing can be claimed any more, and
//! [`PendingTable::cancel_all`] waits for completions already running, so no
//! completion runs after it returns.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_error,
    Channel,
    CorrelationId,
    Error,
    Outcome,
    Packet,
    Result,
};

// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Callback receiving the result of a request/response exchange.
///
/// - `Outcome::success(Some(reply))` when the reply arrived in time
/// - `Outcome::success(None)` when the timeout fired first
/// - a `Cancelled` violation when the connection closed first
pub type Completion<B> = Box<dyn FnOnce(Outcome<Option<Packet<B>>>) + Send>;

/// Read-only view of one pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    /// Channel the request was published on.
    pub channel: Channel,
    /// Instant the timeout fires.
    pub deadline: Instant,
}

pub(crate) struct PendingRequest<B> {
    info: PendingInfo,
    completion: Completion<B>,
    timer: Option<AbortHandle>,
}

impl<B> PendingRequest<B> {
    /// Stop the timer and run the completion. A panicking completion is
    /// logged and swallowed.
    fn finish(self, id: &CorrelationId, outcome: Outcome<Option<Packet<B>>>) {
        // ---
        if let Some(timer) = self.timer {
            timer.abort();
        }

        let completion = self.completion;
        if catch_unwind(AssertUnwindSafe(move || completion(outcome))).is_err() {
            log_error!("completion for request {id} panicked");
        }
    }
}

struct TableState<B> {
    entries: HashMap<CorrelationId, PendingRequest<B>>,
    closed: bool,
    // Claimed entries whose completion has not returned yet.
    completing: usize,
}

/// Table of pending requests keyed by correlation id.
pub(crate) struct PendingTable<B> {
    state: Mutex<TableState<B>>,
    idle: Notify,
}

/// Deadline for a request registered now with `timeout`.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

impl<B> PendingTable<B> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                entries: HashMap::new(),
                closed: false,
                completing: 0,
            }),
            idle: Notify::new(),
        }
    }

    /// Insert a request under a fresh correlation id, unique among the
    /// entries currently in the table. Returns the id and the deadline.
    ///
    /// Fails with `Closed` once the table has been closed.
    pub(crate) fn register(
        &self,
        channel: Channel,
        timeout: Duration,
        completion: Completion<B>,
    ) -> Result<(CorrelationId, Instant)> {
        // ---
        let deadline = deadline_after(timeout);

        let mut state = lock_ignore_poison(&self.state);
        if state.closed {
            return Err(Error::Closed);
        }

        let mut id = CorrelationId::generate();
        while state.entries.contains_key(&id) {
            id = CorrelationId::generate();
        }

        let request = PendingRequest {
            info: PendingInfo { channel, deadline },
            completion,
            timer: None,
        };
        state.entries.insert(id.clone(), request);
        Ok((id, deadline))
    }

    /// Attach the timeout task to a request.
    ///
    /// Returns `false` when the request is already gone; the caller must then
    /// abort the task itself.
    pub(crate) fn arm(&self, id: &CorrelationId, timer: AbortHandle) -> bool {
        let mut state = lock_ignore_poison(&self.state);
        match state.entries.get_mut(id) {
            Some(request) => {
                request.timer = Some(timer);
                true
            }
            None => false,
        }
    }

    /// Complete a request with its reply. Returns `false` when the request
    /// is unknown, already completed, or the table is closed.
    pub(crate) fn complete(&self, id: &CorrelationId, reply: Packet<B>) -> bool {
        self.settle(id, Outcome::success(Some(reply)), false)
    }

    /// Complete a request whose deadline passed. Called from the request's
    /// own timeout task.
    pub(crate) fn expire(&self, id: &CorrelationId) -> bool {
        self.settle(id, Outcome::success(None), true)
    }

    /// Remove a request without running its completion.
    pub(crate) fn discard(&self, id: &CorrelationId) -> bool {
        let removed = lock_ignore_poison(&self.state).entries.remove(id);
        match removed {
            Some(request) => {
                if let Some(timer) = request.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Close the table, cancel every remaining request and wait until
    /// completions claimed before the close have returned.
    ///
    /// Returns the number of cancelled requests.
    pub(crate) async fn cancel_all(&self) -> usize {
        // ---
        let drained: Vec<(CorrelationId, PendingRequest<B>)> = {
            let mut state = lock_ignore_poison(&self.state);
            state.closed = true;
            state.entries.drain().collect()
        };

        let cancelled = drained.len();
        for (id, request) in drained {
            request.finish(&id, Outcome::violation(Error::Cancelled));
        }

        self.wait_idle().await;
        cancelled
    }

    pub(crate) fn snapshot(&self) -> HashMap<CorrelationId, PendingInfo> {
        lock_ignore_poison(&self.state)
            .entries
            .iter()
            .map(|(id, request)| (id.clone(), request.info.clone()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock_ignore_poison(&self.state).entries.len()
    }

    /// The single arbitration point between reply, timeout and close: only
    /// the caller that claims the entry runs its completion.
    fn settle(
        &self,
        id: &CorrelationId,
        outcome: Outcome<Option<Packet<B>>>,
        from_timer: bool,
    ) -> bool {
        // ---
        let claimed = {
            let mut state = lock_ignore_poison(&self.state);
            if state.closed {
                None
            } else {
                let request = state.entries.remove(id);
                if request.is_some() {
                    state.completing += 1;
                }
                request
            }
        };

        let Some(mut request) = claimed else {
            return false;
        };

        if from_timer {
            // the timer task is the caller; it must not abort itself
            request.timer = None;
            log_debug!("request {id} timed out");
        }
        request.finish(id, outcome);

        let mut state = lock_ignore_poison(&self.state);
        state.completing -= 1;
        if state.completing == 0 {
            self.idle.notify_waiters();
        }
        true
    }

    async fn wait_idle(&self) {
        // ---
        loop {
            let notified = self.idle.notified();
            let busy = lock_ignore_poison(&self.state).completing;
            if busy == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::packet::tests::Sample;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> Completion<Sample> {
        let counter = counter.clone();
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn register(table: &PendingTable<Sample>, completion: Completion<Sample>) -> CorrelationId {
        table
            .register(Channel::from("ping"), Duration::from_secs(1), completion)
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        // ---
        let table = PendingTable::<Sample>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let id = register(&table, counting(&calls));
        assert_eq!(table.len(), 1);

        let snapshot = table.snapshot();
        assert_eq!(snapshot[&id].channel, Channel::from("ping"));

        assert!(table.complete(&id, Packet::new(Sample::Ping)));
        assert!(!table.complete(&id, Packet::new(Sample::Ping)));
        assert!(!table.expire(&id));
        assert_eq!(table.len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        // ---
        let table = PendingTable::<Sample>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            register(&table, counting(&calls));
        }
        assert_eq!(table.len(), 100);
    }

    #[tokio::test]
    async fn test_huge_timeout_gets_far_deadline() {
        // ---
        let table = PendingTable::<Sample>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (id, deadline) = table
            .register(Channel::from("ping"), Duration::MAX, counting(&calls))
            .unwrap();

        assert!(deadline > Instant::now() + Duration::from_secs(86400 * 365));
        assert_eq!(table.snapshot()[&id].deadline, deadline);
    }

    #[tokio::test]
    async fn test_arm_missing_entry_reports_false() {
        // ---
        let table = PendingTable::<Sample>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = register(&table, counting(&calls));

        let timer = tokio::spawn(std::future::pending::<()>());
        assert!(table.arm(&id, timer.abort_handle()));

        // completing aborts the armed timer
        assert!(table.complete(&id, Packet::new(Sample::Ping)));
        assert!(timer.await.unwrap_err().is_cancelled());

        let late = tokio::spawn(std::future::pending::<()>());
        assert!(!table.arm(&id, late.abort_handle()));
        late.abort();
    }

    #[tokio::test]
    async fn test_discard_skips_completion() {
        // ---
        let table = PendingTable::<Sample>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = register(&table, counting(&calls));

        assert!(table.discard(&id));
        assert!(!table.discard(&id));
        assert_eq!(table.len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_completion_is_contained() {
        // ---
        let table = PendingTable::<Sample>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let bad = register(&table, Box::new(|_| panic!("completion failed")));
        let good = register(&table, counting(&calls));

        assert!(table.complete(&bad, Packet::new(Sample::Ping)));
        assert!(table.expire(&good));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // the in-flight count was released despite the panic
        tokio::time::timeout(Duration::from_millis(100), table.cancel_all())
            .await
            .expect("cancel_all should not wait");
    }

    #[tokio::test]
    async fn test_cancel_all_drains_and_rejects() {
        // ---
        let table = PendingTable::<Sample>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let ids: Vec<_> = (0..3).map(|_| register(&table, counting(&calls))).collect();

        assert_eq!(table.cancel_all().await, 3);
        assert_eq!(table.len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = table
            .register(Channel::from("c"), Duration::from_secs(1), counting(&calls))
            .unwrap_err();
        assert!(matches!(err, Error::Closed));

        for id in &ids {
            assert!(!table.expire(id));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_all_waits_for_running_completion() {
        // ---
        let table = Arc::new(PendingTable::<Sample>::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let done = finished.clone();
        let id = register(
            &table,
            Box::new(move |_| {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(100));
                done.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let replier = {
            let table = table.clone();
            std::thread::spawn(move || table.complete(&id, Packet::new(Sample::Ping)))
        };
        started_rx.recv().unwrap();

        assert_eq!(table.cancel_all().await, 0);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(replier.join().unwrap());
    }

    #[test]
    fn test_concurrent_settle_has_one_winner() {
        // ---
        for _ in 0..50 {
            let table = Arc::new(PendingTable::<Sample>::new());
            let calls = Arc::new(AtomicUsize::new(0));
            let id = register(&table, counting(&calls));

            let racers: Vec<_> = (0..4)
                .map(|n| {
                    let table = table.clone();
                    let id = id.clone();
                    std::thread::spawn(move || {
                        if n % 2 == 0 {
                            table.expire(&id);
                        } else {
                            table.complete(&id, Packet::new(Sample::Ping));
                        }
                    })
                })
                .collect();

            for racer in racers {
                racer.join().unwrap();
            }
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}

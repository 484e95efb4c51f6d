//! Deferred work: "run this on a later turn"
//!
//! A view removes its `ready` wiring only after the `notify("ready")` call
//! that triggered it has returned. Components express that through a
//! [`Scheduler`], never by running the task inline.
//!
//! Models start their transport round-trips through the same seam, so a
//! host that never enters a tokio [`LocalSet`](tokio::task::LocalSet) can
//! still drive requests with a [`TurnQueue`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use futures::task::noop_waker;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce()>;

/// Background work that runs to completion on the host's loop
pub type LocalTask = LocalBoxFuture<'static, ()>;

pub trait Scheduler {
    /// Queue `task` to run after the current call stack unwinds
    fn defer(&self, task: Task);

    /// Start `future` without blocking the caller; it is detached
    fn spawn(&self, future: LocalTask);
}

/// Defers onto the tokio local task set
///
/// Must be used from inside a [`tokio::task::LocalSet`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalScheduler;

impl Scheduler for LocalScheduler {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }

    fn spawn(&self, future: LocalTask) {
        tokio::task::spawn_local(future);
    }
}

/// Manually driven turn queue, for deterministic tests and embedding hosts
/// that own their event loop
///
/// Spawned futures are polled once per [`run_pending`](Self::run_pending)
/// with a no-op waker, so the host keeps turning the queue until
/// [`pending`](Self::pending) reaches zero.
#[derive(Default)]
pub struct TurnQueue {
    tasks: RefCell<VecDeque<Task>>,
    futures: RefCell<Vec<LocalTask>>,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the tasks queued before this call, then poll every spawned
    /// future once. Returns how many tasks ran plus how many futures were
    /// polled.
    ///
    /// Tasks deferred while running wait for the next call.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<Task> = self.tasks.borrow_mut().drain(..).collect();
        let mut count = batch.len();
        for task in batch {
            task();
        }

        let polling = std::mem::take(&mut *self.futures.borrow_mut());
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut parked = Vec::new();
        for mut future in polling {
            count += 1;
            if let Poll::Pending = future.poll_unpin(&mut cx) {
                parked.push(future);
            }
        }
        // keep anything spawned while polling behind the parked futures
        let mut futures = self.futures.borrow_mut();
        parked.append(&mut futures);
        *futures = parked;

        count
    }

    pub fn pending(&self) -> usize {
        self.tasks.borrow().len() + self.futures.borrow().len()
    }
}

impl Scheduler for TurnQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn spawn(&self, future: LocalTask) {
        self.futures.borrow_mut().push(future);
    }
}

impl std::fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_turn_queue_defers_until_run() {
        let queue = TurnQueue::new();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);

        queue.defer(Box::new(move || ran_clone.set(true)));
        assert!(!ran.get());
        assert_eq!(queue.pending(), 1);

        assert_eq!(queue.run_pending(), 1);
        assert!(ran.get());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_tasks_deferred_while_running_wait_a_turn() {
        let queue = Rc::new(TurnQueue::new());
        let order = Rc::new(RefCell::new(Vec::new()));

        let inner_queue = Rc::clone(&queue);
        let inner_order = Rc::clone(&order);
        queue.defer(Box::new(move || {
            inner_order.borrow_mut().push("first");
            let later = Rc::clone(&inner_order);
            inner_queue.defer(Box::new(move || later.borrow_mut().push("second")));
        }));

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*order.borrow(), vec!["first"]);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_turn_queue_polls_spawned_futures() {
        let queue = TurnQueue::new();
        let (tx, rx) = futures::channel::oneshot::channel::<u32>();
        let seen = Rc::new(Cell::new(0));

        let seen_clone = Rc::clone(&seen);
        queue.spawn(
            async move {
                if let Ok(value) = rx.await {
                    seen_clone.set(value);
                }
            }
            .boxed_local(),
        );
        assert_eq!(queue.pending(), 1);

        // nothing to receive yet, so the future parks
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(seen.get(), 0);

        tx.send(7).unwrap();
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(seen.get(), 7);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_local_scheduler_spawns_detached_futures() {
        let local = tokio::task::LocalSet::new();
        let done = Rc::new(Cell::new(false));

        let done_clone = Rc::clone(&done);
        local
            .run_until(async move {
                LocalScheduler.spawn(async move { done_clone.set(true) }.boxed_local());
            })
            .await;
        local.await;

        assert!(done.get());
    }

    #[tokio::test]
    async fn test_local_scheduler_runs_after_current_stack() {
        let local = tokio::task::LocalSet::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let order_clone = Rc::clone(&order);
        local
            .run_until(async move {
                let deferred = Rc::clone(&order_clone);
                LocalScheduler.defer(Box::new(move || deferred.borrow_mut().push("deferred")));
                order_clone.borrow_mut().push("inline");
            })
            .await;
        assert_eq!(*order.borrow(), vec!["inline"]);

        // drive the set until the deferred task has run
        local.await;

        assert_eq!(*order.borrow(), vec!["inline", "deferred"]);
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use unicode_segmentation::UnicodeSegmentation;

/// Split a network fragment into reveal units (extended grapheme clusters),
/// so combined emoji and accented characters appear in one step.
pub fn reveal_units(fragment: &str) -> impl Iterator<Item = &str> {
    fragment.graphemes(true)
}

/// Result of asking the queue for the next unit to reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextUnit {
    Unit(String),
    /// Nothing pending but the source stream is still open.
    Idle,
    /// Nothing pending and the source is closed. `failure` carries the
    /// transport error that closed it, if any.
    Drained { failure: Option<String> },
}

#[derive(Debug)]
struct RevealState {
    pending: VecDeque<String>,
    open: bool,
    discarded: bool,
    failure: Option<String>,
}

#[derive(Debug)]
struct RevealShared {
    state: Mutex<RevealState>,
    ready: Notify,
}

/// Pending display units for one assistant message plus the "source still
/// open" flag.
///
/// Cloning yields another handle to the same queue: the network consumer
/// enqueues through one handle while the reveal timer dequeues through
/// another. Both sides only ever hold the internal lock for a single push or
/// pop, so they can interleave arbitrarily without reordering units.
#[derive(Debug, Clone)]
pub struct RevealQueue {
    shared: Arc<RevealShared>,
}

impl Default for RevealQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RevealQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RevealShared {
                state: Mutex::new(RevealState {
                    pending: VecDeque::new(),
                    open: true,
                    discarded: false,
                    failure: None,
                }),
                ready: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RevealState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Split `fragment` into units and queue them. Returns how many were
    /// queued; nothing is queued once the source has been closed or the
    /// queue discarded.
    pub fn push_fragment(&self, fragment: &str) -> usize {
        let queued = {
            let mut state = self.lock();
            if !state.open || state.discarded {
                return 0;
            }
            let before = state.pending.len();
            state
                .pending
                .extend(reveal_units(fragment).map(str::to_owned));
            state.pending.len() - before
        };
        if queued > 0 {
            self.shared.ready.notify_one();
        }
        queued
    }

    pub fn next_unit(&self) -> NextUnit {
        let mut state = self.lock();
        if let Some(unit) = state.pending.pop_front() {
            return NextUnit::Unit(unit);
        }
        if state.open {
            NextUnit::Idle
        } else {
            NextUnit::Drained {
                failure: state.failure.clone(),
            }
        }
    }

    /// Mark the source stream as finished. Returns the number of units still
    /// waiting to be revealed.
    pub fn close(&self) -> usize {
        self.close_inner(None)
    }

    /// Mark the source stream as failed. Units already queued are still
    /// revealed before the failure surfaces.
    pub fn close_with_failure(&self, failure: impl Into<String>) -> usize {
        self.close_inner(Some(failure.into()))
    }

    fn close_inner(&self, failure: Option<String>) -> usize {
        let remaining = {
            let mut state = self.lock();
            if state.open {
                state.open = false;
                state.failure = failure;
            }
            state.pending.len()
        };
        self.shared.ready.notify_one();
        remaining
    }

    /// Drop every pending unit and refuse further enqueues.
    pub fn discard(&self) {
        {
            let mut state = self.lock();
            state.discarded = true;
            state.open = false;
            state.pending.clear();
        }
        self.shared.ready.notify_one();
    }

    /// Wait until a unit has been queued or the source has closed since the
    /// last wake-up.
    pub async fn ready(&self) {
        self.shared.ready.notified().await;
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &RevealQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let NextUnit::Unit(unit) = queue.next_unit() {
            out.push(unit);
        }
        out
    }

    #[test]
    fn units_are_grapheme_clusters() {
        let units: Vec<&str> = reveal_units("ae\u{301}👩‍💻!").collect();
        assert_eq!(units, vec!["a", "e\u{301}", "👩‍💻", "!"]);
    }

    #[test]
    fn interleaved_bursts_and_ticks_keep_arrival_order() {
        let queue = RevealQueue::new();
        let mut revealed = String::new();

        assert_eq!(queue.push_fragment("Hi"), 2);
        if let NextUnit::Unit(unit) = queue.next_unit() {
            revealed.push_str(&unit);
        }
        queue.push_fragment(" there");
        queue.push_fragment("!");
        for _ in 0..3 {
            if let NextUnit::Unit(unit) = queue.next_unit() {
                revealed.push_str(&unit);
            }
        }
        queue.push_fragment(" How");
        revealed.extend(drain(&queue));

        assert_eq!(revealed, "Hi there! How");
        assert_eq!(queue.next_unit(), NextUnit::Idle);
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        let queue = RevealQueue::new();
        let producer = queue.clone();
        let fragments: Vec<String> = (0..200).map(|i| format!("{i},")).collect();
        let expected: String = fragments.concat();

        let handle = std::thread::spawn(move || {
            for fragment in &fragments {
                producer.push_fragment(fragment);
            }
            producer.close();
        });

        let mut revealed = String::new();
        loop {
            match queue.next_unit() {
                NextUnit::Unit(unit) => revealed.push_str(&unit),
                NextUnit::Idle => std::thread::yield_now(),
                NextUnit::Drained { failure } => {
                    assert!(failure.is_none());
                    break;
                }
            }
        }
        handle.join().expect("producer thread");
        assert_eq!(revealed, expected);
    }

    #[test]
    fn close_reports_remaining_and_drains_before_failure() {
        let queue = RevealQueue::new();
        queue.push_fragment("ok");
        assert_eq!(queue.close_with_failure("connection reset"), 2);
        assert!(!queue.is_open());
        assert_eq!(queue.push_fragment("late"), 0);

        assert_eq!(drain(&queue), vec!["o", "k"]);
        assert_eq!(
            queue.next_unit(),
            NextUnit::Drained {
                failure: Some("connection reset".into())
            }
        );
    }

    #[test]
    fn discard_freezes_the_queue() {
        let queue = RevealQueue::new();
        queue.push_fragment("pending");
        queue.discard();
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.push_fragment("more"), 0);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.next_unit(), NextUnit::Drained { failure: None });
    }

    #[tokio::test]
    async fn ready_wakes_after_enqueue() {
        let queue = RevealQueue::new();
        let waiter = queue.clone();
        let task = tokio::spawn(async move {
            waiter.ready().await;
            waiter.next_unit()
        });
        tokio::task::yield_now().await;
        queue.push_fragment("x");
        let next = task.await.expect("join");
        assert_eq!(next, NextUnit::Unit("x".into()));
    }
}

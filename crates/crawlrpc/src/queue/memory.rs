//! In-process list store with blocking pops.
//!
//! A push to a list that has blocked poppers hands the payload straight to
//! the longest-waiting popper instead of storing it. A popper that gives up
//! (timeout or dropped future) after a hand-off was already made passes the
//! payload on to the next blocked popper, or back onto the tail if there is
//! none, so nothing is lost.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{QueueError, QueueStore};

struct Waiter {
    id: u64,
    tx: oneshot::Sender<String>,
}

#[derive(Default)]
struct List {
    /// Head at the front, tail at the back.
    items: VecDeque<String>,
    waiters: VecDeque<Waiter>,
}

impl List {
    fn is_idle(&self) -> bool {
        self.items.is_empty() && self.waiters.is_empty()
    }

    /// Hand `payload` to the longest-waiting live popper. Returns it when
    /// nobody took it.
    fn hand_off(&mut self, mut payload: String) -> Option<String> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(payload) {
                Ok(()) => {
                    tracing::trace!(waiter = waiter.id, "Handed payload to blocked popper");
                    return None;
                }
                // Receiver already gone; try the next waiter.
                Err(returned) => payload = returned,
            }
        }
        Some(payload)
    }
}

#[derive(Default)]
pub struct MemoryQueueStore {
    lists: Mutex<HashMap<String, List>>,
    next_waiter: AtomicU64,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lists(&self) -> MutexGuard<'_, HashMap<String, List>> {
        // Critical sections never panic mid-update; a poisoned lock still holds
        // consistent lists.
        self.lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of poppers currently blocked on `key`.
    pub fn waiting(&self, key: &str) -> usize {
        self.lists().get(key).map(|l| l.waiters.len()).unwrap_or(0)
    }

    /// Number of stored payloads under `key`.
    pub fn stored(&self, key: &str) -> usize {
        self.lists().get(key).map(|l| l.items.len()).unwrap_or(0)
    }

    fn push_head(&self, key: &str, payload: String) {
        let mut lists = self.lists();
        let list = lists.entry(key.to_string()).or_default();
        if let Some(payload) = list.hand_off(payload) {
            list.items.push_front(payload);
        }
    }

    /// Give a payload back ahead of everything stored, waking a blocked popper
    /// if there is one.
    fn push_tail(&self, key: &str, payload: String) {
        let mut lists = self.lists();
        let list = lists.entry(key.to_string()).or_default();
        if let Some(payload) = list.hand_off(payload) {
            list.items.push_back(payload);
        }
    }

    /// Deregister a waiter. Returns a payload that was handed to it but never
    /// received.
    fn abandon(&self, key: &str, id: u64, rx: &mut oneshot::Receiver<String>) -> Option<String> {
        let mut lists = self.lists();
        if let Some(list) = lists.get_mut(key) {
            list.waiters.retain(|w| w.id != id);
            if list.is_idle() {
                lists.remove(key);
            }
        }
        drop(lists);

        rx.close();
        rx.try_recv().ok()
    }
}

/// A registered blocked pop. Dropping it before completion deregisters the
/// waiter and passes any in-transit payload on.
struct PendingPop<'a> {
    store: &'a MemoryQueueStore,
    key: &'a str,
    id: u64,
    rx: oneshot::Receiver<String>,
    done: bool,
}

impl PendingPop<'_> {
    fn abandon(&mut self) -> Option<String> {
        self.done = true;
        self.store.abandon(self.key, self.id, &mut self.rx)
    }
}

impl Drop for PendingPop<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(payload) = self.abandon() {
            tracing::debug!(key = self.key, "Returning undelivered payload to tail");
            self.store.push_tail(self.key, payload);
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, key: &str, payload: String) -> Result<(), QueueError> {
        self.push_head(key, payload);
        Ok(())
    }

    async fn pop(&self, key: &str, timeout: Option<Duration>) -> Result<Option<String>, QueueError> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);

        {
            let mut lists = self.lists();
            let list = lists.entry(key.to_string()).or_default();
            if let Some(payload) = list.items.pop_back() {
                if list.is_idle() {
                    lists.remove(key);
                }
                return Ok(Some(payload));
            }
            list.waiters.push_back(Waiter { id, tx });
        }

        let mut pending = PendingPop {
            store: self,
            key,
            id,
            rx,
            done: false,
        };

        let received = match timeout {
            Some(t) => tokio::time::timeout(t, &mut pending.rx).await.ok(),
            None => Some((&mut pending.rx).await),
        };
        let Some(received) = received else {
            // A hand-off may have raced the deadline.
            return Ok(pending.abandon());
        };
        pending.done = true;

        received.map(Some).map_err(|_| QueueError::Closed)
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        Ok(self.stored(key))
    }
}

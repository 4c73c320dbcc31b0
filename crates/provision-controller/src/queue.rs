//! Deduplicating work queue
//!
//! A key is queued at most once. Adding a key that is currently being
//! processed marks it dirty, and it is queued again when `done` is called,
//! so updates are never lost and processing of one key is never concurrent.
//! No ordering is guaranteed across distinct keys.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Generation of the pending delayed add per key
    delayed: HashMap<K, u64>,
    next_delay_generation: u64,
    shutting_down: bool,
}

/// Deduplicating, delay-capable queue of keys awaiting processing
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: HashMap::new(),
                next_delay_generation: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        // No code path panics while holding the lock
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `key` for processing
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        Self::add_locked(&mut state, key, &self.notify);
    }

    fn add_locked(state: &mut QueueState<K>, key: K, notify: &Notify) {
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        notify.notify_one();
    }

    /// Queue `key` after `delay`.
    ///
    /// Replaces any earlier pending delayed add for the same key.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let generation = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.next_delay_generation += 1;
            let generation = state.next_delay_generation;
            state.delayed.insert(key.clone(), generation);
            generation
        };

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = queue.lock();
            if state.delayed.get(&key) != Some(&generation) {
                return;
            }
            state.delayed.remove(&key);
            Self::add_locked(&mut state, key, &queue.notify);
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The returned key is marked in-flight until [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    // Let another waiter look at the rest of the queue
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark processing of `key` finished; requeues it if it was re-added
    /// meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    /// Cancel any pending delayed add for `key`
    pub fn forget(&self, key: &K) {
        let mut state = self.lock();
        state.delayed.remove(key);
    }

    /// Stop handing out keys and wake every waiter
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
            state.delayed.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is currently handed out
    pub fn is_processing(&self, key: &K) -> bool {
        self.lock().processing.contains(key)
    }

    /// Whether a delayed add for `key` is pending
    pub fn has_pending_delay(&self, key: &K) -> bool {
        self.lock().delayed.contains_key(key)
    }
}

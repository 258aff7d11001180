//! Cancellable, key-coalescing delayed actions.
//!
//! Scheduling under a key that already has a pending action cancels that
//! action first. Cancellation is cooperative: the pending task checks its
//! [`CancelToken`] after the delay, and the consumer checks it again with
//! [`Scheduler::complete`] before acting, so a stale completion queued
//! behind a re-arm is never applied.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cancellation token for one scheduled action.
#[derive(Debug, Clone)]
pub struct CancelToken {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for CancelToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CancelToken {}

struct Pending {
    token: CancelToken,
    task: JoinHandle<()>,
}

/// At most one pending action per key; keys are independent.
///
/// Must be used from within a tokio runtime.
pub struct Scheduler<K> {
    pending: HashMap<K, Pending>,
    next_id: u64,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> Scheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless cancelled or replaced first.
    ///
    /// Any action already pending under `key` is cancelled before the new one
    /// is registered. The action receives its token and should hand it back
    /// to [`complete`](Self::complete) before applying side effects.
    pub fn schedule<F, Fut>(&mut self, key: K, delay: Duration, action: F) -> CancelToken
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel(&key) {
            debug!("Replaced pending action for {:?}", key);
        }

        self.next_id += 1;
        let token = CancelToken::new(self.next_id);
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if task_token.is_cancelled() {
                return;
            }
            action(task_token).await;
        });

        self.pending.insert(
            key,
            Pending {
                token: token.clone(),
                task,
            },
        );
        token
    }

    /// Cancel the action pending under `key`. Returns whether one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(pending) => {
                pending.token.cancel();
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    /// Claim completion of a fired action.
    ///
    /// Returns `true` only if `token` is still the live token for `key`; the
    /// entry is then removed. Stale or cancelled tokens return `false`.
    pub fn complete(&mut self, key: &K, token: &CancelToken) -> bool {
        match self.pending.get(key) {
            Some(pending) if pending.token == *token && !token.is_cancelled() => {
                self.pending.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.token.cancel();
            pending.task.abort();
        }
    }
}

impl<K> Drop for Scheduler<K> {
    fn drop(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.token.cancel();
            pending.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn send_on_fire(
        tx: &mpsc::UnboundedSender<CancelToken>,
    ) -> impl FnOnce(CancelToken) -> std::future::Ready<()> + Send + 'static {
        let tx = tx.clone();
        move |token| {
            let _ = tx.send(token);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new();

        let token = scheduler.schedule("retain", Duration::from_secs(10), send_on_fire(&tx));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, token);
        assert!(scheduler.complete(&"retain", &fired));
        assert!(!scheduler.is_pending(&"retain"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_same_key_coalesces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new();

        let first = scheduler.schedule("retain", Duration::from_secs(10), send_on_fire(&tx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = scheduler.schedule("retain", Duration::from_secs(10), send_on_fire(&tx));

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, second);

        // Nothing else ever fires.
        let more = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(more.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_is_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new();

        scheduler.schedule("retain", Duration::from_secs(10), send_on_fire(&tx));
        let fired = rx.recv().await.unwrap();

        // Re-armed after the first action fired but before its completion was processed.
        let second = scheduler.schedule("retain", Duration::from_secs(10), send_on_fire(&tx));

        assert!(!scheduler.complete(&"retain", &fired));
        assert!(scheduler.is_pending(&"retain"));

        let fired_again = rx.recv().await.unwrap();
        assert!(scheduler.complete(&"retain", &fired_again));
        assert_eq!(fired_again, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new();

        let a = scheduler.schedule("a", Duration::from_secs(5), send_on_fire(&tx));
        let b = scheduler.schedule("b", Duration::from_secs(10), send_on_fire(&tx));

        assert_eq!(rx.recv().await.unwrap(), a);
        assert_eq!(rx.recv().await.unwrap(), b);
        assert!(scheduler.complete(&"a", &a));
        assert!(scheduler.complete(&"b", &b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new();

        let token = scheduler.schedule("retain", Duration::from_secs(10), send_on_fire(&tx));
        assert!(scheduler.cancel(&"retain"));
        assert!(token.is_cancelled());
        assert!(!scheduler.cancel(&"retain"));

        let fired = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new();

        scheduler.schedule("a", Duration::from_secs(1), send_on_fire(&tx));
        scheduler.schedule("b", Duration::from_secs(1), send_on_fire(&tx));
        scheduler.cancel_all();

        assert!(!scheduler.is_pending(&"a"));
        assert!(!scheduler.is_pending(&"b"));
        let fired = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(fired.is_err());
    }
}

//! Hook lifecycle management.
//!
//! Native change notifications are registered per owning thread/process and
//! must be released exactly once. The [`HookManager`] holds the only strong
//! reference to each callback; the native layer only sees a `Weak`, so a
//! callback lives exactly as long as its subscription.

use crate::window_system::WindowSystem;
use crate::{PlatformError, WindowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Callback invoked with the window a notification refers to.
pub type HookCallback = Arc<dyn Fn(WindowId) + Send + Sync>;

/// Identifier handed out by [`HookManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque native hook handle (HWINEVENTHOOK on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHookId(pub isize);

/// Event kinds a window can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    /// The window moved, resized, or changed show state.
    LocationChange,
}

impl HookKind {
    /// Kinds every tracked window is subscribed to.
    pub const TRACKED: &'static [HookKind] = &[HookKind::LocationChange];
}

/// Thread and process that own a window; native hooks are scoped to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookScope {
    pub thread_id: u32,
    pub process_id: u32,
}

/// Errors that can occur while managing hooks.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Failed to subscribe window {window} to {kind:?}: {source}")]
    Registration {
        window: WindowId,
        kind: HookKind,
        #[source]
        source: PlatformError,
    },

    #[error("Subscription {0} released more than once")]
    DoubleRelease(SubscriptionId),
}

struct Subscription {
    window: WindowId,
    kind: HookKind,
    native: NativeHookId,
    callback: HookCallback,
}

/// Owns every active native subscription and the callback it references.
#[derive(Default)]
pub struct HookManager {
    active: HashMap<SubscriptionId, Subscription>,
    next_id: u64,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in one event kind for the windows of `scope`.
    ///
    /// `window` is the tracked window the subscription belongs to; it is kept
    /// for diagnostics only.
    pub fn subscribe<W: WindowSystem + ?Sized>(
        &mut self,
        ws: &W,
        window: WindowId,
        scope: HookScope,
        kind: HookKind,
        callback: HookCallback,
    ) -> Result<SubscriptionId, HookError> {
        let native = ws
            .subscribe(scope, kind, Arc::downgrade(&callback))
            .map_err(|source| HookError::Registration {
                window,
                kind,
                source,
            })?;

        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.active.insert(
            id,
            Subscription {
                window,
                kind,
                native,
                callback,
            },
        );
        debug!(
            "Subscribed window {} to {:?} (subscription {}, thread {}, process {})",
            window, kind, id, scope.thread_id, scope.process_id
        );
        Ok(id)
    }

    /// Release a subscription and drop its callback.
    ///
    /// Releasing the same id twice is a caller bug: it panics in debug builds
    /// and is logged and ignored in release builds.
    pub fn unsubscribe<W: WindowSystem + ?Sized>(&mut self, ws: &W, id: SubscriptionId) {
        let Some(subscription) = self.active.remove(&id) else {
            let err = HookError::DoubleRelease(id);
            debug_assert!(false, "{}", err);
            error!("{}", err);
            return;
        };

        if let Err(e) = ws.unsubscribe(subscription.native) {
            warn!(
                "Failed to release {:?} hook for window {}: {}",
                subscription.kind, subscription.window, e
            );
        }
        // Native side is gone; now the callback may go too.
        drop(subscription.callback);
        debug!("Released subscription {} for window {}", id, subscription.window);
    }

    /// Release every outstanding subscription.
    pub fn release_all<W: WindowSystem + ?Sized>(&mut self, ws: &W) {
        let ids: Vec<_> = self.active.keys().copied().collect();
        for id in ids {
            self.unsubscribe(ws, id);
        }
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

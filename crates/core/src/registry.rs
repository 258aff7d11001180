//! Registry of tracked windows.
//!
//! Each entry owns its hook subscriptions; they are released before the
//! entry is removed.

use crate::hooks::{HookCallback, HookKind, HookManager, SubscriptionId};
use crate::window_system::WindowSystem;
use crate::{PlatformError, WindowId, WindowPlacement};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A window currently being monitored.
#[derive(Debug, Clone)]
pub struct TrackedWindow {
    pub handle: WindowId,
    /// Last accepted placement.
    pub placement: WindowPlacement,
    subscriptions: Vec<SubscriptionId>,
}

impl TrackedWindow {
    pub fn subscriptions(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }

    /// Whether the window receives location-change notifications.
    pub fn is_hooked(&self) -> bool {
        !self.subscriptions.is_empty()
    }
}

/// Owns the tracked windows and their hook subscriptions.
#[derive(Default)]
pub struct Registry {
    windows: HashMap<WindowId, TrackedWindow>,
    hooks: HookManager,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a window: capture its placement, subscribe it to change
    /// notifications, and insert it.
    ///
    /// Fails only if the placement cannot be read (window already gone). A
    /// failed subscription is logged and the window is tracked without it.
    pub fn track<W: WindowSystem + ?Sized>(
        &mut self,
        ws: &W,
        handle: WindowId,
        callback: HookCallback,
    ) -> Result<&TrackedWindow, PlatformError> {
        let placement = WindowPlacement::capture(ws, handle)?;

        let mut subscriptions = Vec::new();
        match ws.window_thread_process_id(handle) {
            Ok(scope) => {
                for &kind in HookKind::TRACKED {
                    match self.hooks.subscribe(ws, handle, scope, kind, callback.clone()) {
                        Ok(id) => subscriptions.push(id),
                        Err(e) => warn!("{}; window stays tracked without it", e),
                    }
                }
            }
            Err(e) => warn!(
                "Could not resolve owner of window {}: {}; tracking without hooks",
                handle, e
            ),
        }

        debug!(
            "Tracking window {} ({}, {}) with {} subscription(s)",
            handle,
            placement.status,
            placement.rect,
            subscriptions.len()
        );

        let entry = self.windows.entry(handle).or_insert(TrackedWindow {
            handle,
            placement,
            subscriptions: Vec::new(),
        });
        entry.placement = placement;
        entry.subscriptions.extend(subscriptions);
        Ok(&*entry)
    }

    /// Stop tracking a window, releasing its subscriptions first.
    /// Returns the removed entry, or `None` if the window was not tracked.
    pub fn untrack<W: WindowSystem + ?Sized>(
        &mut self,
        ws: &W,
        handle: WindowId,
    ) -> Option<TrackedWindow> {
        let entry = self.windows.get_mut(&handle)?;
        for id in entry.subscriptions.drain(..) {
            self.hooks.unsubscribe(ws, id);
        }
        self.windows.remove(&handle)
    }

    pub fn get(&self, handle: WindowId) -> Option<&TrackedWindow> {
        self.windows.get(&handle)
    }

    pub fn contains(&self, handle: WindowId) -> bool {
        self.windows.contains_key(&handle)
    }

    /// Overwrite the stored placement. Returns `false` if the window is not tracked.
    pub fn update_placement(&mut self, handle: WindowId, placement: WindowPlacement) -> bool {
        match self.windows.get_mut(&handle) {
            Some(entry) => {
                entry.placement = placement;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedWindow> {
        self.windows.values()
    }

    /// Handles and stored placements, sorted by handle.
    pub fn placements(&self) -> Vec<(WindowId, WindowPlacement)> {
        let mut placements: Vec<_> = self
            .windows
            .values()
            .map(|w| (w.handle, w.placement))
            .collect();
        placements.sort_by_key(|(handle, _)| *handle);
        placements
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Number of outstanding native subscriptions across all entries.
    pub fn subscription_count(&self) -> usize {
        self.hooks.active_count()
    }

    /// Untrack every window, releasing all subscriptions.
    pub fn clear<W: WindowSystem + ?Sized>(&mut self, ws: &W) {
        let handles: Vec<_> = self.windows.keys().copied().collect();
        for handle in handles {
            self.untrack(ws, handle);
        }
        // Anything left over belongs to no entry.
        self.hooks.release_all(ws);
    }
}

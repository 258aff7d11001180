//! Native capability boundary.
//!
//! The engine only talks to the desktop through [`WindowSystem`]. The Win32
//! implementation lives in `windowkeeper-platform-win32`; tests use
//! [`mock::MockWindowSystem`].

use crate::hooks::{HookKind, HookScope, NativeHookId};
use crate::{PlatformError, Rect, WindowId, WindowStatus};
use serde::{Deserialize, Serialize};
use std::sync::Weak;

/// Show state and normal (restored) rectangle as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPlacement {
    pub status: WindowStatus,
    pub normal_rect: Rect,
}

/// Reason carried by a session switch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSwitch {
    Lock,
    Unlock,
}

/// Process-wide notifications delivered by the platform layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// A top-level window was created.
    WindowCreated(WindowId),
    /// A top-level window was destroyed.
    WindowDestroyed(WindowId),
    /// Display settings changed (monitor attached, detached, or rearranged).
    DisplaySettingsChanged,
    /// The interactive session was locked or unlocked.
    SessionSwitch(SessionSwitch),
}

/// Trait for querying and manipulating windows and monitors.
/// This abstraction allows mocking in tests.
pub trait WindowSystem {
    /// All top-level windows, in enumeration order.
    fn top_level_windows(&self) -> Result<Vec<WindowId>, PlatformError>;

    fn is_window_visible(&self, window: WindowId) -> bool;

    /// Window title, or `None` if the window has no title or is gone.
    fn window_title(&self, window: WindowId) -> Option<String>;

    /// Owning thread and process of a window.
    fn window_thread_process_id(&self, window: WindowId) -> Result<HookScope, PlatformError>;

    fn window_placement(&self, window: WindowId) -> Result<RawPlacement, PlatformError>;

    fn window_rect(&self, window: WindowId) -> Result<Rect, PlatformError>;

    fn move_window(&self, window: WindowId, rect: Rect) -> Result<(), PlatformError>;

    fn show_maximized(&self, window: WindowId) -> Result<(), PlatformError>;

    /// Monitor rectangles in enumeration order. Zero monitors is a valid result.
    fn enumerate_monitors(&self) -> Result<Vec<Rect>, PlatformError>;

    /// Register a native change notification for every window owned by `scope`.
    ///
    /// The callback is held weakly: the caller owns the strong reference and
    /// notifications arriving after it is dropped are discarded.
    fn subscribe(
        &self,
        scope: HookScope,
        kind: HookKind,
        callback: Weak<dyn Fn(WindowId) + Send + Sync>,
    ) -> Result<NativeHookId, PlatformError>;

    fn unsubscribe(&self, hook: NativeHookId) -> Result<(), PlatformError>;
}

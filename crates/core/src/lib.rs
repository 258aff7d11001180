//! WindowKeeper Core
//!
//! Platform-agnostic engine that keeps window positions stable across
//! monitor reconfiguration.
//!
//! This crate implements:
//! - A registry of tracked windows and their last-known placement
//! - A hook lifecycle manager that owns per-window change subscriptions
//! - A monitor snapshot comparator (order-sensitive layout equality)
//! - The reconciliation state machine that decides when to record and when to restore
//! - A cancellable, key-coalescing scheduler driving the post-restore retention window
//!
//! Native access goes through the [`WindowSystem`] trait so the engine can be
//! driven by a mock in tests and by Win32 in production.

pub mod diagnostics;
pub mod engine;
pub mod hooks;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod window_system;

pub use diagnostics::{DiagnosticEvent, DiagnosticLevel, Diagnostics, DiagnosticsLayer};
pub use engine::{Engine, EngineConfig, EngineEvent, ReconciliationState};
pub use hooks::{
    HookCallback, HookError, HookKind, HookManager, HookScope, NativeHookId, SubscriptionId,
};
pub use monitor::MonitorSetting;
pub use registry::{Registry, TrackedWindow};
pub use scheduler::{CancelToken, Scheduler};
pub use window_system::{RawPlacement, SessionSwitch, SystemEvent, WindowSystem};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a top-level window.
/// On Windows, this is the HWND cast to u64.
pub type WindowId = u64;

/// Errors reported by the native window system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Window {0} is no longer valid")]
    InvalidHandle(WindowId),

    #[error("Failed to enumerate: {0}")]
    EnumerationFailed(String),

    #[error("Failed to register hook: {0}")]
    HookRegistrationFailed(String),

    #[error("{call} failed: {message}")]
    CallFailed { call: &'static str, message: String },

    #[error("Window system is not supported on this platform")]
    Unsupported,
}

/// A rectangle in screen coordinates (pixels), stored as edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Create a new rectangle from its edges.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.left as f64 + self.right as f64) / 2.0,
            (self.top as f64 + self.bottom as f64) / 2.0,
        )
    }

    /// Euclidean distance between this rectangle's center and another's.
    pub fn center_distance(&self, other: &Rect) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Return a copy shifted by the given offset.
    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "left {}, top {}, right {}, bottom {}",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Show state of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    #[default]
    Unknown,
    Normal,
    Minimized,
    Maximized,
}

impl WindowStatus {
    /// Map a raw show-command code to a status.
    pub fn from_show_cmd(show_cmd: u32) -> Self {
        match show_cmd {
            1 => WindowStatus::Normal,
            2 => WindowStatus::Minimized,
            3 => WindowStatus::Maximized,
            _ => WindowStatus::Unknown,
        }
    }
}

impl std::fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WindowStatus::Unknown => "unknown",
            WindowStatus::Normal => "normal",
            WindowStatus::Minimized => "minimized",
            WindowStatus::Maximized => "maximized",
        };
        f.write_str(name)
    }
}

/// Snapshot of where a window is and how it is shown.
///
/// Two placements are the same only if both the status and the rect match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WindowPlacement {
    pub status: WindowStatus,
    pub rect: Rect,
}

impl WindowPlacement {
    pub fn new(status: WindowStatus, rect: Rect) -> Self {
        Self { status, rect }
    }

    /// Query the current placement of a window: show state from the
    /// window placement, rect from the live window rect.
    pub fn capture<W: WindowSystem + ?Sized>(
        ws: &W,
        window: WindowId,
    ) -> Result<Self, PlatformError> {
        let raw = ws.window_placement(window)?;
        let rect = ws.window_rect(window)?;
        Ok(Self::new(raw.status, rect))
    }
}

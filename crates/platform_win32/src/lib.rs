//! WindowKeeper Platform Win32
//!
//! Windows-specific window access using Win32 APIs.
//!
//! This crate handles:
//! - Window enumeration, placement queries and moves ([`Win32WindowSystem`])
//! - Monitor enumeration via EnumDisplayMonitors
//! - Per-thread WinEvent location hooks, serviced by a dedicated message loop
//! - Shell hook, display change and session notifications ([`install_system_hooks`])
//!
//! On other targets the same names exist but every call reports
//! [`PlatformError::Unsupported`], so the rest of the workspace builds and
//! tests anywhere.

pub mod events;

#[cfg(windows)]
mod hook_thread;
#[cfg(windows)]
mod system_events;
#[cfg(windows)]
mod window_system;

#[cfg(windows)]
pub use system_events::{install_system_hooks, SystemHookHandle};
#[cfg(windows)]
pub use window_system::Win32WindowSystem;

#[cfg(not(windows))]
mod unsupported;

#[cfg(not(windows))]
pub use unsupported::{install_system_hooks, SystemHookHandle, Win32WindowSystem};

pub use windowkeeper_core::PlatformError;

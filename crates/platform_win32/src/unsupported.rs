//! Stand-ins for targets without Win32.

use std::sync::mpsc;
use std::sync::Weak;
use windowkeeper_core::{
    HookKind, HookScope, NativeHookId, PlatformError, RawPlacement, Rect, SystemEvent, WindowId,
    WindowSystem,
};

pub struct Win32WindowSystem {
    _private: (),
}

impl Win32WindowSystem {
    pub fn new() -> Result<Self, PlatformError> {
        Err(PlatformError::Unsupported)
    }
}

impl WindowSystem for Win32WindowSystem {
    fn top_level_windows(&self) -> Result<Vec<WindowId>, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn is_window_visible(&self, _window: WindowId) -> bool {
        false
    }

    fn window_title(&self, _window: WindowId) -> Option<String> {
        None
    }

    fn window_thread_process_id(&self, _window: WindowId) -> Result<HookScope, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn window_placement(&self, _window: WindowId) -> Result<RawPlacement, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn window_rect(&self, _window: WindowId) -> Result<Rect, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn move_window(&self, _window: WindowId, _rect: Rect) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn show_maximized(&self, _window: WindowId) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn enumerate_monitors(&self) -> Result<Vec<Rect>, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn subscribe(
        &self,
        _scope: HookScope,
        _kind: HookKind,
        _callback: Weak<dyn Fn(WindowId) + Send + Sync>,
    ) -> Result<NativeHookId, PlatformError> {
        Err(PlatformError::Unsupported)
    }

    fn unsubscribe(&self, _hook: NativeHookId) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }
}

pub struct SystemHookHandle {
    _private: (),
}

pub fn install_system_hooks(
) -> Result<(SystemHookHandle, mpsc::Receiver<SystemEvent>), PlatformError> {
    Err(PlatformError::Unsupported)
}

//! Win32 implementation of [`WindowSystem`].

use crate::hook_thread::HookThread;
use std::ffi::c_void;
use std::sync::Weak;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{EnumDisplayMonitors, HDC, HMONITOR};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowPlacement, GetWindowRect, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, IsWindow, IsWindowVisible, MoveWindow, ShowWindow, SW_SHOWMAXIMIZED,
    WINDOWPLACEMENT,
};
use windowkeeper_core::{
    HookKind, HookScope, NativeHookId, PlatformError, RawPlacement, Rect, WindowId,
    WindowStatus, WindowSystem,
};

pub(crate) fn hwnd(window: WindowId) -> HWND {
    HWND(window as usize as *mut c_void)
}

pub(crate) fn window_id(hwnd: HWND) -> WindowId {
    hwnd.0 as usize as WindowId
}

fn rect_from(rect: RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowId>);
    windows.push(window_id(hwnd));
    true.into()
}

unsafe extern "system" fn enum_monitors_proc(
    _monitor: HMONITOR,
    _hdc: HDC,
    rect: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let monitors = &mut *(lparam.0 as *mut Vec<Rect>);
    if let Some(rect) = rect.as_ref() {
        monitors.push(rect_from(*rect));
    }
    true.into()
}

/// Desktop access through user32, with WinEvent hooks serviced by a
/// dedicated message-loop thread.
pub struct Win32WindowSystem {
    hooks: HookThread,
}

impl Win32WindowSystem {
    pub fn new() -> Result<Self, PlatformError> {
        Ok(Self {
            hooks: HookThread::spawn()?,
        })
    }

    fn ensure_window(&self, window: WindowId) -> Result<HWND, PlatformError> {
        let handle = hwnd(window);
        if unsafe { IsWindow(Some(handle)) }.as_bool() {
            Ok(handle)
        } else {
            Err(PlatformError::InvalidHandle(window))
        }
    }
}

impl WindowSystem for Win32WindowSystem {
    fn top_level_windows(&self) -> Result<Vec<WindowId>, PlatformError> {
        let mut windows: Vec<WindowId> = Vec::new();
        unsafe {
            EnumWindows(
                Some(enum_windows_proc),
                LPARAM(&mut windows as *mut Vec<WindowId> as isize),
            )
        }
        .map_err(|e| PlatformError::EnumerationFailed(format!("EnumWindows: {}", e)))?;
        Ok(windows)
    }

    fn is_window_visible(&self, window: WindowId) -> bool {
        unsafe { IsWindowVisible(hwnd(window)) }.as_bool()
    }

    fn window_title(&self, window: WindowId) -> Option<String> {
        let handle = hwnd(window);
        let len = unsafe { GetWindowTextLengthW(handle) };
        if len <= 0 {
            return None;
        }
        let mut buffer = vec![0u16; len as usize + 1];
        let copied = unsafe { GetWindowTextW(handle, &mut buffer) };
        if copied <= 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buffer[..copied as usize]))
    }

    fn window_thread_process_id(&self, window: WindowId) -> Result<HookScope, PlatformError> {
        let mut process_id = 0u32;
        let thread_id = unsafe { GetWindowThreadProcessId(hwnd(window), Some(&mut process_id)) };
        if thread_id == 0 {
            return Err(PlatformError::InvalidHandle(window));
        }
        Ok(HookScope {
            thread_id,
            process_id,
        })
    }

    fn window_placement(&self, window: WindowId) -> Result<RawPlacement, PlatformError> {
        let handle = self.ensure_window(window)?;
        let mut placement = WINDOWPLACEMENT {
            length: std::mem::size_of::<WINDOWPLACEMENT>() as u32,
            ..Default::default()
        };
        unsafe { GetWindowPlacement(handle, &mut placement) }.map_err(|e| {
            PlatformError::CallFailed {
                call: "GetWindowPlacement",
                message: e.to_string(),
            }
        })?;
        Ok(RawPlacement {
            status: WindowStatus::from_show_cmd(placement.showCmd),
            normal_rect: rect_from(placement.rcNormalPosition),
        })
    }

    fn window_rect(&self, window: WindowId) -> Result<Rect, PlatformError> {
        let handle = self.ensure_window(window)?;
        let mut rect = RECT::default();
        unsafe { GetWindowRect(handle, &mut rect) }.map_err(|e| PlatformError::CallFailed {
            call: "GetWindowRect",
            message: e.to_string(),
        })?;
        Ok(rect_from(rect))
    }

    fn move_window(&self, window: WindowId, rect: Rect) -> Result<(), PlatformError> {
        let handle = self.ensure_window(window)?;
        unsafe {
            MoveWindow(
                handle,
                rect.left,
                rect.top,
                rect.width(),
                rect.height(),
                true,
            )
        }
        .map_err(|e| PlatformError::CallFailed {
            call: "MoveWindow",
            message: e.to_string(),
        })
    }

    fn show_maximized(&self, window: WindowId) -> Result<(), PlatformError> {
        let handle = self.ensure_window(window)?;
        // Return value is the previous visibility, not success.
        let _ = unsafe { ShowWindow(handle, SW_SHOWMAXIMIZED) };
        Ok(())
    }

    fn enumerate_monitors(&self) -> Result<Vec<Rect>, PlatformError> {
        let mut monitors: Vec<Rect> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(enum_monitors_proc),
                LPARAM(&mut monitors as *mut Vec<Rect> as isize),
            )
        };
        if !ok.as_bool() {
            return Err(PlatformError::EnumerationFailed(
                "EnumDisplayMonitors returned FALSE".to_string(),
            ));
        }
        Ok(monitors)
    }

    fn subscribe(
        &self,
        scope: HookScope,
        kind: HookKind,
        callback: Weak<dyn Fn(WindowId) + Send + Sync>,
    ) -> Result<NativeHookId, PlatformError> {
        match kind {
            HookKind::LocationChange => self.hooks.subscribe(scope, callback),
        }
    }

    fn unsubscribe(&self, hook: NativeHookId) -> Result<(), PlatformError> {
        self.hooks.unsubscribe(hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_conversion_roundtrip() {
        let id: WindowId = 0x0001_0A2C;
        assert_eq!(window_id(hwnd(id)), id);
    }

    #[test]
    fn test_rect_conversion() {
        let rect = RECT {
            left: -1920,
            top: 0,
            right: 0,
            bottom: 1080,
        };
        assert_eq!(rect_from(rect), Rect::new(-1920, 0, 0, 1080));
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let ws = Win32WindowSystem::new().unwrap();
        assert!(matches!(
            ws.window_rect(0xDEAD_0000),
            Err(PlatformError::InvalidHandle(0xDEAD_0000))
        ));
        assert!(ws.window_thread_process_id(0xDEAD_0000).is_err());
    }

    #[test]
    fn test_enumerate_monitors_does_not_fail() {
        let ws = Win32WindowSystem::new().unwrap();
        assert!(ws.enumerate_monitors().is_ok());
    }
}

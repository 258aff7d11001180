//! Process-wide notifications: window creation/destruction, display changes
//! and session lock/unlock.
//!
//! A hidden top-level window runs on its own thread and is registered as a
//! shell hook window and for session notifications. `WM_DISPLAYCHANGE` is
//! broadcast to all top-level windows, so it arrives there too. Each
//! notification is decoded and forwarded on a std channel.

use crate::events::{session_change_event, shell_hook_event, WM_WTSSESSION_CHANGE};
use crate::window_system::window_id;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::sync::mpsc;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::RemoteDesktop::{
    WTSRegisterSessionNotification, WTSUnRegisterSessionNotification,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DeregisterShellHookWindow, DestroyWindow, DispatchMessageW,
    GetMessageW, PostMessageW, RegisterClassW, RegisterShellHookWindow, RegisterWindowMessageW,
    TranslateMessage, MSG, WINDOW_EX_STYLE, WM_DISPLAYCHANGE, WM_USER, WNDCLASSW, WS_OVERLAPPED,
};
use windowkeeper_core::{PlatformError, SystemEvent};

/// Custom message to stop the notification thread.
const WM_QUIT_SYSTEM_EVENTS: u32 = WM_USER + 1;

/// `NOTIFY_FOR_THIS_SESSION`
const NOTIFY_FOR_THIS_SESSION: u32 = 0;

thread_local! {
    static EVENT_SENDER: RefCell<Option<mpsc::Sender<SystemEvent>>> = const { RefCell::new(None) };
    static SHELLHOOK_MESSAGE: Cell<u32> = const { Cell::new(0) };
}

/// Keeps the notification window alive. Dropping it unregisters everything
/// and stops the thread; the paired receiver then disconnects.
pub struct SystemHookHandle {
    hwnd: HWND,
    thread: Option<std::thread::JoinHandle<()>>,
}

// The handle is only used to post messages, which is allowed from any thread.
unsafe impl Send for SystemHookHandle {}

/// Start listening for system notifications.
pub fn install_system_hooks(
) -> Result<(SystemHookHandle, mpsc::Receiver<SystemEvent>), PlatformError> {
    let (event_tx, event_rx) = mpsc::channel::<SystemEvent>();
    let (init_tx, init_rx) = mpsc::channel::<Result<isize, PlatformError>>();

    let thread = std::thread::Builder::new()
        .name("system-events".to_string())
        .spawn(move || unsafe {
            let class_name: Vec<u16> = "WindowKeeperSystemEvents\0".encode_utf16().collect();
            let message_name: Vec<u16> = "SHELLHOOK\0".encode_utf16().collect();

            EVENT_SENDER.with(|sender| *sender.borrow_mut() = Some(event_tx));
            SHELLHOOK_MESSAGE.with(|id| {
                id.set(RegisterWindowMessageW(windows::core::PCWSTR(
                    message_name.as_ptr(),
                )))
            });

            let wc = WNDCLASSW {
                lpfnWndProc: Some(system_events_proc),
                lpszClassName: windows::core::PCWSTR(class_name.as_ptr()),
                ..Default::default()
            };
            RegisterClassW(&wc);

            let hwnd = match CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                windows::core::PCWSTR(class_name.as_ptr()),
                None,
                WS_OVERLAPPED,
                0,
                0,
                0,
                0,
                None,
                None,
                None,
                None,
            ) {
                Ok(hwnd) => hwnd,
                Err(e) => {
                    let _ = init_tx.send(Err(PlatformError::HookRegistrationFailed(format!(
                        "notification window: {}",
                        e
                    ))));
                    return;
                }
            };

            if !RegisterShellHookWindow(hwnd).as_bool() {
                let _ = DestroyWindow(hwnd);
                let _ = init_tx.send(Err(PlatformError::HookRegistrationFailed(
                    "RegisterShellHookWindow returned FALSE".to_string(),
                )));
                return;
            }
            // Not fatal, but lock and unlock no longer move the engine to
            // waiting or reconcile the layout on unlock.
            let session_registered =
                match WTSRegisterSessionNotification(hwnd, NOTIFY_FOR_THIS_SESSION) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Session notifications unavailable: {}", e);
                        false
                    }
                };

            let _ = init_tx.send(Ok(hwnd.0 as isize));

            let mut msg = MSG::default();
            loop {
                let result = GetMessageW(&mut msg, None, 0, 0);
                if !result.as_bool() {
                    break;
                }
                if msg.message == WM_QUIT_SYSTEM_EVENTS {
                    break;
                }
                let _ = TranslateMessage(&msg);
                let _ = DispatchMessageW(&msg);
            }

            if session_registered {
                let _ = WTSUnRegisterSessionNotification(hwnd);
            }
            let _ = DeregisterShellHookWindow(hwnd);
            let _ = DestroyWindow(hwnd);
            EVENT_SENDER.with(|sender| sender.borrow_mut().take());
        })
        .map_err(|e| PlatformError::CallFailed {
            call: "spawn",
            message: format!("system events thread: {}", e),
        })?;

    let hwnd_raw = init_rx.recv().map_err(|_| {
        PlatformError::HookRegistrationFailed("system events thread init failed".to_string())
    })??;

    tracing::debug!("System notification window created");

    Ok((
        SystemHookHandle {
            hwnd: HWND(hwnd_raw as *mut c_void),
            thread: Some(thread),
        },
        event_rx,
    ))
}

impl Drop for SystemHookHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = PostMessageW(Some(self.hwnd), WM_QUIT_SYSTEM_EVENTS, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("System notification window destroyed");
    }
}

/// Window procedure for the notification window.
///
/// Wrapped with catch_unwind to prevent panics from crashing the application.
unsafe extern "system" fn system_events_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        decode_message(msg, wparam, lparam)
    }));

    match result {
        Ok(Some(event)) => {
            EVENT_SENDER.with(|sender| {
                if let Some(sender) = sender.borrow().as_ref() {
                    let _ = sender.send(event);
                }
            });
            LRESULT(0)
        }
        Ok(None) => DefWindowProcW(hwnd, msg, wparam, lparam),
        Err(e) => {
            tracing::error!("Panic in system_events_proc: {:?}", e);
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
    }
}

fn decode_message(msg: u32, wparam: WPARAM, lparam: LPARAM) -> Option<SystemEvent> {
    let shellhook = SHELLHOOK_MESSAGE.with(Cell::get);
    if shellhook != 0 && msg == shellhook {
        return shell_hook_event(
            wparam.0 as u32,
            window_id(HWND(lparam.0 as *mut c_void)),
        );
    }
    match msg {
        WM_DISPLAYCHANGE => Some(SystemEvent::DisplaySettingsChanged),
        WM_WTSSESSION_CHANGE => session_change_event(wparam.0 as u32),
        _ => None,
    }
}

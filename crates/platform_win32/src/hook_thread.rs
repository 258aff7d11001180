//! Dedicated thread owning every WinEvent hook.
//!
//! Out-of-context WinEvent callbacks are delivered on the thread that
//! installed the hook, and only while that thread pumps messages. All
//! `SetWinEventHook`/`UnhookWinEvent` calls are therefore marshalled onto one
//! thread with its own message loop. Callbacks are held weakly; a
//! notification whose subscription is already gone is dropped.

use crate::events::is_window_object;
use crate::window_system::window_id;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::mpsc;
use std::sync::Weak;
use std::time::Duration;
use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW, TranslateMessage, MSG,
    PM_NOREMOVE, WM_APP, WM_QUIT, WM_USER,
};
use windowkeeper_core::{HookScope, NativeHookId, PlatformError, WindowId};

type WeakCallback = Weak<dyn Fn(WindowId) + Send + Sync>;

const EVENT_OBJECT_LOCATIONCHANGE: u32 = 0x800B;
const WINEVENT_OUTOFCONTEXT: u32 = 0x0000;

/// Posted to the hook thread when requests are queued.
const WM_HOOK_REQUEST: u32 = WM_APP + 1;

/// How long a caller waits for the hook thread to answer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

enum HookRequest {
    Subscribe {
        scope: HookScope,
        callback: WeakCallback,
        reply: mpsc::Sender<Result<NativeHookId, PlatformError>>,
    },
    Unsubscribe {
        hook: NativeHookId,
        reply: mpsc::Sender<Result<(), PlatformError>>,
    },
}

thread_local! {
    /// Live hooks of the hook thread, keyed by HWINEVENTHOOK.
    static CALLBACKS: RefCell<HashMap<isize, WeakCallback>> = RefCell::new(HashMap::new());
}

pub(crate) struct HookThread {
    thread_id: u32,
    requests: mpsc::Sender<HookRequest>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl HookThread {
    pub(crate) fn spawn() -> Result<Self, PlatformError> {
        let (init_tx, init_rx) = mpsc::channel::<u32>();
        let (request_tx, request_rx) = mpsc::channel::<HookRequest>();

        let thread = std::thread::Builder::new()
            .name("winevent-hooks".to_string())
            .spawn(move || {
                let mut msg = MSG::default();
                unsafe {
                    // Creates the thread's message queue so posted requests are not lost.
                    let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
                    let _ = init_tx.send(GetCurrentThreadId());

                    loop {
                        let result = GetMessageW(&mut msg, None, 0, 0);
                        if !result.as_bool() {
                            break;
                        }
                        if msg.message == WM_HOOK_REQUEST {
                            drain_requests(&request_rx);
                            continue;
                        }
                        let _ = TranslateMessage(&msg);
                        let _ = DispatchMessageW(&msg);
                    }
                }
                release_remaining_hooks();
            })
            .map_err(|e| PlatformError::CallFailed {
                call: "spawn",
                message: format!("hook thread: {}", e),
            })?;

        let thread_id = init_rx.recv().map_err(|_| PlatformError::CallFailed {
            call: "spawn",
            message: "hook thread exited during initialization".to_string(),
        })?;

        tracing::debug!("WinEvent hook thread started (thread {})", thread_id);

        Ok(Self {
            thread_id,
            requests: request_tx,
            thread: Some(thread),
        })
    }

    pub(crate) fn subscribe(
        &self,
        scope: HookScope,
        callback: WeakCallback,
    ) -> Result<NativeHookId, PlatformError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(HookRequest::Subscribe {
            scope,
            callback,
            reply: reply_tx,
        })?;
        reply_rx.recv_timeout(REQUEST_TIMEOUT).map_err(|_| {
            PlatformError::HookRegistrationFailed("hook thread did not respond".to_string())
        })?
    }

    pub(crate) fn unsubscribe(&self, hook: NativeHookId) -> Result<(), PlatformError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(HookRequest::Unsubscribe {
            hook,
            reply: reply_tx,
        })?;
        reply_rx
            .recv_timeout(REQUEST_TIMEOUT)
            .map_err(|_| PlatformError::CallFailed {
                call: "UnhookWinEvent",
                message: "hook thread did not respond".to_string(),
            })?
    }

    fn send(&self, request: HookRequest) -> Result<(), PlatformError> {
        self.requests
            .send(request)
            .map_err(|_| PlatformError::CallFailed {
                call: "PostThreadMessageW",
                message: "hook thread has exited".to_string(),
            })?;
        unsafe { PostThreadMessageW(self.thread_id, WM_HOOK_REQUEST, WPARAM(0), LPARAM(0)) }
            .map_err(|e| PlatformError::CallFailed {
                call: "PostThreadMessageW",
                message: e.to_string(),
            })
    }
}

impl Drop for HookThread {
    fn drop(&mut self) {
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("WinEvent hook thread stopped");
    }
}

fn drain_requests(requests: &mpsc::Receiver<HookRequest>) {
    while let Ok(request) = requests.try_recv() {
        match request {
            HookRequest::Subscribe {
                scope,
                callback,
                reply,
            } => {
                let _ = reply.send(install_hook(scope, callback));
            }
            HookRequest::Unsubscribe { hook, reply } => {
                let _ = reply.send(remove_hook(hook));
            }
        }
    }
}

fn install_hook(scope: HookScope, callback: WeakCallback) -> Result<NativeHookId, PlatformError> {
    let hook = unsafe {
        SetWinEventHook(
            EVENT_OBJECT_LOCATIONCHANGE,
            EVENT_OBJECT_LOCATIONCHANGE,
            None,
            Some(win_event_proc),
            scope.process_id,
            scope.thread_id,
            WINEVENT_OUTOFCONTEXT,
        )
    };
    if hook.is_invalid() {
        return Err(PlatformError::HookRegistrationFailed(format!(
            "SetWinEventHook returned NULL for thread {} process {}",
            scope.thread_id, scope.process_id
        )));
    }

    let id = hook.0 as isize;
    CALLBACKS.with(|callbacks| callbacks.borrow_mut().insert(id, callback));
    Ok(NativeHookId(id))
}

fn remove_hook(hook: NativeHookId) -> Result<(), PlatformError> {
    let known = CALLBACKS.with(|callbacks| callbacks.borrow_mut().remove(&hook.0));
    if known.is_none() {
        return Err(PlatformError::CallFailed {
            call: "UnhookWinEvent",
            message: format!("unknown hook {:?}", hook),
        });
    }
    let ok = unsafe { UnhookWinEvent(HWINEVENTHOOK(hook.0 as *mut c_void)) };
    if ok.as_bool() {
        Ok(())
    } else {
        Err(PlatformError::CallFailed {
            call: "UnhookWinEvent",
            message: "returned FALSE".to_string(),
        })
    }
}

fn release_remaining_hooks() {
    let hooks: Vec<isize> = CALLBACKS.with(|callbacks| {
        callbacks
            .borrow_mut()
            .drain()
            .map(|(id, _)| id)
            .collect()
    });
    if !hooks.is_empty() {
        tracing::warn!("Releasing {} WinEvent hook(s) still registered at exit", hooks.len());
    }
    for id in hooks {
        unsafe {
            let _ = UnhookWinEvent(HWINEVENTHOOK(id as *mut c_void));
        }
    }
}

/// WinEvent callback.
///
/// Wrapped with catch_unwind to prevent panics from unwinding into the OS.
unsafe extern "system" fn win_event_proc(
    hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        dispatch_location_change(hook, event, hwnd, id_object, id_child)
    }));
    if let Err(e) = result {
        tracing::error!("Panic in win_event_proc: {:?}", e);
    }
}

fn dispatch_location_change(
    hook: HWINEVENTHOOK,
    event: u32,
    hwnd: HWND,
    id_object: i32,
    id_child: i32,
) {
    if event != EVENT_OBJECT_LOCATIONCHANGE || !is_window_object(id_object, id_child) {
        return;
    }
    if hwnd.is_invalid() {
        return;
    }
    // Upgrade outside the borrow so the callback may re-enter freely.
    let callback = CALLBACKS.with(|callbacks| {
        callbacks
            .borrow()
            .get(&(hook.0 as isize))
            .and_then(Weak::upgrade)
    });
    if let Some(callback) = callback {
        callback(window_id(hwnd));
    }
}

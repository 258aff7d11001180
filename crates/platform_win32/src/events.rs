//! Decoding of raw notification codes into [`SystemEvent`]s.

use windowkeeper_core::{SessionSwitch, SystemEvent, WindowId};

/// `wParam` of the shell hook message when a top-level window is created.
pub const HSHELL_WINDOWCREATED: u32 = 1;
/// `wParam` of the shell hook message when a top-level window is destroyed.
pub const HSHELL_WINDOWDESTROYED: u32 = 2;

/// `WM_WTSSESSION_CHANGE` message id.
pub const WM_WTSSESSION_CHANGE: u32 = 0x02B1;
pub const WTS_SESSION_LOCK: u32 = 0x7;
pub const WTS_SESSION_UNLOCK: u32 = 0x8;

/// `OBJID_WINDOW` / `CHILDID_SELF`: the event refers to the window itself.
pub const OBJID_WINDOW: i32 = 0;
pub const CHILDID_SELF: i32 = 0;

/// Map a shell hook notification to an event. Other shell codes are ignored.
pub fn shell_hook_event(code: u32, window: WindowId) -> Option<SystemEvent> {
    match code {
        HSHELL_WINDOWCREATED => Some(SystemEvent::WindowCreated(window)),
        HSHELL_WINDOWDESTROYED => Some(SystemEvent::WindowDestroyed(window)),
        _ => None,
    }
}

/// Map a `WM_WTSSESSION_CHANGE` reason to an event. Only lock and unlock matter.
pub fn session_change_event(code: u32) -> Option<SystemEvent> {
    match code {
        WTS_SESSION_LOCK => Some(SystemEvent::SessionSwitch(SessionSwitch::Lock)),
        WTS_SESSION_UNLOCK => Some(SystemEvent::SessionSwitch(SessionSwitch::Unlock)),
        _ => None,
    }
}

/// Location changes are also reported for carets, scroll bars and other
/// child objects; only the window itself is relevant.
pub fn is_window_object(id_object: i32, id_child: i32) -> bool {
    id_object == OBJID_WINDOW && id_child == CHILDID_SELF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_hook_created_and_destroyed() {
        assert_eq!(
            shell_hook_event(HSHELL_WINDOWCREATED, 0x1234),
            Some(SystemEvent::WindowCreated(0x1234))
        );
        assert_eq!(
            shell_hook_event(HSHELL_WINDOWDESTROYED, 0x1234),
            Some(SystemEvent::WindowDestroyed(0x1234))
        );
    }

    #[test]
    fn test_shell_hook_other_codes_ignored() {
        // HSHELL_ACTIVATESHELLWINDOW, HSHELL_WINDOWACTIVATED, HSHELL_REDRAW
        for code in [3, 4, 6, 0x8004] {
            assert_eq!(shell_hook_event(code, 1), None);
        }
    }

    #[test]
    fn test_session_lock_unlock() {
        assert_eq!(
            session_change_event(WTS_SESSION_LOCK),
            Some(SystemEvent::SessionSwitch(SessionSwitch::Lock))
        );
        assert_eq!(
            session_change_event(WTS_SESSION_UNLOCK),
            Some(SystemEvent::SessionSwitch(SessionSwitch::Unlock))
        );
        // WTS_CONSOLE_CONNECT, WTS_REMOTE_CONNECT
        assert_eq!(session_change_event(0x1), None);
        assert_eq!(session_change_event(0x3), None);
    }

    #[test]
    fn test_only_window_object_is_relevant() {
        assert!(is_window_object(OBJID_WINDOW, CHILDID_SELF));
        // OBJID_CARET
        assert!(!is_window_object(-8, CHILDID_SELF));
        assert!(!is_window_object(OBJID_WINDOW, 3));
    }
}

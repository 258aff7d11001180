//! System tray icon for the WindowKeeper daemon.
//!
//! The menu only carries a disabled title and an Exit item; status is
//! available through the CLI.

use std::sync::mpsc;
use thiserror::Error;
use tracing::{debug, info};
use tray_icon::{
    menu::{Menu, MenuEvent, MenuItem, PredefinedMenuItem},
    TrayIcon, TrayIconBuilder,
};

/// Menu item IDs for tray context menu.
mod menu_ids {
    pub const EXIT: &str = "exit";
}

/// Events emitted by the tray icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayEvent {
    /// User clicked "Exit".
    Exit,
}

/// Manages the system tray icon and context menu.
pub struct TrayManager {
    _tray: TrayIcon,
}

impl TrayManager {
    /// Create the tray icon. Menu clicks are delivered on `event_sender`.
    pub fn new(event_sender: mpsc::Sender<TrayEvent>) -> Result<Self, TrayError> {
        let menu = Menu::new();

        let title = MenuItem::new("WindowKeeper", false, None);
        menu.append(&title).map_err(|e| TrayError::Menu(e.to_string()))?;

        menu.append(&PredefinedMenuItem::separator())
            .map_err(|e| TrayError::Menu(e.to_string()))?;

        let exit = MenuItem::with_id(menu_ids::EXIT, "Exit", true, None);
        menu.append(&exit).map_err(|e| TrayError::Menu(e.to_string()))?;

        let icon = create_default_icon()?;

        let tray = TrayIconBuilder::new()
            .with_menu(Box::new(menu))
            .with_tooltip("WindowKeeper - keeps windows in place across monitor changes")
            .with_icon(icon)
            .build()
            .map_err(|e| TrayError::Build(e.to_string()))?;

        info!("System tray icon created");

        std::thread::Builder::new()
            .name("tray-menu".to_string())
            .spawn(move || {
                let menu_channel = MenuEvent::receiver();
                while let Ok(event) = menu_channel.recv() {
                    let tray_event = match event.id.0.as_str() {
                        menu_ids::EXIT => TrayEvent::Exit,
                        id => {
                            debug!("Unknown menu item clicked: {}", id);
                            continue;
                        }
                    };

                    if event_sender.send(tray_event).is_err() {
                        // Receiver dropped, exit thread
                        break;
                    }
                }
            })
            .map_err(|e| TrayError::Build(e.to_string()))?;

        Ok(Self { _tray: tray })
    }
}

/// Create the tray icon image: two monitor outlines side by side.
fn create_default_icon() -> Result<tray_icon::Icon, TrayError> {
    const SIZE: usize = 32;
    const FRAME: [u8; 3] = [230, 230, 230];
    const SCREEN: [u8; 3] = [46, 125, 200];

    let mut rgba = vec![0u8; SIZE * SIZE * 4];

    // (left, right) columns of each monitor, shared rows
    let monitors = [(1usize, 15usize), (17, 31)];
    let (top, bottom) = (7usize, 22usize);

    for y in 0..SIZE {
        for x in 0..SIZE {
            let idx = (y * SIZE + x) * 4;

            let in_monitor = monitors
                .iter()
                .find(|(left, right)| x >= *left && x < *right && y >= top && y < bottom);
            let color = match in_monitor {
                Some((left, right)) => {
                    let edge = x == *left || x == right - 1 || y == top || y == bottom - 1;
                    if edge {
                        FRAME
                    } else {
                        SCREEN
                    }
                }
                // Stands below each monitor
                None if y >= bottom
                    && y < bottom + 3
                    && monitors.iter().any(|(l, r)| x == (l + r) / 2) =>
                {
                    FRAME
                }
                None if y == bottom + 3
                    && monitors
                        .iter()
                        .any(|(l, r)| x + 2 >= (l + r) / 2 && x <= (l + r) / 2 + 2) =>
                {
                    FRAME
                }
                None => continue,
            };

            rgba[idx..idx + 3].copy_from_slice(&color);
            rgba[idx + 3] = 255;
        }
    }

    tray_icon::Icon::from_rgba(rgba, SIZE as u32, SIZE as u32)
        .map_err(|e| TrayError::Icon(e.to_string()))
}

/// Errors that can occur during tray operations.
#[derive(Debug, Error)]
pub enum TrayError {
    #[error("Failed to create menu: {0}")]
    Menu(String),

    #[error("Failed to build tray icon: {0}")]
    Build(String),

    #[error("Failed to create icon: {0}")]
    Icon(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_default_icon() {
        let icon = create_default_icon();
        assert!(icon.is_ok(), "Should create default icon successfully");
    }
}

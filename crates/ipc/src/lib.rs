//! WindowKeeper IPC Protocol
//!
//! Shared types for daemon-CLI communication over Windows named pipes.
//! Every message is one JSON object terminated by a newline.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named pipe path for IPC communication.
pub const PIPE_NAME: &str = r"\\.\pipe\windowkeeper";

/// Upper bound for a single message, newline included.
pub const MAX_IPC_MESSAGE_SIZE: u64 = 64 * 1024;

/// Commands that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Query the reconciliation state and baseline.
    QueryStatus,
    /// List tracked windows with their last recorded placement.
    QueryWindows,
    /// Fetch recent diagnostic log entries.
    QueryDiagnostics {
        /// Maximum number of entries, newest last.
        limit: usize,
    },
    /// Stop the daemon.
    Stop,
}

/// Rectangle as position plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IpcRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl std::fmt::Display for IpcRect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} at ({}, {})", self.width, self.height, self.x, self.y)
    }
}

/// A tracked window as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub window_id: u64,
    pub title: String,
    /// Recorded show state: `normal`, `minimized`, `maximized` or `unknown`.
    pub status: String,
    /// Recorded window rectangle.
    pub rect: IpcRect,
}

/// One diagnostic log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub level: String,
    pub message: String,
}

/// Responses from the daemon to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Command executed successfully.
    Ok,
    /// Command failed with an error.
    Error {
        /// Error message describing what went wrong.
        message: String,
    },
    /// Status query response.
    Status {
        /// Current reconciliation state.
        state: String,
        /// Number of tracked windows.
        tracked_windows: usize,
        /// Saved monitor layout, if one has been captured.
        baseline: Option<Vec<IpcRect>>,
        /// Whether the post-restore retention timer is armed.
        retention_pending: bool,
        /// Seconds since the daemon started.
        uptime_secs: u64,
    },
    /// Tracked windows query response.
    WindowList { windows: Vec<WindowInfo> },
    /// Diagnostics query response, oldest first.
    Diagnostics { entries: Vec<DiagnosticEntry> },
}

impl IpcResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Shorten list responses until they fit in one protocol line.
    ///
    /// Diagnostics lose their oldest entries, window lists their last ones.
    /// Other responses are returned unchanged.
    pub fn fit_to_frame(self) -> Self {
        if encode_line(&self).is_ok() {
            return self;
        }
        match self {
            IpcResponse::Diagnostics { mut entries } => {
                let len = entries.len();
                let keep = largest_fitting(len, |n| {
                    encode_line(&ListView::Diagnostics {
                        entries: &entries[len - n..],
                    })
                    .is_ok()
                });
                entries.drain(..len - keep);
                IpcResponse::Diagnostics { entries }
            }
            IpcResponse::WindowList { mut windows } => {
                let keep = largest_fitting(windows.len(), |n| {
                    encode_line(&ListView::WindowList {
                        windows: &windows[..n],
                    })
                    .is_ok()
                });
                windows.truncate(keep);
                IpcResponse::WindowList { windows }
            }
            other => other,
        }
    }
}

/// Borrowed form of the list responses, serialized identically.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ListView<'a> {
    WindowList { windows: &'a [WindowInfo] },
    Diagnostics { entries: &'a [DiagnosticEntry] },
}

/// Largest `n` in `0..=len` for which `fits(n)` holds; `fits` must be monotone.
fn largest_fitting(len: usize, fits: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, len);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Framing errors for the line protocol.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Message exceeds {} bytes", MAX_IPC_MESSAGE_SIZE)]
    TooLarge,

    #[error("Message is not newline-terminated")]
    Unterminated,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a message into one protocol line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, IpcError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    if line.len() as u64 > MAX_IPC_MESSAGE_SIZE {
        return Err(IpcError::TooLarge);
    }
    Ok(line)
}

/// Parse one protocol line as read from the pipe.
///
/// A line that filled the whole size budget without a newline was cut off
/// and is rejected.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, IpcError> {
    if line.len() as u64 > MAX_IPC_MESSAGE_SIZE {
        return Err(IpcError::TooLarge);
    }
    if line.len() as u64 == MAX_IPC_MESSAGE_SIZE && !line.ends_with('\n') {
        return Err(IpcError::Unterminated);
    }
    Ok(serde_json::from_str(line.trim())?)
}

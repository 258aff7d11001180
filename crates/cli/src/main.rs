//! WindowKeeper CLI
//!
//! Command-line interface for querying and stopping the WindowKeeper daemon.
//!
//! Commands are sent to the daemon via IPC (named pipe).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use windowkeeper_ipc::{IpcCommand, IpcResponse};

#[derive(Parser)]
#[command(name = "windowkeeper-cli")]
#[command(author, version, about = "Query and control the WindowKeeper daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the reconciliation state and saved monitor layout
    Status,
    /// List tracked windows and their recorded placement
    Windows,
    /// Show recent daemon log entries
    Logs {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Stop the daemon
    Stop,
}

impl Commands {
    fn to_ipc(&self) -> IpcCommand {
        match self {
            Commands::Status => IpcCommand::QueryStatus,
            Commands::Windows => IpcCommand::QueryWindows,
            Commands::Logs { limit } => IpcCommand::QueryDiagnostics { limit: *limit },
            Commands::Stop => IpcCommand::Stop,
        }
    }
}

/// Send one command and wait for the single-line reply.
#[cfg(windows)]
async fn send_command(cmd: &IpcCommand) -> Result<IpcResponse> {
    use anyhow::Context;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::windows::named_pipe::ClientOptions;
    use windowkeeper_ipc::{decode_line, encode_line, MAX_IPC_MESSAGE_SIZE, PIPE_NAME};

    let pipe = ClientOptions::new()
        .open(PIPE_NAME)
        .with_context(|| format!("Could not connect to {}. Is the daemon running?", PIPE_NAME))?;

    let (reader, mut writer) = tokio::io::split(pipe);
    writer.write_all(encode_line(cmd)?.as_bytes()).await?;

    let mut reader = BufReader::new(reader.take(MAX_IPC_MESSAGE_SIZE));
    let mut line = String::new();
    let read = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        reader.read_line(&mut line),
    )
    .await
    .context("Timed out waiting for the daemon")??;
    if read == 0 {
        bail!("Daemon closed the connection without replying");
    }

    Ok(decode_line(&line)?)
}

#[cfg(not(windows))]
async fn send_command(_cmd: &IpcCommand) -> Result<IpcResponse> {
    bail!("The WindowKeeper daemon only runs on Windows")
}

/// Render a response for the terminal. Error responses become an `Err`.
fn format_response(response: IpcResponse) -> Result<String> {
    let mut out = String::new();
    match response {
        IpcResponse::Ok => out.push_str("OK"),
        IpcResponse::Error { message } => bail!("Daemon error: {}", message),
        IpcResponse::Status {
            state,
            tracked_windows,
            baseline,
            retention_pending,
            uptime_secs,
        } => {
            let _ = writeln!(out, "State:            {}", state);
            let _ = writeln!(out, "Tracked windows:  {}", tracked_windows);
            let _ = writeln!(
                out,
                "Retention timer:  {}",
                if retention_pending { "armed" } else { "idle" }
            );
            let _ = writeln!(out, "Uptime:           {}", format_uptime(uptime_secs));
            match baseline {
                Some(monitors) => {
                    let _ = write!(out, "Saved layout:     {} monitor(s)", monitors.len());
                    for (i, rect) in monitors.iter().enumerate() {
                        let _ = write!(out, "\n  [{}] {}", i, rect);
                    }
                }
                None => out.push_str("Saved layout:     none"),
            }
        }
        IpcResponse::WindowList { windows } => {
            if windows.is_empty() {
                out.push_str("No tracked windows");
            } else {
                let _ = write!(
                    out,
                    "{:<12} {:<10} {:<28} TITLE",
                    "HANDLE", "STATUS", "RECT"
                );
                for w in &windows {
                    let _ = write!(
                        out,
                        "\n{:<12} {:<10} {:<28} {}",
                        format!("0x{:X}", w.window_id),
                        w.status,
                        w.rect.to_string(),
                        w.title
                    );
                }
            }
        }
        IpcResponse::Diagnostics { entries } => {
            if entries.is_empty() {
                out.push_str("No log entries");
            } else {
                let lines: Vec<String> = entries
                    .iter()
                    .map(|e| format!("{:>5} {}", e.level, e.message))
                    .collect();
                out.push_str(&lines.join("\n"));
            }
        }
    }
    Ok(out)
}

fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let response = send_command(&cli.command.to_ipc()).await?;
    println!("{}", format_response(response)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use windowkeeper_ipc::{DiagnosticEntry, IpcRect, WindowInfo};

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["windowkeeper-cli", "status"]).unwrap();
        assert_eq!(cli.command.to_ipc(), IpcCommand::QueryStatus);

        let cli = Cli::try_parse_from(["windowkeeper-cli", "windows"]).unwrap();
        assert_eq!(cli.command.to_ipc(), IpcCommand::QueryWindows);

        let cli = Cli::try_parse_from(["windowkeeper-cli", "stop"]).unwrap();
        assert_eq!(cli.command.to_ipc(), IpcCommand::Stop);
    }

    #[test]
    fn test_logs_limit() {
        let cli = Cli::try_parse_from(["windowkeeper-cli", "logs"]).unwrap();
        assert_eq!(cli.command.to_ipc(), IpcCommand::QueryDiagnostics { limit: 50 });

        let cli = Cli::try_parse_from(["windowkeeper-cli", "logs", "--limit", "5"]).unwrap();
        assert_eq!(cli.command.to_ipc(), IpcCommand::QueryDiagnostics { limit: 5 });

        assert!(Cli::try_parse_from(["windowkeeper-cli", "logs", "--limit", "-1"]).is_err());
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["windowkeeper-cli", "focus"]).is_err());
    }

    #[test]
    fn test_format_error_is_err() {
        let result = format_response(IpcResponse::error("boom"));
        assert_eq!(result.unwrap_err().to_string(), "Daemon error: boom");
    }

    #[test]
    fn test_format_status() {
        let text = format_response(IpcResponse::Status {
            state: "SavingWindowPositions".to_string(),
            tracked_windows: 3,
            baseline: Some(vec![IpcRect::new(0, 0, 1920, 1080)]),
            retention_pending: false,
            uptime_secs: 3725,
        })
        .unwrap();

        assert!(text.contains("State:            SavingWindowPositions"));
        assert!(text.contains("Tracked windows:  3"));
        assert!(text.contains("Retention timer:  idle"));
        assert!(text.contains("Uptime:           1h 02m 05s"));
        assert!(text.contains("[0] 1920x1080 at (0, 0)"));
    }

    #[test]
    fn test_format_window_list() {
        let text = format_response(IpcResponse::WindowList {
            windows: vec![WindowInfo {
                window_id: 0x1A2B,
                title: "Notes".to_string(),
                status: "normal".to_string(),
                rect: IpcRect::new(10, 20, 800, 600),
            }],
        })
        .unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("HANDLE"));
        assert!(lines[1].starts_with("0x1A2B"));
        assert!(lines[1].ends_with("Notes"));

        let empty = format_response(IpcResponse::WindowList { windows: vec![] }).unwrap();
        assert_eq!(empty, "No tracked windows");
    }

    #[test]
    fn test_format_logs() {
        let text = format_response(IpcResponse::Diagnostics {
            entries: vec![DiagnosticEntry {
                level: "INFO".to_string(),
                message: "Engine started".to_string(),
            }],
        })
        .unwrap();
        assert_eq!(text, " INFO Engine started");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(61), "1m 01s");
        assert_eq!(format_uptime(7200), "2h 00m 00s");
    }
}

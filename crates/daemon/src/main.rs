//! WindowKeeper Daemon
//!
//! Background process that keeps top-level windows where the user put them
//! across monitor disconnects and reconnects.
//!
//! Responsibilities:
//! - Own the reconciliation engine and feed it platform notifications
//! - Handle IPC commands from the CLI
//! - System tray icon with an Exit item
//! - Publish diagnostics for `windowkeeper-cli logs`

mod config;
#[cfg(windows)]
mod tray;

use anyhow::Result;
use config::Config;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use windowkeeper_core::{Diagnostics, Engine, EngineEvent, Rect, SystemEvent, WindowSystem};
use windowkeeper_ipc::{
    DiagnosticEntry, IpcCommand, IpcRect, IpcResponse, WindowInfo, PIPE_NAME,
};
use windowkeeper_platform_win32::{install_system_hooks, Win32WindowSystem};

/// Events that the daemon event loop processes.
enum DaemonEvent {
    /// An IPC command from a CLI client.
    IpcCommand {
        cmd: IpcCommand,
        responder: oneshot::Sender<IpcResponse>,
    },
    /// A process-wide notification from Win32.
    System(SystemEvent),
    /// A tray menu event.
    #[cfg(windows)]
    Tray(tray::TrayEvent),
    /// Shutdown signal.
    Shutdown,
}

/// Timeout for reading an IPC command from a client.
#[cfg_attr(not(windows), allow(dead_code))]
const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Answer one IPC command from the current engine state.
fn handle_command<W: WindowSystem>(
    engine: &Engine<W>,
    diagnostics: &Diagnostics,
    started: Instant,
    cmd: IpcCommand,
) -> IpcResponse {
    match cmd {
        IpcCommand::QueryStatus => IpcResponse::Status {
            state: engine.state().to_string(),
            tracked_windows: engine.registry().len(),
            baseline: engine
                .baseline()
                .map(|setting| setting.monitors().iter().map(ipc_rect).collect()),
            retention_pending: engine.retention_pending(),
            uptime_secs: started.elapsed().as_secs(),
        },
        IpcCommand::QueryWindows => {
            let ws = engine.window_system();
            let mut windows: Vec<WindowInfo> = engine
                .registry()
                .iter()
                .map(|tracked| WindowInfo {
                    window_id: tracked.handle,
                    title: ws.window_title(tracked.handle).unwrap_or_default(),
                    status: tracked.placement.status.to_string(),
                    rect: ipc_rect(&tracked.placement.rect),
                })
                .collect();
            windows.sort_by_key(|w| w.window_id);
            IpcResponse::WindowList { windows }.fit_to_frame()
        }
        IpcCommand::QueryDiagnostics { limit } => IpcResponse::Diagnostics {
            entries: diagnostics
                .recent(limit)
                .into_iter()
                .map(|event| DiagnosticEntry {
                    level: event.level.to_string(),
                    message: event.message,
                })
                .collect(),
        }
        .fit_to_frame(),
        // Shutdown is signalled by the client handler once the reply is sent.
        IpcCommand::Stop => IpcResponse::Ok,
    }
}

fn ipc_rect(rect: &Rect) -> IpcRect {
    IpcRect::new(rect.left, rect.top, rect.width(), rect.height())
}

fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // default fallback for invalid values
    }
}

#[cfg(windows)]
async fn run_ipc_server(event_tx: mpsc::Sender<DaemonEvent>) {
    use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};

    let mut is_first_instance = true;

    loop {
        // Create a new pipe server instance
        let server = match ServerOptions::new()
            .first_pipe_instance(is_first_instance)
            .pipe_mode(PipeMode::Byte)
            .create(PIPE_NAME)
        {
            Ok(s) => {
                is_first_instance = false;
                s
            }
            Err(e) => {
                error!("Failed to create named pipe server: {}", e);
                if is_first_instance {
                    error!("Is another windowkeeper daemon already running?");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        debug!("Waiting for client connection on {}", PIPE_NAME);

        if let Err(e) = server.connect().await {
            error!("Failed to accept client connection: {}", e);
            continue;
        }

        debug!("Client connected");

        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(server, event_tx).await {
                warn!("Client handler error: {}", e);
            }
        });
    }
}

/// Handle a single client connection: one command line in, one response line out.
#[cfg(windows)]
async fn handle_client(
    pipe: tokio::net::windows::named_pipe::NamedPipeServer,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use windowkeeper_ipc::{decode_line, MAX_IPC_MESSAGE_SIZE};

    let (reader, mut writer) = tokio::io::split(pipe);
    let mut reader = BufReader::new(reader.take(MAX_IPC_MESSAGE_SIZE));
    let mut line = String::new();

    let read_result = tokio::time::timeout(IPC_READ_TIMEOUT, reader.read_line(&mut line)).await;
    let bytes_read = match read_result {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            // Timeout: client did not send in time, silently close
            return Ok(());
        }
    };
    if bytes_read == 0 {
        return Ok(()); // Client disconnected
    }

    debug!("Received command: {}", line.trim());

    let cmd: IpcCommand = match decode_line(&line) {
        Ok(cmd) => cmd,
        Err(e) => {
            let response = IpcResponse::error(format!("Invalid command: {}", e));
            writer.write_all(response_line(&response).as_bytes()).await?;
            return Ok(());
        }
    };

    let is_stop = matches!(cmd, IpcCommand::Stop);

    let (resp_tx, resp_rx) = oneshot::channel();
    if event_tx
        .send(DaemonEvent::IpcCommand {
            cmd,
            responder: resp_tx,
        })
        .await
        .is_err()
    {
        let response = IpcResponse::error("Daemon is shutting down");
        writer.write_all(response_line(&response).as_bytes()).await?;
        return Ok(());
    }

    let response = match resp_rx.await {
        Ok(resp) => resp,
        Err(_) => IpcResponse::error("Failed to get response from daemon"),
    };
    writer.write_all(response_line(&response).as_bytes()).await?;

    if is_stop {
        let _ = event_tx.send(DaemonEvent::Shutdown).await;
    }

    Ok(())
}

/// Serialize a response, falling back to an error line if it cannot be sent as is.
#[cfg(windows)]
fn response_line(response: &IpcResponse) -> String {
    use windowkeeper_ipc::encode_line;

    match encode_line(response) {
        Ok(line) => line,
        Err(e) => {
            warn!("Failed to serialize IPC response: {}", e);
            encode_line(&IpcResponse::error(format!("Response not sent: {}", e)))
                .unwrap_or_else(|_| {
                    "{\"status\":\"error\",\"message\":\"Internal serialization error\"}\n"
                        .to_string()
                })
        }
    }
}

/// Spawn a named forwarding thread that receives events from a std::sync::mpsc channel
/// and forwards them to a tokio mpsc sender. Returns the JoinHandle for graceful shutdown.
fn spawn_forwarding_thread<T: Send + 'static>(
    name: &str,
    receiver: std::sync::mpsc::Receiver<T>,
    sender: mpsc::Sender<DaemonEvent>,
    map_fn: impl Fn(T) -> DaemonEvent + Send + 'static,
) -> Result<std::thread::JoinHandle<()>> {
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            while let Ok(event) = receiver.recv() {
                if sender.blocking_send(map_fn(event)).is_err() {
                    break; // Channel closed, daemon shutting down
                }
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to spawn {} thread: {}", thread_name, e))
}

/// Check if another daemon instance is already running by probing the named pipe.
#[cfg(windows)]
async fn check_already_running() -> bool {
    tokio::net::windows::named_pipe::ClientOptions::new()
        .open(PIPE_NAME)
        .is_ok()
}

#[cfg(not(windows))]
async fn check_already_running() -> bool {
    false
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (needed for log level)
    let mut config = Config::load().unwrap_or_else(|e| {
        // Can't use tracing yet, fall back to eprintln
        eprintln!("Failed to load configuration: {}. Using defaults.", e);
        Config::default()
    });
    let config_warnings = config.validate();

    let (diagnostics, diagnostics_layer) = Diagnostics::new(config.diagnostics.history_size);
    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from_level(parse_log_level(&config.behavior.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .with(diagnostics_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    for w in &config_warnings {
        warn!("Config: {} - {}", w.field, w.message);
    }

    info!("WindowKeeper daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if check_already_running().await {
        error!(
            "Another windowkeeper instance is already running (pipe {} is active)",
            PIPE_NAME
        );
        return Ok(());
    }

    info!(
        "Configuration loaded: retention={}s, restore_threshold={}px, \
         excluded_titles={}, log_level={}",
        config.tracking.retention_secs,
        config.tracking.restore_threshold_px,
        config.tracking.exclude_titles.len(),
        config.behavior.log_level
    );

    let window_system = Win32WindowSystem::new()
        .map_err(|e| anyhow::anyhow!("Failed to initialize window system: {}", e))?;

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(100);

    // Collect forwarding thread handles for graceful shutdown
    let mut thread_handles: Vec<std::thread::JoinHandle<()>> = Vec::new();

    let system_hooks = match install_system_hooks() {
        Ok((handle, event_receiver)) => {
            info!("System notifications installed");
            match spawn_forwarding_thread(
                "system-fwd",
                event_receiver,
                event_tx.clone(),
                DaemonEvent::System,
            ) {
                Ok(handle) => thread_handles.push(handle),
                Err(e) => warn!("{}", e),
            }
            Some(handle)
        }
        Err(e) => {
            warn!(
                "Failed to install system notifications: {}. \
                 Monitor changes and new windows will not be seen.",
                e
            );
            None
        }
    };

    // Notifications are queued from here on, so nothing created or changed
    // during the initial enumeration is missed.
    let (engine_tx, mut engine_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let mut engine = Engine::new(window_system, config.engine_config(), engine_tx);
    let tracked = engine.start();
    info!("Tracking {} window(s)", tracked);

    #[cfg(windows)]
    let _tray_manager = if config.behavior.show_tray_icon {
        let (tray_sync_tx, tray_sync_rx) = std::sync::mpsc::channel();

        // The menu thread never exits, so this forwarder is not joined.
        if let Err(e) = spawn_forwarding_thread(
            "tray-fwd",
            tray_sync_rx,
            event_tx.clone(),
            DaemonEvent::Tray,
        ) {
            warn!("{}", e);
        }

        match tray::TrayManager::new(tray_sync_tx) {
            Ok(manager) => {
                info!("System tray icon initialized");
                Some(manager)
            }
            Err(e) => {
                warn!("Failed to create system tray icon: {}. Tray disabled.", e);
                None
            }
        }
    } else {
        info!("Tray icon disabled by config (show_tray_icon = false)");
        None
    };

    #[cfg(windows)]
    {
        let ipc_tx = event_tx.clone();
        tokio::spawn(async move {
            run_ipc_server(ipc_tx).await;
        });
        info!("IPC server listening on {}", PIPE_NAME);
    }

    // Install Ctrl+C handler so terminal kill triggers graceful shutdown
    {
        let shutdown_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Ctrl+C received, initiating shutdown...");
                let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    info!("Ready. Use windowkeeper-cli to query the daemon.");

    let started = Instant::now();

    loop {
        tokio::select! {
            Some(event) = engine_rx.recv() => {
                engine.handle_event(event);
            }
            event = event_rx.recv() => {
                let Some(event) = event else {
                    warn!("Daemon event channel closed");
                    break;
                };
                match event {
                    DaemonEvent::IpcCommand { cmd, responder } => {
                        debug!("IPC command: {:?}", cmd);
                        let response = handle_command(&engine, &diagnostics, started, cmd);
                        let _ = responder.send(response);
                    }
                    DaemonEvent::System(event) => {
                        engine.handle_event(EngineEvent::System(event));
                    }
                    #[cfg(windows)]
                    DaemonEvent::Tray(tray::TrayEvent::Exit) => {
                        info!("Exit requested from tray menu");
                        break;
                    }
                    DaemonEvent::Shutdown => {
                        info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }
    }

    engine.stop();

    // Dropping the notification window disconnects the forwarding thread.
    drop(system_hooks);

    info!("Waiting for forwarding threads to exit...");
    for handle in thread_handles {
        let _ = handle.join();
    }

    info!("WindowKeeper daemon shutting down.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicIsize, Ordering};
    use std::sync::Weak;
    use tracing_subscriber::layer::SubscriberExt;
    use windowkeeper_core::{
        EngineConfig, HookKind, HookScope, NativeHookId, PlatformError, RawPlacement,
        WindowId, WindowStatus,
    };

    /// Fixed desktop: windows never move on their own.
    struct FixedDesktop {
        monitors: Vec<Rect>,
        windows: HashMap<WindowId, (&'static str, WindowStatus, Rect)>,
        next_hook: AtomicIsize,
    }

    impl FixedDesktop {
        fn new() -> Self {
            let mut windows = HashMap::new();
            windows.insert(
                0x20,
                ("Terminal", WindowStatus::Normal, Rect::new(100, 100, 900, 700)),
            );
            windows.insert(
                0x10,
                ("Browser", WindowStatus::Maximized, Rect::new(1920, 0, 3840, 1080)),
            );
            Self {
                monitors: vec![Rect::new(0, 0, 1920, 1080), Rect::new(1920, 0, 3840, 1080)],
                windows,
                next_hook: AtomicIsize::new(1),
            }
        }

        fn window(
            &self,
            window: WindowId,
        ) -> Result<&(&'static str, WindowStatus, Rect), PlatformError> {
            self.windows
                .get(&window)
                .ok_or(PlatformError::InvalidHandle(window))
        }
    }

    impl WindowSystem for FixedDesktop {
        fn top_level_windows(&self) -> Result<Vec<WindowId>, PlatformError> {
            Ok(self.windows.keys().copied().collect())
        }

        fn is_window_visible(&self, window: WindowId) -> bool {
            self.windows.contains_key(&window)
        }

        fn window_title(&self, window: WindowId) -> Option<String> {
            self.window(window).ok().map(|(title, _, _)| title.to_string())
        }

        fn window_thread_process_id(&self, window: WindowId) -> Result<HookScope, PlatformError> {
            self.window(window)?;
            Ok(HookScope {
                thread_id: window as u32,
                process_id: window as u32,
            })
        }

        fn window_placement(&self, window: WindowId) -> Result<RawPlacement, PlatformError> {
            let (_, status, rect) = self.window(window)?;
            Ok(RawPlacement {
                status: *status,
                normal_rect: *rect,
            })
        }

        fn window_rect(&self, window: WindowId) -> Result<Rect, PlatformError> {
            Ok(self.window(window)?.2)
        }

        fn move_window(&self, _window: WindowId, _rect: Rect) -> Result<(), PlatformError> {
            Ok(())
        }

        fn show_maximized(&self, _window: WindowId) -> Result<(), PlatformError> {
            Ok(())
        }

        fn enumerate_monitors(&self) -> Result<Vec<Rect>, PlatformError> {
            Ok(self.monitors.clone())
        }

        fn subscribe(
            &self,
            _scope: HookScope,
            _kind: HookKind,
            _callback: Weak<dyn Fn(WindowId) + Send + Sync>,
        ) -> Result<NativeHookId, PlatformError> {
            Ok(NativeHookId(self.next_hook.fetch_add(1, Ordering::SeqCst)))
        }

        fn unsubscribe(&self, _hook: NativeHookId) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    fn started_engine() -> Engine<FixedDesktop> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = Engine::new(FixedDesktop::new(), EngineConfig::default(), tx);
        engine.start();
        engine
    }

    #[tokio::test]
    async fn test_query_status() {
        let engine = started_engine();
        let (diagnostics, _layer) = Diagnostics::new(10);

        let response =
            handle_command(&engine, &diagnostics, Instant::now(), IpcCommand::QueryStatus);
        match response {
            IpcResponse::Status {
                state,
                tracked_windows,
                baseline,
                retention_pending,
                ..
            } => {
                assert_eq!(state, "SavingWindowPositions");
                assert_eq!(tracked_windows, 2);
                assert_eq!(
                    baseline,
                    Some(vec![
                        IpcRect::new(0, 0, 1920, 1080),
                        IpcRect::new(1920, 0, 1920, 1080)
                    ])
                );
                assert!(!retention_pending);
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_windows_sorted_with_titles() {
        let engine = started_engine();
        let (diagnostics, _layer) = Diagnostics::new(10);

        let response =
            handle_command(&engine, &diagnostics, Instant::now(), IpcCommand::QueryWindows);
        match response {
            IpcResponse::WindowList { windows } => {
                assert_eq!(windows.len(), 2);
                assert_eq!(windows[0].window_id, 0x10);
                assert_eq!(windows[0].title, "Browser");
                assert_eq!(windows[0].status, "maximized");
                assert_eq!(windows[0].rect, IpcRect::new(1920, 0, 1920, 1080));
                assert_eq!(windows[1].title, "Terminal");
                assert_eq!(windows[1].rect, IpcRect::new(100, 100, 800, 600));
            }
            other => panic!("Expected WindowList, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_diagnostics_respects_limit() {
        let engine = started_engine();
        let (diagnostics, layer) = Diagnostics::new(10);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("first");
            tracing::warn!("second");
            tracing::error!("third");
        });

        let response = handle_command(
            &engine,
            &diagnostics,
            Instant::now(),
            IpcCommand::QueryDiagnostics { limit: 2 },
        );
        assert_eq!(
            response,
            IpcResponse::Diagnostics {
                entries: vec![
                    DiagnosticEntry {
                        level: "WARN".to_string(),
                        message: "second".to_string(),
                    },
                    DiagnosticEntry {
                        level: "ERROR".to_string(),
                        message: "third".to_string(),
                    },
                ]
            }
        );
    }

    #[tokio::test]
    async fn test_query_diagnostics_full_default_history_is_sendable() {
        let engine = started_engine();
        let history = Config::default().diagnostics.history_size;
        let (diagnostics, layer) = Diagnostics::new(history);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..history {
                tracing::debug!(
                    "Window 0x{:X} location changed in SavingWindowPositions: \
                     recorded normal 1280x720 at ({}, 96), was normal 1280x720 at (64, 96)",
                    0x1_0000 + i,
                    64 + i
                );
            }
        });

        let response = handle_command(
            &engine,
            &diagnostics,
            Instant::now(),
            IpcCommand::QueryDiagnostics { limit: history },
        );
        assert!(windowkeeper_ipc::encode_line(&response).is_ok());
        match response {
            IpcResponse::Diagnostics { entries } => {
                assert!(!entries.is_empty() && entries.len() < history);
                let newest = entries.last().unwrap();
                assert!(newest.message.contains(&format!("0x{:X}", 0x1_0000 + history - 1)));
            }
            other => panic!("Expected Diagnostics, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_acknowledged() {
        let engine = started_engine();
        let (diagnostics, _layer) = Diagnostics::new(10);
        let response = handle_command(&engine, &diagnostics, Instant::now(), IpcCommand::Stop);
        assert_eq!(response, IpcResponse::Ok);
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), Level::DEBUG);
        assert_eq!(parse_log_level("WARN"), Level::WARN);
        assert_eq!(parse_log_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_forwarding_thread_stops_when_sender_dropped() {
        let (std_tx, std_rx) = std::sync::mpsc::channel::<SystemEvent>();
        let (tx, mut rx) = mpsc::channel::<DaemonEvent>(4);
        let handle =
            spawn_forwarding_thread("test-fwd", std_rx, tx, DaemonEvent::System).unwrap();

        std_tx.send(SystemEvent::DisplaySettingsChanged).unwrap();
        drop(std_tx);
        handle.join().unwrap();

        match rx.try_recv() {
            Ok(DaemonEvent::System(SystemEvent::DisplaySettingsChanged)) => {}
            _ => panic!("Expected forwarded system event"),
        }
    }
}

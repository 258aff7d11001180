//! Reconciliation engine.
//!
//! Records window placements while the monitor layout matches the saved
//! baseline, stops recording when it changes, and restores every tracked
//! window once the baseline layout comes back. For a retention period after
//! a restore, large displacements (the OS or an application fighting the
//! restore) are corrected; small ones are taken as deliberate user moves.
//!
//! All mutation happens through [`Engine::handle_event`] on a single
//! consumer. Hook callbacks and the retention timer only publish
//! [`EngineEvent`]s onto the engine's channel.

use crate::hooks::HookCallback;
use crate::monitor::MonitorSetting;
use crate::registry::Registry;
use crate::scheduler::{CancelToken, Scheduler};
use crate::window_system::{SessionSwitch, SystemEvent, WindowSystem};
use crate::{PlatformError, WindowId, WindowPlacement, WindowStatus};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Default retention period after a restore.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10);

/// Default center displacement (pixels) at which a move during retention is reverted.
pub const DEFAULT_DISPLACEMENT_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReconciliationState {
    /// Layout matches the baseline; placement changes are recorded.
    #[default]
    SavingWindowPositions,
    /// Layout differs from the baseline; nothing is recorded or tracked.
    WaitingForSavedMonitorSettingRestore,
    /// Baseline came back and windows were restored; large moves are reverted.
    RetainingWindowPositionsAfterMonitorSettingRestore,
}

impl std::fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReconciliationState::SavingWindowPositions => "SavingWindowPositions",
            ReconciliationState::WaitingForSavedMonitorSettingRestore => {
                "WaitingForSavedMonitorSettingRestore"
            }
            ReconciliationState::RetainingWindowPositionsAfterMonitorSettingRestore => {
                "RetainingWindowPositionsAfterMonitorSettingRestore"
            }
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long after a restore large displacements are reverted.
    pub retention: Duration,
    /// Center displacement in pixels at or above which a move is reverted.
    pub displacement_threshold: f64,
    /// Windows whose title matches any of these are never tracked.
    pub excluded_titles: Vec<Regex>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            displacement_threshold: DEFAULT_DISPLACEMENT_THRESHOLD,
            excluded_titles: Vec::new(),
        }
    }
}

/// Input consumed by [`Engine::handle_event`].
#[derive(Debug, Clone)]
pub enum EngineEvent {
    System(SystemEvent),
    /// A tracked window's owner thread reported a location change.
    LocationChanged(WindowId),
    /// The retention timer fired; carries the token it was armed with.
    RetentionElapsed(CancelToken),
}

/// The single retention timer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RetentionKey;

pub struct Engine<W: WindowSystem> {
    ws: W,
    registry: Registry,
    state: ReconciliationState,
    baseline: Option<MonitorSetting>,
    scheduler: Scheduler<RetentionKey>,
    events: UnboundedSender<EngineEvent>,
    config: EngineConfig,
    stopped: bool,
}

impl<W: WindowSystem> Engine<W> {
    pub fn new(ws: W, config: EngineConfig, events: UnboundedSender<EngineEvent>) -> Self {
        Self {
            ws,
            registry: Registry::new(),
            state: ReconciliationState::default(),
            baseline: None,
            scheduler: Scheduler::new(),
            events,
            config,
            stopped: false,
        }
    }

    /// Capture the baseline layout and track every eligible top-level window.
    /// Returns the number of windows tracked.
    pub fn start(&mut self) -> usize {
        match MonitorSetting::capture(&self.ws) {
            Ok(setting) => {
                info!("Baseline monitor setting: {}", setting);
                self.baseline = Some(setting);
            }
            Err(e) => warn!(
                "Failed to capture baseline monitor setting: {}; adopting the next observed layout",
                e
            ),
        }

        let windows = match self.ws.top_level_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Failed to enumerate top-level windows: {}", e);
                Vec::new()
            }
        };

        for window in windows {
            if self.is_eligible(window) {
                self.track(window);
            }
        }

        info!(
            "Engine started in {} with {} tracked window(s)",
            self.state,
            self.registry.len()
        );
        self.registry.len()
    }

    /// Cancel the retention timer and release every subscription.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.scheduler.cancel_all();
        let tracked = self.registry.len();
        self.registry.clear(&self.ws);
        info!("Engine stopped; released {} tracked window(s)", tracked);
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        if self.stopped {
            debug!("Engine stopped; dropping {:?}", event);
            return;
        }

        match event {
            EngineEvent::System(SystemEvent::DisplaySettingsChanged) => {
                self.on_monitor_layout_observed("display settings changed");
            }
            EngineEvent::System(SystemEvent::SessionSwitch(reason)) => {
                self.on_session_switch(reason);
            }
            EngineEvent::System(SystemEvent::WindowCreated(window)) => {
                self.on_window_created(window);
            }
            EngineEvent::System(SystemEvent::WindowDestroyed(window)) => {
                self.on_window_destroyed(window);
            }
            EngineEvent::LocationChanged(window) => self.on_location_changed(window),
            EngineEvent::RetentionElapsed(token) => self.on_retention_elapsed(token),
        }
    }

    pub fn state(&self) -> ReconciliationState {
        self.state
    }

    pub fn baseline(&self) -> Option<&MonitorSetting> {
        self.baseline.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn window_system(&self) -> &W {
        &self.ws
    }

    pub fn retention_pending(&self) -> bool {
        self.scheduler.is_pending(&RetentionKey)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn on_monitor_layout_observed(&mut self, cause: &str) {
        let current = match MonitorSetting::capture(&self.ws) {
            Ok(setting) => setting,
            Err(e) => {
                warn!("Skipping reconciliation after {}: {}", cause, e);
                return;
            }
        };

        let matches_baseline = match &self.baseline {
            Some(baseline) => baseline.matches(&current),
            None => {
                info!("Adopting {} as baseline", current);
                self.baseline = Some(current.clone());
                true
            }
        };

        if !matches_baseline {
            debug!("Monitor setting differs from baseline: {}", current);
            self.transition(ReconciliationState::WaitingForSavedMonitorSettingRestore, cause);
            return;
        }

        match self.state {
            ReconciliationState::SavingWindowPositions => {
                debug!("Monitor setting matches baseline; nothing to restore");
            }
            ReconciliationState::WaitingForSavedMonitorSettingRestore
            | ReconciliationState::RetainingWindowPositionsAfterMonitorSettingRestore => {
                let restored = self.restore_all();
                info!("Restored {} window(s) after {}", restored, cause);
                self.arm_retention();
                self.transition(
                    ReconciliationState::RetainingWindowPositionsAfterMonitorSettingRestore,
                    cause,
                );
            }
        }
    }

    fn on_session_switch(&mut self, reason: SessionSwitch) {
        match reason {
            SessionSwitch::Lock => self.transition(
                ReconciliationState::WaitingForSavedMonitorSettingRestore,
                "session locked",
            ),
            SessionSwitch::Unlock => self.on_monitor_layout_observed("session unlocked"),
        }
    }

    fn on_window_created(&mut self, window: WindowId) {
        if self.state == ReconciliationState::WaitingForSavedMonitorSettingRestore {
            debug!("Ignoring window {} created while waiting for layout", window);
            return;
        }
        if self.registry.contains(window) {
            debug!("Window {} is already tracked", window);
            return;
        }
        if self.is_eligible(window) {
            self.track(window);
        }
    }

    fn on_window_destroyed(&mut self, window: WindowId) {
        if self.registry.untrack(&self.ws, window).is_some() {
            debug!("Untracked destroyed window {}", window);
        }
    }

    fn on_location_changed(&mut self, window: WindowId) {
        if self.state == ReconciliationState::WaitingForSavedMonitorSettingRestore {
            return;
        }
        let Some(stored) = self.registry.get(window).map(|w| w.placement) else {
            return;
        };
        if self.ws.window_title(window).is_none() {
            return;
        }
        let current = match WindowPlacement::capture(&self.ws, window) {
            Ok(placement) => placement,
            Err(e) => {
                debug!("Could not read placement of window {}: {}", window, e);
                return;
            }
        };
        if current == stored {
            return;
        }

        if self.state == ReconciliationState::RetainingWindowPositionsAfterMonitorSettingRestore {
            let displacement = current.rect.center_distance(&stored.rect);
            if displacement >= self.config.displacement_threshold {
                info!(
                    "Window {} displaced by {:.1}px during retention; restoring",
                    window, displacement
                );
                if let Err(e) = self.restore_window(window, stored) {
                    warn!("Failed to restore window {}: {}", window, e);
                }
                return;
            }
        }

        debug!(
            "Window {} placement {} ({}) -> {} ({})",
            window, stored.status, stored.rect, current.status, current.rect
        );
        self.registry.update_placement(window, current);
    }

    fn on_retention_elapsed(&mut self, token: CancelToken) {
        if self.scheduler.complete(&RetentionKey, &token) {
            self.transition(ReconciliationState::SavingWindowPositions, "retention elapsed");
        } else {
            debug!("Ignoring stale retention timer {}", token.id());
        }
    }

    /// Restore every tracked window. A failure on one window does not stop the rest.
    /// Returns the number of windows restored without error.
    fn restore_all(&mut self) -> usize {
        let mut restored = 0;
        for (window, stored) in self.registry.placements() {
            match self.restore_window(window, stored) {
                Ok(()) => restored += 1,
                Err(e) => warn!("Skipping restore of window {}: {}", window, e),
            }
        }
        restored
    }

    fn restore_window(
        &self,
        window: WindowId,
        stored: WindowPlacement,
    ) -> Result<(), PlatformError> {
        let live = self.ws.window_rect(window)?;
        if live != stored.rect {
            debug!("Moving window {} from {} to {}", window, live, stored.rect);
            self.ws.move_window(window, stored.rect)?;
        }

        // Some windows drop the maximized state on a programmatic move.
        if stored.status == WindowStatus::Maximized
            && self.ws.window_placement(window)?.status != WindowStatus::Maximized
        {
            debug!("Re-maximizing window {}", window);
            self.ws.show_maximized(window)?;
        }
        Ok(())
    }

    fn arm_retention(&mut self) {
        let events = self.events.clone();
        let token = self
            .scheduler
            .schedule(RetentionKey, self.config.retention, move |token| async move {
                let _ = events.send(EngineEvent::RetentionElapsed(token));
            });
        debug!(
            "Armed retention timer {} for {:?}",
            token.id(),
            self.config.retention
        );
    }

    fn transition(&mut self, next: ReconciliationState, cause: &str) {
        let previous = self.state;
        self.state = next;
        if previous == next {
            debug!("Remaining in {} ({})", next, cause);
        } else {
            info!("State {} -> {} ({})", previous, next, cause);
        }
    }

    fn is_eligible(&self, window: WindowId) -> bool {
        if !self.ws.is_window_visible(window) {
            return false;
        }
        let Some(title) = self.ws.window_title(window) else {
            return false;
        };
        if let Some(pattern) = self
            .config
            .excluded_titles
            .iter()
            .find(|p| p.is_match(&title))
        {
            debug!("Window {} ({:?}) excluded by {}", window, title, pattern);
            return false;
        }
        true
    }

    fn track(&mut self, window: WindowId) {
        let events = self.events.clone();
        let callback: HookCallback = Arc::new(move |window| {
            let _ = events.send(EngineEvent::LocationChanged(window));
        });
        if let Err(e) = self.registry.track(&self.ws, window, callback) {
            debug!("Not tracking window {}: {}", window, e);
        }
    }
}

impl<W: WindowSystem> Drop for Engine<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

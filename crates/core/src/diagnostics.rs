//! Diagnostic event stream.
//!
//! [`DiagnosticsLayer`] is a `tracing` layer that turns log events into
//! [`DiagnosticEvent`]s, publishes them on a broadcast channel, and keeps a
//! bounded history. Publishing never blocks and nobody has to be listening.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&Level> for DiagnosticLevel {
    fn from(level: &Level) -> Self {
        match *level {
            Level::TRACE => DiagnosticLevel::Trace,
            Level::DEBUG => DiagnosticLevel::Debug,
            Level::INFO => DiagnosticLevel::Info,
            Level::WARN => DiagnosticLevel::Warn,
            Level::ERROR => DiagnosticLevel::Error,
        }
    }
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DiagnosticLevel::Trace => "TRACE",
            DiagnosticLevel::Debug => "DEBUG",
            DiagnosticLevel::Info => "INFO",
            DiagnosticLevel::Warn => "WARN",
            DiagnosticLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// One log line as seen by external observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// Observer handle: subscribe to live events or read recent history.
#[derive(Clone)]
pub struct Diagnostics {
    tx: broadcast::Sender<DiagnosticEvent>,
    history: Arc<Mutex<VecDeque<DiagnosticEvent>>>,
    capacity: usize,
}

impl Diagnostics {
    /// Create the observer handle and the layer that feeds it.
    pub fn new(history_size: usize) -> (Self, DiagnosticsLayer) {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let diagnostics = Self {
            tx,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(history_size))),
            capacity: history_size,
        };
        let layer = DiagnosticsLayer {
            sink: diagnostics.clone(),
        };
        (diagnostics, layer)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.tx.subscribe()
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<DiagnosticEvent> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    fn publish(&self, event: DiagnosticEvent) {
        if self.capacity > 0 {
            if let Ok(mut history) = self.history.lock() {
                if history.len() == self.capacity {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

/// `tracing` layer feeding a [`Diagnostics`] handle.
pub struct DiagnosticsLayer {
    sink: Diagnostics,
}

impl<S: Subscriber> Layer<S> for DiagnosticsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.sink.publish(DiagnosticEvent {
            level: event.metadata().level().into(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn with_layer(history_size: usize, f: impl FnOnce()) -> Diagnostics {
        let (diagnostics, layer) = Diagnostics::new(history_size);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        diagnostics
    }

    #[test]
    fn test_events_are_recorded_with_level() {
        let diagnostics = with_layer(10, || {
            tracing::info!("State changed");
            tracing::warn!("Window {} vanished", 42);
        });

        assert_eq!(
            diagnostics.recent(10),
            vec![
                DiagnosticEvent {
                    level: DiagnosticLevel::Info,
                    message: "State changed".to_string(),
                },
                DiagnosticEvent {
                    level: DiagnosticLevel::Warn,
                    message: "Window 42 vanished".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_structured_fields_are_appended() {
        let diagnostics = with_layer(10, || {
            tracing::info!(window = 7, "Tracked");
        });
        assert_eq!(diagnostics.recent(1)[0].message, "Tracked window=7");
    }

    #[test]
    fn test_history_is_bounded() {
        let diagnostics = with_layer(3, || {
            for i in 0..5 {
                tracing::info!("event {}", i);
            }
        });

        let messages: Vec<_> = diagnostics
            .recent(10)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn test_recent_limit_returns_newest() {
        let diagnostics = with_layer(10, || {
            for i in 0..5 {
                tracing::info!("event {}", i);
            }
        });

        let messages: Vec<_> = diagnostics
            .recent(2)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["event 3", "event 4"]);
    }

    #[test]
    fn test_subscribers_receive_live_events() {
        let (diagnostics, layer) = Diagnostics::new(10);
        let mut rx = diagnostics.subscribe();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("boom");
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.level, DiagnosticLevel::Error);
        assert_eq!(event.message, "boom");
    }

    #[test]
    fn test_publish_without_listeners_is_fine() {
        let diagnostics = with_layer(0, || {
            tracing::info!("nobody listening");
        });
        assert!(diagnostics.recent(10).is_empty());
    }
}
